//! WebSocket pub/sub socket
//!
//! Thin client for the broker's JSON envelope: named emits with optional
//! call-id acknowledgements, `#publish`/`#subscribe` channel frames, a
//! `#handshake` authentication exchange, and `#1`/`#2` ping-pong keepalive.
//! Everything above this layer works in terms of [`SocketEvent`]s and
//! [`AckOutcome`]s; the trait seam exists so the negotiation logic can be
//! driven by an in-memory fake in tests.

use crate::{Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Events surfaced by the socket to its owner
#[derive(Debug, Clone)]
pub enum SocketEvent {
    /// Transport connected and handshake sent
    Connected,

    /// Transport could not be established
    ConnectError(String),

    /// Transport dropped; pending acknowledgements are abandoned
    Disconnected,

    /// The broker issued (or cleared) an auth token
    TokenIssued(Option<String>),

    /// Handshake completed; carries the broker's authentication verdict
    Authenticated(bool),

    /// A payload arrived on a subscribed channel
    ChannelMessage {
        /// Channel the payload was published to
        channel: String,
        /// The published payload
        payload: Value,
    },
}

/// The three-way result of an acknowledged emit
///
/// The broker acknowledges with an error object, a null body, or a response
/// body. All three are meaningful to the handshake and must stay distinct.
#[derive(Debug, Clone)]
pub enum AckOutcome {
    /// The broker rejected the emit
    Error(Value),

    /// The broker acknowledged with no body
    Missing,

    /// The broker acknowledged with a response body
    Response(Value),
}

/// A channel-oriented pub/sub socket
///
/// Implemented by [`WebSocketSocket`] in production and by in-memory fakes
/// in the negotiation tests.
#[async_trait]
pub trait PubSubSocket: Send + Sync {
    /// Connect and begin delivering events to `events`
    async fn connect(&self, events: mpsc::UnboundedSender<SocketEvent>) -> Result<()>;

    /// Tear down the transport
    async fn disconnect(&self) -> Result<()>;

    /// Subscribe to a channel
    async fn subscribe(&self, channel: &str) -> Result<()>;

    /// Unsubscribe from a channel
    async fn unsubscribe(&self, channel: &str) -> Result<()>;

    /// Publish a payload to a channel
    async fn publish(&self, channel: &str, payload: Value) -> Result<()>;

    /// Emit a named event and wait for the broker's acknowledgement
    async fn emit_ack(&self, event: &str, payload: Value) -> Result<AckOutcome>;
}

/// Production socket over tokio-tungstenite
pub struct WebSocketSocket {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,

    /// Sender half feeding the writer task; None before connect
    out_tx: Mutex<Option<mpsc::UnboundedSender<Message>>>,

    /// Acknowledgement waiters keyed by call id
    pending: Mutex<HashMap<u64, oneshot::Sender<AckOutcome>>>,

    /// Monotonic call-id source; the broker echoes it back as `rid`
    next_cid: AtomicU64,
}

impl WebSocketSocket {
    /// Create a socket for the given broker URL
    pub fn new(url: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                url: url.to_string(),
                out_tx: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                next_cid: AtomicU64::new(1),
            }),
        }
    }

    async fn send_frame(&self, frame: Value) -> Result<()> {
        let guard = self.inner.out_tx.lock().await;
        let tx = guard
            .as_ref()
            .ok_or_else(|| Error::Transport("socket is not connected".to_string()))?;

        tx.send(Message::Text(frame.to_string()))
            .map_err(|e| Error::Transport(format!("failed to queue frame: {e}")))
    }

    /// Sender task: drains queued frames into the WebSocket
    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write.send(msg).await {
                error!("failed to send WebSocket frame: {}", e);
                break;
            }
        }

        debug!("sender task terminated");
    }

    /// Receiver task: routes inbound frames to waiters and the event channel
    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        inner: Arc<Inner>,
        events: mpsc::UnboundedSender<SocketEvent>,
    ) {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => {
                    if let Err(e) = Self::handle_frame(&text, &inner, &events).await {
                        warn!("failed to handle inbound frame: {}", e);
                    }
                }
                Ok(Message::Close(_)) => {
                    info!("broker closed the connection");
                    break;
                }
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }

        // Abandon waiters so emit_ack callers observe the drop.
        inner.pending.lock().await.clear();
        inner.out_tx.lock().await.take();
        let _ = events.send(SocketEvent::Disconnected);

        debug!("receiver task terminated");
    }

    async fn handle_frame(
        text: &str,
        inner: &Arc<Inner>,
        events: &mpsc::UnboundedSender<SocketEvent>,
    ) -> Result<()> {
        // Keepalive ping is a bare "#1"; answer with "#2".
        if text == "#1" {
            let guard = inner.out_tx.lock().await;
            if let Some(tx) = guard.as_ref() {
                let _ = tx.send(Message::Text("#2".to_string()));
            }
            return Ok(());
        }

        let frame: Value = serde_json::from_str(text)
            .map_err(|e| Error::SignalingProtocol(format!("unparseable frame: {e}")))?;

        // Acknowledgement of a prior emit, keyed by the echoed call id.
        if let Some(rid) = frame.get("rid").and_then(Value::as_u64) {
            let waiter = inner.pending.lock().await.remove(&rid);
            if let Some(waiter) = waiter {
                let outcome = match frame.get("error") {
                    Some(err) if !err.is_null() => AckOutcome::Error(err.clone()),
                    _ => match frame.get("data") {
                        Some(data) if !data.is_null() => AckOutcome::Response(data.clone()),
                        _ => AckOutcome::Missing,
                    },
                };
                let _ = waiter.send(outcome);
            } else {
                debug!("acknowledgement for unknown call id {}", rid);
            }
            return Ok(());
        }

        match frame.get("event").and_then(Value::as_str) {
            Some("#publish") => {
                let data = frame
                    .get("data")
                    .ok_or_else(|| Error::SignalingProtocol("publish without data".to_string()))?;
                let channel = data
                    .get("channel")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        Error::SignalingProtocol("publish without channel".to_string())
                    })?
                    .to_string();
                let payload = data.get("data").cloned().unwrap_or(Value::Null);
                let _ = events.send(SocketEvent::ChannelMessage { channel, payload });
            }
            Some("#setAuthToken") => {
                let token = frame
                    .get("data")
                    .and_then(|d| d.get("token"))
                    .and_then(Value::as_str)
                    .map(String::from);
                let _ = events.send(SocketEvent::TokenIssued(token));
            }
            Some("#removeAuthToken") => {
                let _ = events.send(SocketEvent::TokenIssued(None));
            }
            Some(other) => {
                debug!("ignoring unhandled broker event: {}", other);
            }
            None => {
                debug!("ignoring frame without event or rid");
            }
        }

        Ok(())
    }

    /// Spawn a task that completes the `#handshake` emit and reports the
    /// broker's authentication verdict
    fn spawn_handshake(&self, events: mpsc::UnboundedSender<SocketEvent>) {
        let socket = Self {
            inner: self.inner.clone(),
        };

        tokio::spawn(async move {
            match socket.emit_ack("#handshake", json!({})).await {
                Ok(AckOutcome::Response(data)) => {
                    let authenticated = data
                        .get("isAuthenticated")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    let _ = events.send(SocketEvent::Authenticated(authenticated));
                }
                Ok(_) => {
                    let _ = events.send(SocketEvent::Authenticated(false));
                }
                Err(e) => {
                    warn!("handshake failed: {}", e);
                    let _ = events.send(SocketEvent::ConnectError(e.to_string()));
                }
            }
        });
    }
}

#[async_trait]
impl PubSubSocket for WebSocketSocket {
    async fn connect(&self, events: mpsc::UnboundedSender<SocketEvent>) -> Result<()> {
        {
            let guard = self.inner.out_tx.lock().await;
            if guard.is_some() {
                debug!("connect ignored, socket already connected");
                return Ok(());
            }
        }

        info!("connecting to signaling broker: {}", self.inner.url);

        let (ws_stream, _) = connect_async(&self.inner.url).await.map_err(|e| {
            let err = Error::WebSocket(format!("failed to connect: {e}"));
            let _ = events.send(SocketEvent::ConnectError(err.to_string()));
            err
        })?;

        info!("connected to signaling broker");

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.out_tx.lock().await = Some(tx);

        tokio::spawn(Self::sender_task(write, rx));
        tokio::spawn(Self::receiver_task(read, self.inner.clone(), events.clone()));

        let _ = events.send(SocketEvent::Connected);
        self.spawn_handshake(events);

        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        // Dropping the sender ends the writer task; the broker close then
        // ends the reader, which emits Disconnected.
        self.inner.out_tx.lock().await.take();
        self.inner.pending.lock().await.clear();
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        debug!("subscribing to channel: {}", channel);
        let cid = self.inner.next_cid.fetch_add(1, Ordering::Relaxed);
        self.send_frame(json!({
            "event": "#subscribe",
            "data": {"channel": channel},
            "cid": cid,
        }))
        .await
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        debug!("unsubscribing from channel: {}", channel);
        let cid = self.inner.next_cid.fetch_add(1, Ordering::Relaxed);
        self.send_frame(json!({
            "event": "#unsubscribe",
            "data": channel,
            "cid": cid,
        }))
        .await
    }

    async fn publish(&self, channel: &str, payload: Value) -> Result<()> {
        debug!("publishing to channel: {}", channel);
        self.send_frame(json!({
            "event": "#publish",
            "data": {"channel": channel, "data": payload},
        }))
        .await
    }

    async fn emit_ack(&self, event: &str, payload: Value) -> Result<AckOutcome> {
        let cid = self.inner.next_cid.fetch_add(1, Ordering::Relaxed);
        let (ack_tx, ack_rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(cid, ack_tx);

        let sent = self
            .send_frame(json!({
                "event": event,
                "data": payload,
                "cid": cid,
            }))
            .await;

        if let Err(e) = sent {
            self.inner.pending.lock().await.remove(&cid);
            return Err(e);
        }

        ack_rx
            .await
            .map_err(|_| Error::Transport("connection closed before acknowledgement".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_before_connect_fails() {
        let socket = WebSocketSocket::new("ws://localhost:8000/socketcluster/");
        let result = socket.emit_ack("signal", json!({"channelId": "ALPHA"})).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn test_publish_before_connect_fails() {
        let socket = WebSocketSocket::new("ws://localhost:8000/socketcluster/");
        let result = socket.publish("answer:ALPHA", json!({})).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn test_ack_frame_routing() {
        let inner = Arc::new(Inner {
            url: String::new(),
            out_tx: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            next_cid: AtomicU64::new(1),
        });
        let (events_tx, _events_rx) = mpsc::unbounded_channel();

        let (ack_tx, ack_rx) = oneshot::channel();
        inner.pending.lock().await.insert(7, ack_tx);

        WebSocketSocket::handle_frame(
            r#"{"rid": 7, "error": null, "data": {"offer": {"sdp": "v=0", "type": "offer"}}}"#,
            &inner,
            &events_tx,
        )
        .await
        .unwrap();

        match ack_rx.await.unwrap() {
            AckOutcome::Response(data) => assert_eq!(data["offer"]["type"], "offer"),
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_null_ack_body_is_missing() {
        let inner = Arc::new(Inner {
            url: String::new(),
            out_tx: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            next_cid: AtomicU64::new(1),
        });
        let (events_tx, _events_rx) = mpsc::unbounded_channel();

        let (ack_tx, ack_rx) = oneshot::channel();
        inner.pending.lock().await.insert(3, ack_tx);

        WebSocketSocket::handle_frame(r#"{"rid": 3, "error": null, "data": null}"#, &inner, &events_tx)
            .await
            .unwrap();

        assert!(matches!(ack_rx.await.unwrap(), AckOutcome::Missing));
    }

    #[tokio::test]
    async fn test_error_ack_routing() {
        let inner = Arc::new(Inner {
            url: String::new(),
            out_tx: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            next_cid: AtomicU64::new(1),
        });
        let (events_tx, _events_rx) = mpsc::unbounded_channel();

        let (ack_tx, ack_rx) = oneshot::channel();
        inner.pending.lock().await.insert(9, ack_tx);

        WebSocketSocket::handle_frame(
            r#"{"rid": 9, "error": {"message": "no such event"}}"#,
            &inner,
            &events_tx,
        )
        .await
        .unwrap();

        match ack_rx.await.unwrap() {
            AckOutcome::Error(err) => assert_eq!(err["message"], "no such event"),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_frame_becomes_channel_message() {
        let inner = Arc::new(Inner {
            url: String::new(),
            out_tx: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            next_cid: AtomicU64::new(1),
        });
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        WebSocketSocket::handle_frame(
            r##"{"event": "#publish", "data": {"channel": "icecandidate:ALPHA", "data": {"candidate": {}}}}"##,
            &inner,
            &events_tx,
        )
        .await
        .unwrap();

        match events_rx.recv().await.unwrap() {
            SocketEvent::ChannelMessage { channel, payload } => {
                assert_eq!(channel, "icecandidate:ALPHA");
                assert!(payload.get("candidate").is_some());
            }
            other => panic!("expected channel message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_auth_token_frame() {
        let inner = Arc::new(Inner {
            url: String::new(),
            out_tx: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            next_cid: AtomicU64::new(1),
        });
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        WebSocketSocket::handle_frame(
            r##"{"event": "#setAuthToken", "data": {"token": "abc123"}}"##,
            &inner,
            &events_tx,
        )
        .await
        .unwrap();

        match events_rx.recv().await.unwrap() {
            SocketEvent::TokenIssued(Some(token)) => assert_eq!(token, "abc123"),
            other => panic!("expected token, got {other:?}"),
        }
    }
}
