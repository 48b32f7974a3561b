//! Signaling client facade
//!
//! Wraps a [`PubSubSocket`] with subscription bookkeeping so the session
//! logic can subscribe and unsubscribe idempotently while identities change.

use super::socket::{AckOutcome, PubSubSocket, SocketEvent};
use crate::Result;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// Pub/sub signaling client
pub struct SignalingClient {
    socket: Arc<dyn PubSubSocket>,
    subscriptions: Arc<Mutex<HashSet<String>>>,
    connected: Arc<AtomicBool>,
}

impl SignalingClient {
    /// Create a client over the given socket
    pub fn new(socket: Arc<dyn PubSubSocket>) -> Self {
        Self {
            socket,
            subscriptions: Arc::new(Mutex::new(HashSet::new())),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Connect the underlying socket; events flow to `events`
    ///
    /// Calling connect on an already connected client is a no-op. A broker
    /// drop reported by the socket clears the connected flag and the
    /// subscription set, so connect works again without an explicit
    /// disconnect.
    pub async fn connect(&self, events: mpsc::UnboundedSender<SocketEvent>) -> Result<()> {
        if self.connected.swap(true, Ordering::SeqCst) {
            debug!("connect ignored, already connected");
            return Ok(());
        }

        // Interpose on the event stream: the broker dropping the transport
        // must reset this client's bookkeeping, not just inform the owner.
        let (socket_tx, mut socket_rx) = mpsc::unbounded_channel();
        let connected = self.connected.clone();
        let subscriptions = self.subscriptions.clone();
        tokio::spawn(async move {
            while let Some(event) = socket_rx.recv().await {
                if matches!(event, SocketEvent::Disconnected) {
                    connected.store(false, Ordering::SeqCst);
                    subscriptions.lock().await.clear();
                }
                if events.send(event).is_err() {
                    break;
                }
            }
        });

        if let Err(e) = self.socket.connect(socket_tx).await {
            self.connected.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    /// Tear down the socket and forget all subscriptions
    pub async fn disconnect(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.subscriptions.lock().await.clear();
        self.socket.disconnect().await
    }

    /// Subscribe to a channel; repeated subscribes are no-ops
    pub async fn subscribe(&self, channel: &str) -> Result<()> {
        let mut subs = self.subscriptions.lock().await;
        if !subs.insert(channel.to_string()) {
            debug!("already subscribed to {}", channel);
            return Ok(());
        }
        self.socket.subscribe(channel).await
    }

    /// Unsubscribe from a channel; unknown channels are no-ops
    pub async fn unsubscribe(&self, channel: &str) -> Result<()> {
        let mut subs = self.subscriptions.lock().await;
        if !subs.remove(channel) {
            return Ok(());
        }
        self.socket.unsubscribe(channel).await
    }

    /// Publish a payload to a channel
    pub async fn publish(&self, channel: &str, payload: Value) -> Result<()> {
        self.socket.publish(channel, payload).await
    }

    /// Emit a named event and wait for the acknowledgement
    pub async fn emit_ack(&self, event: &str, payload: Value) -> Result<AckOutcome> {
        self.socket.emit_ack(event, payload).await
    }

    /// Whether a subscription to `channel` is currently held
    pub async fn is_subscribed(&self, channel: &str) -> bool {
        self.subscriptions.lock().await.contains(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingSocket {
        connects: AtomicUsize,
        subscribes: AtomicUsize,
        unsubscribes: AtomicUsize,
        events: Mutex<Option<mpsc::UnboundedSender<SocketEvent>>>,
    }

    #[async_trait]
    impl PubSubSocket for CountingSocket {
        async fn connect(&self, events: mpsc::UnboundedSender<SocketEvent>) -> Result<()> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            *self.events.lock().await = Some(events);
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }

        async fn subscribe(&self, _channel: &str) -> Result<()> {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn unsubscribe(&self, _channel: &str) -> Result<()> {
            self.unsubscribes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn publish(&self, _channel: &str, _payload: Value) -> Result<()> {
            Ok(())
        }

        async fn emit_ack(&self, _event: &str, _payload: Value) -> Result<AckOutcome> {
            Ok(AckOutcome::Missing)
        }
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let socket = Arc::new(CountingSocket::default());
        let client = SignalingClient::new(socket.clone());

        client.subscribe("icecandidate:ALPHA").await.unwrap();
        client.subscribe("icecandidate:ALPHA").await.unwrap();

        assert_eq!(socket.subscribes.load(Ordering::SeqCst), 1);
        assert!(client.is_subscribed("icecandidate:ALPHA").await);
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_is_noop() {
        let socket = Arc::new(CountingSocket::default());
        let client = SignalingClient::new(socket.clone());

        client.unsubscribe("answer:NEVER").await.unwrap();
        assert_eq!(socket.unsubscribes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_after_subscribe() {
        let socket = Arc::new(CountingSocket::default());
        let client = SignalingClient::new(socket.clone());

        client.subscribe("answer:ALPHA").await.unwrap();
        client.unsubscribe("answer:ALPHA").await.unwrap();

        assert_eq!(socket.unsubscribes.load(Ordering::SeqCst), 1);
        assert!(!client.is_subscribed("answer:ALPHA").await);
    }

    #[tokio::test]
    async fn test_broker_drop_permits_reconnect() {
        let socket = Arc::new(CountingSocket::default());
        let client = SignalingClient::new(socket.clone());

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        client.connect(events_tx).await.unwrap();
        client.subscribe("icecandidate:ALPHA").await.unwrap();

        // The broker drops the transport without a local disconnect call.
        let inner_tx = socket.events.lock().await.clone().unwrap();
        inner_tx.send(SocketEvent::Disconnected).unwrap();

        // The event still reaches the owner, after bookkeeping is reset.
        assert!(matches!(
            events_rx.recv().await,
            Some(SocketEvent::Disconnected)
        ));
        assert!(!client.is_subscribed("icecandidate:ALPHA").await);

        // Reconnect works and subscriptions forward again.
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        client.connect(events_tx).await.unwrap();
        client.subscribe("icecandidate:ALPHA").await.unwrap();

        assert_eq!(socket.connects.load(Ordering::SeqCst), 2);
        assert_eq!(socket.subscribes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disconnect_clears_subscriptions() {
        let socket = Arc::new(CountingSocket::default());
        let client = SignalingClient::new(socket.clone());

        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        client.connect(events_tx).await.unwrap();
        client.subscribe("icecandidate:ALPHA").await.unwrap();
        client.disconnect().await.unwrap();

        assert!(!client.is_subscribed("icecandidate:ALPHA").await);
    }
}
