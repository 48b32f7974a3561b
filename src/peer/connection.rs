//! WebRTC peer connection management
//!
//! This side is always the answerer: the remote peer's offer arrives over
//! signaling, an answer is created here, and pose payloads flow out over a
//! data channel the remote peer opens.

use crate::config::TransportConfig;
use crate::signaling::protocol::IceCandidateRecord;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

/// ICE connectivity as observed by the session logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceState {
    /// Initial state
    New,
    /// Connectivity checks in progress
    Checking,
    /// A usable candidate pair was found
    Connected,
    /// All checks finished
    Completed,
    /// Connectivity checks failed
    Failed,
    /// Connectivity was lost after being established
    Disconnected,
    /// The connection was closed
    Closed,
}

/// Events surfaced by a peer endpoint to the session logic
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A local candidate was gathered and should be trickled to the remote peer
    LocalCandidate(IceCandidateRecord),

    /// The ICE connectivity state changed
    StateChanged(IceState),

    /// A payload arrived on the data channel
    Data(Vec<u8>),
}

/// Answerer-side peer connection operations
///
/// Implemented by [`PeerConnection`] in production and by fakes in the
/// negotiation tests.
#[async_trait]
pub trait PeerEndpoint: Send + Sync {
    /// Apply the remote peer's offer
    async fn set_remote_offer(&self, sdp: &str) -> Result<()>;

    /// Create the local answer and return its SDP
    async fn create_answer(&self) -> Result<String>;

    /// Apply a candidate trickled from the remote peer
    async fn add_remote_candidate(&self, candidate: &IceCandidateRecord) -> Result<()>;

    /// Send a payload over the data channel
    async fn send(&self, payload: &[u8]) -> Result<()>;

    /// Tear down the connection
    async fn close(&self) -> Result<()>;
}

/// Creates peer endpoints, one per connection attempt
#[async_trait]
pub trait PeerFactory: Send + Sync {
    /// Create a fresh endpoint delivering events to `events`
    async fn create(
        &self,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerEndpoint>>;
}

/// WebRTC peer connection wrapper
pub struct PeerConnection {
    /// Unique identifier for this connection instance
    connection_id: String,

    /// Underlying peer connection primitive
    peer_connection: Arc<RTCPeerConnection>,

    /// Data channel opened by the remote peer, once it arrives
    data_channel: Arc<RwLock<Option<Arc<RTCDataChannel>>>>,
}

impl PeerConnection {
    /// Create a new peer connection from the transport configuration
    ///
    /// Events (gathered candidates, ICE state changes, inbound data) are
    /// delivered to `events` until the connection is closed.
    pub async fn new(
        config: &TransportConfig,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Self> {
        let connection_id = uuid::Uuid::new_v4().to_string();

        info!("Creating peer connection: connection_id={}", connection_id);

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::Negotiation(format!("Failed to register codecs: {e}")))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine)
                .map_err(|e| Error::Negotiation(format!("Failed to register interceptors: {e}")))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| {
                #[allow(clippy::needless_update)]
                RTCIceServer {
                    urls: vec![turn.url.clone()],
                    username: turn.username.clone(),
                    credential: turn.credential.clone(),
                    ..Default::default()
                }
            }))
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| Error::Negotiation(format!("Failed to create peer connection: {e}")))?,
        );

        // Gathered candidates are handed straight to the session logic; it
        // decides whether to publish or buffer them.
        let candidate_events = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = candidate_events.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    debug!("candidate gathering complete");
                    return;
                };

                match candidate.to_json() {
                    Ok(init) => match IceCandidateRecord::from_rtc(&init) {
                        Ok(record) => {
                            let _ = events.send(PeerEvent::LocalCandidate(record));
                        }
                        Err(e) => warn!("dropping unusable local candidate: {}", e),
                    },
                    Err(e) => warn!("failed to serialize local candidate: {}", e),
                }
            })
        }));

        let state_events = events.clone();
        let state_connection_id = connection_id.clone();
        peer_connection.on_ice_connection_state_change(Box::new(
            move |s: RTCIceConnectionState| {
                let events = state_events.clone();
                let connection_id = state_connection_id.clone();
                Box::pin(async move {
                    let state = match s {
                        RTCIceConnectionState::New => IceState::New,
                        RTCIceConnectionState::Checking => IceState::Checking,
                        RTCIceConnectionState::Connected => IceState::Connected,
                        RTCIceConnectionState::Completed => IceState::Completed,
                        RTCIceConnectionState::Failed => IceState::Failed,
                        RTCIceConnectionState::Disconnected => IceState::Disconnected,
                        RTCIceConnectionState::Closed => IceState::Closed,
                        _ => return,
                    };

                    debug!("Connection {} ICE state: {:?}", connection_id, state);
                    let _ = events.send(PeerEvent::StateChanged(state));
                })
            },
        ));

        // The remote peer opens the data channel; this side only accepts it.
        let data_channel = Arc::new(RwLock::new(None::<Arc<RTCDataChannel>>));
        let channel_slot = Arc::clone(&data_channel);
        let data_events = events;
        peer_connection.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
            let channel_slot = Arc::clone(&channel_slot);
            let events = data_events.clone();
            Box::pin(async move {
                info!("data channel opened by remote peer: {}", channel.label());

                let message_events = events.clone();
                channel.on_message(Box::new(move |msg: DataChannelMessage| {
                    let events = message_events.clone();
                    Box::pin(async move {
                        let _ = events.send(PeerEvent::Data(msg.data.to_vec()));
                    })
                }));

                *channel_slot.write().await = Some(channel);
            })
        }));

        Ok(Self {
            connection_id,
            peer_connection,
            data_channel,
        })
    }

    /// Get the connection ID
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }
}

#[async_trait]
impl PeerEndpoint for PeerConnection {
    async fn set_remote_offer(&self, sdp: &str) -> Result<()> {
        debug!("Setting remote offer on connection {}", self.connection_id);

        let offer = RTCSessionDescription::offer(sdp.to_string())
            .map_err(|e| Error::Negotiation(format!("Invalid remote offer: {e}")))?;

        self.peer_connection
            .set_remote_description(offer)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to set remote offer: {e}")))
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to create answer: {e}")))?;

        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to set local answer: {e}")))?;

        let local = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| Error::Negotiation("local description missing after answer".to_string()))?;

        debug!("Created answer on connection {}", self.connection_id);

        Ok(local.sdp)
    }

    async fn add_remote_candidate(&self, candidate: &IceCandidateRecord) -> Result<()> {
        debug!(
            "Adding remote candidate on connection {}: {}",
            self.connection_id, candidate.candidate
        );

        self.peer_connection
            .add_ice_candidate(candidate.to_rtc())
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to add remote candidate: {e}")))
    }

    async fn send(&self, payload: &[u8]) -> Result<()> {
        let guard = self.data_channel.read().await;
        let channel = guard
            .as_ref()
            .ok_or_else(|| Error::DataChannel("data channel is not open".to_string()))?;

        channel
            .send(&Bytes::copy_from_slice(payload))
            .await
            .map(|_| ())
            .map_err(|e| Error::DataChannel(format!("Failed to send payload: {e}")))
    }

    async fn close(&self) -> Result<()> {
        info!("Closing peer connection {}", self.connection_id);

        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to close connection: {e}")))
    }
}

/// Production factory creating [`PeerConnection`]s from the transport config
pub struct WebRtcPeerFactory {
    config: TransportConfig,
}

impl WebRtcPeerFactory {
    /// Create a factory bound to the given configuration
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PeerFactory for WebRtcPeerFactory {
    async fn create(
        &self,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerEndpoint>> {
        let connection = PeerConnection::new(&self.config, events).await?;
        Ok(Arc::new(connection))
    }
}
