//! Pose transport facade
//!
//! The surface the UI or orchestrator consumes: wire up the signaling
//! socket, the peer factory and the negotiation control task, then expose
//! commands, the state watch and the error stream.

use crate::config::TransportConfig;
use crate::peer::WebRtcPeerFactory;
use crate::pose::RawPose;
use crate::session::{
    NegotiationState, Negotiator, NegotiatorHandle, SessionCommand, SessionEvent,
};
use crate::signaling::{SignalingClient, WebSocketSocket};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;

/// Signaling handshake and pose-streaming transport
pub struct PoseTransport {
    signaling: Arc<SignalingClient>,
    events: mpsc::UnboundedSender<SessionEvent>,
    state: watch::Receiver<NegotiationState>,
    remote_candidates: watch::Receiver<u32>,
    errors: Option<mpsc::UnboundedReceiver<Error>>,
}

impl PoseTransport {
    /// Build a transport from configuration
    ///
    /// Validates the configuration, wires the production socket and peer
    /// factory to a fresh negotiation control task, and seeds the session
    /// identity from `config.channel_id`. Nothing connects until
    /// [`start`](Self::start) is called.
    pub async fn new(config: TransportConfig) -> Result<Self> {
        config.validate()?;

        let socket = Arc::new(WebSocketSocket::new(&config.signaling_url));
        let signaling = Arc::new(SignalingClient::new(socket));
        let peers = Arc::new(WebRtcPeerFactory::new(config.clone()));

        let NegotiatorHandle {
            events,
            state,
            remote_candidates,
            errors,
        } = Negotiator::spawn(signaling.clone(), peers, Some(&config.channel_id)).await?;

        Ok(Self {
            signaling,
            events,
            state,
            remote_candidates,
            errors: Some(errors),
        })
    }

    /// Connect to the signaling broker
    ///
    /// Authentication runs as part of the connection; the state watch moves
    /// to `ReadyToConnect` once the broker accepts the handshake.
    pub async fn start(&self) -> Result<()> {
        info!("starting pose transport");

        let (socket_tx, mut socket_rx) = mpsc::unbounded_channel();
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(event) = socket_rx.recv().await {
                if events.send(SessionEvent::Socket(event)).is_err() {
                    break;
                }
            }
        });

        self.signaling.connect(socket_tx).await
    }

    /// Replace the session identity
    ///
    /// Rejected by the control task while a negotiation is in flight.
    pub fn set_channel_id(&self, channel_id: &str) -> Result<()> {
        self.send_command(SessionCommand::SetChannelId(channel_id.to_string()))
    }

    /// Begin a connection attempt for the current identity
    pub fn start_session(&self) -> Result<()> {
        self.send_command(SessionCommand::StartSession)
    }

    /// Transmit a pose sample
    ///
    /// Samples are silently discarded while the data channel is not ready;
    /// the latest sample always wins, nothing is buffered.
    pub fn send_pose(&self, pose: RawPose) -> Result<()> {
        self.send_command(SessionCommand::SendPose(pose))
    }

    /// Observe negotiation state transitions
    pub fn state(&self) -> watch::Receiver<NegotiationState> {
        self.state.clone()
    }

    /// Observe how many remote candidates the current attempt has received
    ///
    /// Resets to zero when a new attempt starts.
    pub fn remote_candidates(&self) -> watch::Receiver<u32> {
        self.remote_candidates.clone()
    }

    /// Take the session error stream; yields `None` after the first call
    pub fn errors(&mut self) -> Option<mpsc::UnboundedReceiver<Error>> {
        self.errors.take()
    }

    /// Tear down the peer connection, the signaling socket and the control task
    pub fn shutdown(&self) -> Result<()> {
        self.send_command(SessionCommand::Shutdown)
    }

    fn send_command(&self, command: SessionCommand) -> Result<()> {
        self.events
            .send(SessionEvent::Command(command))
            .map_err(|_| Error::Transport("session control task stopped".to_string()))
    }
}
