//! Negotiation state machine
//!
//! A single control task owns all session state. Socket events, peer
//! callbacks and user commands arrive on one mpsc channel; nothing else
//! mutates the session. Each connection attempt is tagged with a generation
//! so events from an abandoned peer connection are discarded instead of
//! corrupting the current attempt.
//!
//! The handshake is asymmetric. This side never creates an offer: it asks
//! the broker for the remote peer's pending offer with an acknowledged
//! `signal` emit, applies it, publishes its answer to `answer:<id>` and then
//! trickles candidates over `icecandidate:<id>`.

use crate::peer::{IceState, PeerEndpoint, PeerEvent, PeerFactory};
use crate::pose::{PoseSample, RawPose};
use crate::session::identity::IdentityManager;
use crate::signaling::protocol::{
    AnswerEnvelope, CandidateEnvelope, IceCandidateRecord, SdpKind, SessionDescriptionRecord,
    SignalRequest, SignalResponse, CANDIDATE_CHANNEL_PREFIX, SIGNAL_EVENT,
};
use crate::signaling::socket::{AckOutcome, SocketEvent};
use crate::signaling::SignalingClient;
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

/// Negotiation state as observed through the state watch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Not connected to the signaling broker
    Idle,
    /// Broker connected, handshake outstanding
    Authenticating,
    /// Authenticated; a session may be started
    ReadyToConnect,
    /// Offer-retrieval emit in flight
    RequestingOffer,
    /// Applying the remote offer
    SettingRemoteOffer,
    /// Synthesizing the local answer
    CreatingAnswer,
    /// Publishing the answer to the answer channel
    PublishingAnswer,
    /// Handshake done; candidates trickling both ways
    ExchangingCandidates,
    /// ICE reported a usable pair; pose transmission enabled
    Connected,
    /// ICE connectivity was lost; a new attempt may be started
    Disconnected,
    /// The attempt failed; retry permitted unless the failure was fatal
    Failed,
}

impl NegotiationState {
    /// A handshake or candidate exchange is currently in flight
    fn is_negotiating(self) -> bool {
        matches!(
            self,
            NegotiationState::RequestingOffer
                | NegotiationState::SettingRemoteOffer
                | NegotiationState::CreatingAnswer
                | NegotiationState::PublishingAnswer
                | NegotiationState::ExchangingCandidates
        )
    }

    /// Local candidates may be published instead of buffered
    fn candidates_flow(self) -> bool {
        matches!(
            self,
            NegotiationState::ExchangingCandidates | NegotiationState::Connected
        )
    }
}

/// User-facing commands marshaled onto the control task
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Begin a connection attempt for the current identity
    StartSession,

    /// Replace the session identity
    SetChannelId(String),

    /// Transmit a pose sample if the channel is ready
    SendPose(RawPose),

    /// Tear everything down and stop the control task
    Shutdown,
}

/// Everything the control task reacts to
#[derive(Debug)]
pub enum SessionEvent {
    /// An event from the signaling socket
    Socket(SocketEvent),

    /// A user command
    Command(SessionCommand),

    /// A peer-connection callback, tagged with its attempt generation
    Peer {
        /// Attempt the event belongs to
        generation: u64,
        /// The callback payload
        event: PeerEvent,
    },

    /// Resolution of the offer-retrieval emit
    OfferAck {
        /// Attempt the emit belonged to
        generation: u64,
        /// The broker's acknowledgement, or the transport failure
        outcome: Result<AckOutcome>,
    },
}

/// Mutable session state; touched only by the control task
struct SignalingSession {
    state: NegotiationState,
    remote_candidates: u32,
    channel_ready: bool,
    fatal: bool,
    generation: u64,
    pending_local: Vec<IceCandidateRecord>,
}

impl SignalingSession {
    fn new() -> Self {
        Self {
            state: NegotiationState::Idle,
            remote_candidates: 0,
            channel_ready: false,
            fatal: false,
            generation: 0,
            pending_local: Vec::new(),
        }
    }
}

/// Handle returned by [`Negotiator::spawn`]
pub struct NegotiatorHandle {
    /// Feed events and commands to the control task
    pub events: mpsc::UnboundedSender<SessionEvent>,

    /// Observe state transitions
    pub state: watch::Receiver<NegotiationState>,

    /// Observe the count of remote candidates received this attempt
    pub remote_candidates: watch::Receiver<u32>,

    /// Session-level errors, surfaced rather than swallowed
    pub errors: mpsc::UnboundedReceiver<Error>,
}

/// The negotiation control task
pub struct Negotiator {
    signaling: Arc<SignalingClient>,
    peers: Arc<dyn PeerFactory>,
    identity: IdentityManager,
    session: SignalingSession,
    peer: Option<Arc<dyn PeerEndpoint>>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    state_tx: watch::Sender<NegotiationState>,
    candidates_tx: watch::Sender<u32>,
    errors_tx: mpsc::UnboundedSender<Error>,
}

impl Negotiator {
    /// Spawn the control task
    ///
    /// `initial_channel_id`, when set, seeds the identity so a session can
    /// be started as soon as authentication succeeds.
    pub async fn spawn(
        signaling: Arc<SignalingClient>,
        peers: Arc<dyn PeerFactory>,
        initial_channel_id: Option<&str>,
    ) -> Result<NegotiatorHandle> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(NegotiationState::Idle);
        let (candidates_tx, candidates_rx) = watch::channel(0);
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();

        let mut identity = IdentityManager::new(signaling.clone());
        if let Some(id) = initial_channel_id {
            identity.set(id).await?;
        }

        let negotiator = Self {
            signaling,
            peers,
            identity,
            session: SignalingSession::new(),
            peer: None,
            events_tx: events_tx.clone(),
            state_tx,
            candidates_tx,
            errors_tx,
        };

        tokio::spawn(negotiator.run(events_rx));

        Ok(NegotiatorHandle {
            events: events_tx,
            state: state_rx,
            remote_candidates: candidates_rx,
            errors: errors_rx,
        })
    }

    async fn run(mut self, mut events_rx: mpsc::UnboundedReceiver<SessionEvent>) {
        while let Some(event) = events_rx.recv().await {
            match event {
                SessionEvent::Socket(event) => self.handle_socket(event).await,
                SessionEvent::Command(command) => {
                    if self.handle_command(command).await {
                        break;
                    }
                }
                SessionEvent::Peer { generation, event } => {
                    self.handle_peer(generation, event).await
                }
                SessionEvent::OfferAck {
                    generation,
                    outcome,
                } => self.handle_offer_ack(generation, outcome).await,
            }
        }

        debug!("control task terminated");
    }

    fn set_state(&mut self, new_state: NegotiationState) {
        let old_state = self.session.state;
        if old_state != new_state {
            debug!("state transition: {:?} -> {:?}", old_state, new_state);
            self.session.state = new_state;
            self.state_tx.send_replace(new_state);
        }
    }

    /// Enter `Failed`, surface the error, and latch the fatal flag when the
    /// failure permits no retry
    fn fail(&mut self, error: Error) {
        warn!("session failed: {}", error);
        self.session.channel_ready = false;
        if error.is_fatal() {
            self.session.fatal = true;
        }
        let _ = self.errors_tx.send(error);
        self.set_state(NegotiationState::Failed);
    }

    fn surface(&self, error: Error) {
        warn!("{}", error);
        let _ = self.errors_tx.send(error);
    }

    async fn handle_socket(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Connected => {
                if self.session.state == NegotiationState::Idle {
                    self.set_state(NegotiationState::Authenticating);
                }
            }
            SocketEvent::ConnectError(message) => {
                self.fail(Error::Transport(message));
            }
            SocketEvent::Disconnected => {
                // Losing the broker mid-handshake dooms the attempt; once
                // candidates have flowed the peer link stands on its own.
                if self.session.state.is_negotiating()
                    && self.session.state != NegotiationState::ExchangingCandidates
                {
                    self.fail(Error::Transport("signaling connection lost".to_string()));
                } else {
                    self.surface(Error::Transport("signaling connection lost".to_string()));
                }
            }
            SocketEvent::TokenIssued(token) => {
                debug!("auth token {}", if token.is_some() { "issued" } else { "cleared" });
            }
            SocketEvent::Authenticated(true) => {
                info!("signaling authentication succeeded");
                if matches!(
                    self.session.state,
                    NegotiationState::Idle | NegotiationState::Authenticating
                ) {
                    self.set_state(NegotiationState::ReadyToConnect);
                }
            }
            SocketEvent::Authenticated(false) => {
                self.fail(Error::Transport(
                    "signaling authentication rejected".to_string(),
                ));
            }
            SocketEvent::ChannelMessage { channel, payload } => {
                if channel.starts_with(CANDIDATE_CHANNEL_PREFIX) {
                    self.handle_remote_candidate(&payload).await;
                } else {
                    trace!("ignoring message on channel {}", channel);
                }
            }
        }
    }

    /// Apply a candidate trickled by the remote peer
    ///
    /// Malformed payloads are dropped without touching the counter or the
    /// session state. Candidates arrive in any order and may repeat; the
    /// peer primitive tolerates both.
    async fn handle_remote_candidate(&mut self, payload: &serde_json::Value) {
        let record = match IceCandidateRecord::from_payload(payload) {
            Ok(record) => record,
            Err(e) => {
                warn!("dropping candidate: {}", e);
                return;
            }
        };

        let Some(peer) = self.peer.clone() else {
            warn!("dropping candidate, no connection attempt in progress");
            return;
        };

        self.session.remote_candidates += 1;
        self.candidates_tx.send_replace(self.session.remote_candidates);
        debug!(
            "applying remote candidate #{}: {}",
            self.session.remote_candidates, record.candidate
        );

        if let Err(e) = peer.add_remote_candidate(&record).await {
            warn!("peer rejected remote candidate: {}", e);
        }
    }

    /// Returns true when the control task should stop
    async fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::StartSession => {
                self.start_session().await;
                false
            }
            SessionCommand::SetChannelId(id) => {
                if self.session.state.is_negotiating() {
                    self.surface(Error::Negotiation(
                        "cannot change channel id during negotiation".to_string(),
                    ));
                } else if let Err(e) = self.identity.set(&id).await {
                    self.surface(e);
                }
                false
            }
            SessionCommand::SendPose(raw) => {
                self.send_pose(raw).await;
                false
            }
            SessionCommand::Shutdown => {
                info!("shutting down session");
                if let Some(peer) = self.peer.take() {
                    if let Err(e) = peer.close().await {
                        warn!("failed to close peer connection: {}", e);
                    }
                }
                if let Err(e) = self.signaling.disconnect().await {
                    warn!("failed to disconnect signaling: {}", e);
                }
                self.set_state(NegotiationState::Idle);
                true
            }
        }
    }

    /// Begin a connection attempt for the current identity
    ///
    /// Permitted from `ReadyToConnect`, `Disconnected`, and a non-fatal
    /// `Failed`. At most one attempt is in flight; starting again while one
    /// is running is ignored.
    async fn start_session(&mut self) {
        let allowed = matches!(
            self.session.state,
            NegotiationState::ReadyToConnect | NegotiationState::Disconnected
        ) || (self.session.state == NegotiationState::Failed && !self.session.fatal);

        if !allowed {
            if self.session.state == NegotiationState::Failed && self.session.fatal {
                self.surface(Error::Negotiation(
                    "session cannot be restarted after a fatal failure".to_string(),
                ));
            } else {
                debug!(
                    "start ignored in state {:?}",
                    self.session.state
                );
            }
            return;
        }

        let Some(identity) = self.identity.current().cloned() else {
            self.surface(Error::InvalidConfig("no channel id set".to_string()));
            return;
        };

        // Abandon any previous attempt before starting a fresh one.
        if let Some(peer) = self.peer.take() {
            if let Err(e) = peer.close().await {
                warn!("failed to close previous peer connection: {}", e);
            }
        }

        self.session.generation += 1;
        self.session.remote_candidates = 0;
        self.candidates_tx.send_replace(0);
        self.session.channel_ready = false;
        self.session.pending_local.clear();
        let generation = self.session.generation;

        info!(
            "starting session for channel {} (attempt {})",
            identity.id(),
            generation
        );

        // Peer callbacks are forwarded onto the control task tagged with
        // this attempt's generation; events from closed attempts are stale.
        let (peer_tx, mut peer_rx) = mpsc::unbounded_channel();
        let forward = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = peer_rx.recv().await {
                if forward
                    .send(SessionEvent::Peer { generation, event })
                    .is_err()
                {
                    break;
                }
            }
        });

        let peer = match self.peers.create(peer_tx).await {
            Ok(peer) => peer,
            Err(e) => {
                self.fail(e);
                return;
            }
        };
        self.peer = Some(peer);

        if let Err(e) = self.signaling.subscribe(&identity.candidate_channel()).await {
            self.fail(e);
            return;
        }

        self.set_state(NegotiationState::RequestingOffer);

        let payload = match serde_json::to_value(SignalRequest {
            channel_id: identity.id().to_string(),
        }) {
            Ok(payload) => payload,
            Err(e) => {
                self.fail(Error::Serialization(e.to_string()));
                return;
            }
        };

        // The emit suspends at the ack boundary; its resolution is marshaled
        // back onto the control task as an OfferAck event.
        let signaling = self.signaling.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let outcome = signaling.emit_ack(SIGNAL_EVENT, payload).await;
            let _ = events.send(SessionEvent::OfferAck {
                generation,
                outcome,
            });
        });
    }

    async fn handle_offer_ack(&mut self, generation: u64, outcome: Result<AckOutcome>) {
        if generation != self.session.generation {
            debug!("discarding offer ack from stale attempt {}", generation);
            return;
        }
        if self.session.state != NegotiationState::RequestingOffer {
            debug!(
                "discarding offer ack in state {:?}",
                self.session.state
            );
            return;
        }

        let response = match outcome {
            Err(e) => {
                self.fail(e);
                return;
            }
            Ok(AckOutcome::Error(err)) => {
                self.fail(Error::SignalingProtocol(format!(
                    "offer request rejected: {err}"
                )));
                return;
            }
            Ok(AckOutcome::Missing) => {
                // The broker is expected to always hold a pending offer;
                // its absence cannot be recovered by retrying locally.
                let channel = self
                    .identity
                    .current()
                    .map(|i| i.id().to_string())
                    .unwrap_or_default();
                self.fail(Error::MissingOffer(channel));
                return;
            }
            Ok(AckOutcome::Response(data)) => data,
        };

        let response: SignalResponse = match serde_json::from_value(response) {
            Ok(response) => response,
            Err(e) => {
                self.fail(Error::SignalingProtocol(format!(
                    "malformed offer response: {e}"
                )));
                return;
            }
        };

        if response.offer.kind != SdpKind::Offer {
            self.fail(Error::SignalingProtocol(
                "signal response did not carry an offer".to_string(),
            ));
            return;
        }

        self.complete_handshake(response.offer.sdp).await;
    }

    /// Drive the attempt from a retrieved offer through to candidate exchange
    async fn complete_handshake(&mut self, offer_sdp: String) {
        let Some(peer) = self.peer.clone() else {
            self.fail(Error::Negotiation(
                "no peer connection for handshake".to_string(),
            ));
            return;
        };
        let Some(identity) = self.identity.current().cloned() else {
            self.fail(Error::InvalidConfig("no channel id set".to_string()));
            return;
        };

        self.set_state(NegotiationState::SettingRemoteOffer);
        if let Err(e) = peer.set_remote_offer(&offer_sdp).await {
            self.fail(e);
            return;
        }

        self.set_state(NegotiationState::CreatingAnswer);
        let answer_sdp = match peer.create_answer().await {
            Ok(sdp) => sdp,
            Err(e) => {
                self.fail(e);
                return;
            }
        };

        self.set_state(NegotiationState::PublishingAnswer);
        let envelope = AnswerEnvelope {
            answer: SessionDescriptionRecord::answer(answer_sdp),
        };
        let payload = match serde_json::to_value(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                self.fail(Error::Serialization(e.to_string()));
                return;
            }
        };
        if let Err(e) = self.signaling.publish(&identity.answer_channel(), payload).await {
            self.fail(e);
            return;
        }

        info!("answer published to {}", identity.answer_channel());
        self.set_state(NegotiationState::ExchangingCandidates);

        // Candidates gathered while the channel name was still unusable.
        let buffered = std::mem::take(&mut self.session.pending_local);
        for record in buffered {
            self.publish_local_candidate(record).await;
        }
    }

    async fn publish_local_candidate(&mut self, record: IceCandidateRecord) {
        let Some(identity) = self.identity.current() else {
            return;
        };
        let channel = identity.candidate_channel();

        let payload = match serde_json::to_value(CandidateEnvelope { candidate: record }) {
            Ok(payload) => payload,
            Err(e) => {
                self.surface(Error::Serialization(e.to_string()));
                return;
            }
        };

        if let Err(e) = self.signaling.publish(&channel, payload).await {
            self.surface(e);
        }
    }

    async fn handle_peer(&mut self, generation: u64, event: PeerEvent) {
        if generation != self.session.generation {
            debug!("discarding peer event from stale attempt {}", generation);
            return;
        }

        match event {
            PeerEvent::LocalCandidate(record) => {
                if self.session.state.candidates_flow() {
                    self.publish_local_candidate(record).await;
                } else {
                    debug!("buffering local candidate until answer is published");
                    self.session.pending_local.push(record);
                }
            }
            PeerEvent::StateChanged(ice) => self.handle_ice_state(ice),
            PeerEvent::Data(bytes) => {
                debug!("received {} bytes on data channel", bytes.len());
            }
        }
    }

    fn handle_ice_state(&mut self, ice: IceState) {
        debug!("ICE state: {:?}", ice);
        match ice {
            IceState::Connected | IceState::Completed => {
                self.session.channel_ready = true;
                self.set_state(NegotiationState::Connected);
            }
            IceState::Disconnected => {
                self.session.channel_ready = false;
                self.set_state(NegotiationState::Disconnected);
            }
            IceState::Failed => {
                self.fail(Error::Negotiation("ICE connection failed".to_string()));
            }
            IceState::Closed => {
                self.session.channel_ready = false;
            }
            IceState::New | IceState::Checking => {}
        }
    }

    /// Transmit a pose sample; silently discarded unless channel-ready
    async fn send_pose(&mut self, raw: RawPose) {
        if !self.session.channel_ready {
            trace!("discarding pose sample, channel not ready");
            return;
        }
        let Some(peer) = self.peer.clone() else {
            trace!("discarding pose sample, no peer connection");
            return;
        };

        let sample = match PoseSample::encode(raw) {
            Ok(sample) => sample,
            Err(e) => {
                warn!("dropping pose sample: {}", e);
                return;
            }
        };
        let payload = match sample.serialize() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("dropping pose sample: {}", e);
                return;
            }
        };

        if let Err(e) = peer.send(&payload).await {
            warn!("failed to send pose sample: {}", e);
        }
    }
}
