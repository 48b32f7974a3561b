//! Pub/sub signaling for the offer/answer handshake
//!
//! The signaling plane is a channel-oriented pub/sub broker reached over a
//! WebSocket. The handshake is asymmetric: this side never creates an offer.
//! It retrieves the remote peer's pending offer with an acknowledged emit,
//! publishes its answer to a per-session answer channel, and trickles ICE
//! candidates both ways over a per-session candidate channel.

pub mod client;
pub mod protocol;
pub mod socket;

pub use client::SignalingClient;
pub use protocol::{
    AnswerEnvelope, CandidateEnvelope, IceCandidateRecord, SdpKind, SessionDescriptionRecord,
    SignalRequest, SignalResponse, ANSWER_CHANNEL_PREFIX, CANDIDATE_CHANNEL_PREFIX, SIGNAL_EVENT,
};
pub use socket::{AckOutcome, PubSubSocket, SocketEvent, WebSocketSocket};
