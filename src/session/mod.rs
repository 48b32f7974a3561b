//! Session identity and negotiation
//!
//! The negotiation state machine runs on a single control task; socket
//! events, peer-connection callbacks and user commands are all marshaled
//! onto it as [`SessionEvent`]s.

pub mod identity;
pub mod negotiator;

pub use identity::{ChannelIdentity, IdentityManager};
pub use negotiator::{
    NegotiationState, Negotiator, NegotiatorHandle, SessionCommand, SessionEvent,
};
