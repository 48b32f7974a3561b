//! WebRTC peer connection layer
//!
//! Answerer-side wrapper over the peer-connection primitive, plus the trait
//! seams the negotiation logic is tested against.

pub mod connection;

pub use connection::{
    IceState, PeerConnection, PeerEndpoint, PeerEvent, PeerFactory, WebRtcPeerFactory,
};
