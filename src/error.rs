//! Error types for the Presence WebRTC transport

/// Result type alias using the transport Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in signaling and pose-streaming operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling transport failure (connect/auth) — recoverable by user action
    #[error("Transport error: {0}")]
    Transport(String),

    /// The signaling peer returned an error payload or violated the protocol
    #[error("Signaling protocol error: {0}")]
    SignalingProtocol(String),

    /// The signaling server had no pending offer for the channel.
    ///
    /// This indicates the remote peer's invariant was broken and the
    /// session cannot be recovered by retrying locally.
    #[error("No pending offer for channel: {0}")]
    MissingOffer(String),

    /// An inbound candidate payload could not be parsed
    #[error("Malformed candidate: {0}")]
    MalformedCandidate(String),

    /// The peer-connection primitive rejected a negotiation step
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// Numeric guard failure while rounding a pose sample
    #[error("Rounding fault: {0}")]
    RoundingFault(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Data channel error
    #[error("Data channel error: {0}")]
    DataChannel(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error ends the session for good (no retry permitted)
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::MissingOffer(_))
    }

    /// Check if this error is contained to a single message or sample
    ///
    /// Contained errors are dropped with the offending payload and never
    /// alter the session state.
    pub fn is_contained(&self) -> bool {
        matches!(self, Error::MalformedCandidate(_) | Error::RoundingFault(_))
    }
}
