//! # Presence WebRTC Transport
//!
//! Signaling handshake and pose-streaming transport for a shared-scene AR
//! client. One peer renders content whose pose follows a face tracked by the
//! other peer; this crate carries the pose stream between them.
//!
//! The crate owns the answerer side of an asymmetric WebRTC handshake over a
//! channel-oriented pub/sub broker, and a fixed-precision codec for the 6-DOF
//! pose samples that flow over the resulting data channel.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    PoseTransport                     │
//! │        (commands, state watch, error stream)         │
//! └──────────────┬───────────────────────────────────────┘
//!                │ SessionEvent (single mpsc)
//! ┌──────────────▼───────────────────────────────────────┐
//! │              Negotiator control task                 │
//! │   state machine · identity · candidate exchange      │
//! └───┬──────────────────────────────────────────────┬───┘
//!     │                                              │
//! ┌───▼────────────────────┐          ┌──────────────▼───┐
//! │    SignalingClient     │          │  PeerConnection  │
//! │ PubSubSocket (ws/json) │          │    (webrtc-rs)   │
//! └────────────────────────┘          └──────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use presence_webrtc::{PoseTransport, RawPose, TransportConfig};
//!
//! #[tokio::main]
//! async fn main() -> presence_webrtc::Result<()> {
//!     let mut config = TransportConfig::default();
//!     config.channel_id = "ALPHA".to_string();
//!
//!     let transport = PoseTransport::new(config).await?;
//!     transport.start().await?;
//!
//!     // once the state watch reports ReadyToConnect:
//!     transport.start_session()?;
//!
//!     // once Connected, stream poses:
//!     transport.send_pose(RawPose {
//!         x: 0.1, y: 0.2, z: 0.3,
//!         rx: 0.0, ry: 0.0, rz: 0.0,
//!     })?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod peer;
pub mod pose;
pub mod session;
pub mod signaling;
pub mod transport;

pub use config::{TransportConfig, TurnServerConfig};
pub use error::{Error, Result};
pub use pose::{Fixed5, PoseSample, RawPose};
pub use session::NegotiationState;
pub use transport::PoseTransport;

/// Crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
