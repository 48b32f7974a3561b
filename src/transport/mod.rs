//! Transport facade

pub mod transport;

pub use transport::PoseTransport;
