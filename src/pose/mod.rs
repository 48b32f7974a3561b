//! Fixed-precision pose codec
//!
//! Encodes 6-DOF pose samples from the rendering engine into the exact
//! 5-fractional-digit decimal representation the remote peer expects.

pub mod codec;

pub use codec::{Fixed5, PoseSample, RawPose};
