//! Fixed-precision encoding of 6-DOF pose samples
//!
//! Every field of a pose sample is rounded to exactly 5 fractional decimal
//! digits using round-half-even before transmission, so that the same
//! floating-point input always produces the same wire representation on
//! both ends of the data channel.

use crate::{Error, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Number of scaled units per whole unit (5 fractional digits)
const SCALE: i64 = 100_000;

/// A decimal number with exactly 5 fractional digits
///
/// Stored as a scaled integer; constructed from floating-point input via
/// round-half-even. Rounding is idempotent: re-encoding an already-rounded
/// value yields the same `Fixed5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fixed5(i64);

impl Fixed5 {
    /// Round a raw floating-point value to 5 fractional digits (half-even)
    ///
    /// # Errors
    ///
    /// Returns [`Error::RoundingFault`] if the input is not finite. Pose
    /// fields are never legitimately undefined, so a NaN or infinity here
    /// means an upstream numeric fault (such as a division by zero); the
    /// sample carrying it must be dropped, not the session.
    pub fn from_f32(value: f32) -> Result<Self> {
        Self::from_f64(f64::from(value))
    }

    /// Round a double-precision value to 5 fractional digits (half-even)
    pub fn from_f64(value: f64) -> Result<Self> {
        if !value.is_finite() {
            return Err(Error::RoundingFault(format!(
                "cannot round non-finite value {value}"
            )));
        }

        let scaled = value * SCALE as f64;
        if scaled.abs() >= i64::MAX as f64 {
            return Err(Error::RoundingFault(format!(
                "value {value} out of fixed-point range"
            )));
        }

        Ok(Fixed5(scaled.round_ties_even() as i64))
    }

    /// The underlying scaled integer (units of 10^-5)
    pub fn units(self) -> i64 {
        self.0
    }

    /// Convert back to floating point
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / SCALE as f64
    }
}

impl fmt::Display for Fixed5 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:05}", sign, abs / SCALE as u64, abs % SCALE as u64)
    }
}

impl FromStr for Fixed5 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let value: f64 = s
            .parse()
            .map_err(|e| Error::Serialization(format!("invalid decimal '{s}': {e}")))?;
        // A 5-digit decimal parses to within half a unit of its scaled
        // integer, so half-even rounding recovers it exactly.
        Self::from_f64(value)
    }
}

impl Serialize for Fixed5 {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Fixed5 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// An unrounded 6-DOF pose as supplied by the rendering engine
///
/// Translation in meters, rotation as Euler angles in radians (derived
/// from the content node's world orientation quaternion upstream).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPose {
    /// Translation X
    pub x: f32,
    /// Translation Y
    pub y: f32,
    /// Translation Z
    pub z: f32,
    /// Rotation about X, radians
    pub rx: f32,
    /// Rotation about Y, radians
    pub ry: f32,
    /// Rotation about Z, radians
    pub rz: f32,
}

/// A pose sample rounded for transmission
///
/// Transient: constructed per rendering update, serialized onto the data
/// channel, and discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoseSample {
    /// Translation X
    pub x: Fixed5,
    /// Translation Y
    pub y: Fixed5,
    /// Translation Z
    pub z: Fixed5,
    /// Rotation about X
    pub rx: Fixed5,
    /// Rotation about Y
    pub ry: Fixed5,
    /// Rotation about Z
    pub rz: Fixed5,
}

impl PoseSample {
    /// Round a raw pose to the wire precision
    ///
    /// # Errors
    ///
    /// Returns [`Error::RoundingFault`] if any field is non-finite; the
    /// caller drops the sample and continues.
    pub fn encode(raw: RawPose) -> Result<Self> {
        Ok(Self {
            x: Fixed5::from_f32(raw.x)?,
            y: Fixed5::from_f32(raw.y)?,
            z: Fixed5::from_f32(raw.z)?,
            rx: Fixed5::from_f32(raw.rx)?,
            ry: Fixed5::from_f32(raw.ry)?,
            rz: Fixed5::from_f32(raw.rz)?,
        })
    }

    /// Serialize to the compact ASCII payload sent over the data channel
    ///
    /// Field names are `x, y, z, rx, ry, rz`; each value is a decimal
    /// string with exactly 5 fractional digits.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| Error::Serialization(format!("failed to serialize pose sample: {e}")))
    }

    /// Parse a payload produced by [`PoseSample::serialize`]
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::Serialization(format!("failed to parse pose sample: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounding_half_even() {
        // 0.123455f32 sits just above the decimal tie, so it rounds up
        assert_eq!(Fixed5::from_f32(0.123455).unwrap().to_string(), "0.12346");
        // exact f64 ties resolve to the even neighbor
        assert_eq!(Fixed5::from_f64(0.000015).unwrap().units(), 2);
        assert_eq!(Fixed5::from_f64(0.000025).unwrap().units(), 2);
    }

    #[test]
    fn test_rounding_is_idempotent() {
        for v in [1.234567f32, -0.000001, 0.0, 0.123455, -2.718281, 3.14159] {
            let once = Fixed5::from_f32(v).unwrap();
            let twice = Fixed5::from_f32(once.to_f64() as f32).unwrap();
            assert_eq!(once, twice, "re-rounding {v} changed the value");
        }
    }

    #[test]
    fn test_rounding_is_deterministic() {
        let a = Fixed5::from_f32(0.123455).unwrap();
        let b = Fixed5::from_f32(0.123455).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_non_finite_raises_rounding_fault() {
        assert!(matches!(
            Fixed5::from_f32(f32::NAN),
            Err(Error::RoundingFault(_))
        ));
        assert!(matches!(
            Fixed5::from_f32(f32::INFINITY),
            Err(Error::RoundingFault(_))
        ));
        assert!(matches!(
            Fixed5::from_f32(1.0 / 0.0_f32),
            Err(Error::RoundingFault(_))
        ));
    }

    #[test]
    fn test_display_format() {
        assert_eq!(Fixed5::from_f64(1.23457).unwrap().to_string(), "1.23457");
        assert_eq!(Fixed5::from_f64(-0.5).unwrap().to_string(), "-0.50000");
        assert_eq!(Fixed5::from_f64(0.0).unwrap().to_string(), "0.00000");
        assert_eq!(Fixed5::from_f64(12.0).unwrap().to_string(), "12.00000");
    }

    #[test]
    fn test_negative_zero_normalizes() {
        // -0.000001 rounds to zero scaled units, printed without a sign
        assert_eq!(Fixed5::from_f32(-0.000001).unwrap().to_string(), "0.00000");
    }

    #[test]
    fn test_encode_scenario() {
        let sample = PoseSample::encode(RawPose {
            x: 1.234567,
            y: -0.000001,
            z: 0.0,
            rx: 0.123455,
            ry: 0.0,
            rz: 0.0,
        })
        .unwrap();

        assert_eq!(sample.x.to_string(), "1.23457");
        assert_eq!(sample.y.to_string(), "0.00000");
        assert_eq!(sample.z.to_string(), "0.00000");
        assert_eq!(sample.rx.to_string(), "0.12346");
        assert_eq!(sample.ry.to_string(), "0.00000");
        assert_eq!(sample.rz.to_string(), "0.00000");
    }

    #[test]
    fn test_serialize_field_names_and_ascii() {
        let sample = PoseSample::encode(RawPose {
            x: 0.1,
            y: -0.2,
            z: 0.3,
            rx: 0.4,
            ry: 0.5,
            rz: -0.6,
        })
        .unwrap();

        let bytes = sample.serialize().unwrap();
        assert!(bytes.is_ascii());

        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["x"], "0.10000");
        assert_eq!(json["y"], "-0.20000");
        assert_eq!(json["rz"], "-0.60000");
    }

    #[test]
    fn test_serialize_parse_round_trip() {
        let raw = RawPose {
            x: 1.234567,
            y: -0.000001,
            z: 0.0,
            rx: 0.123455,
            ry: -3.14159,
            rz: 2.71828,
        };
        let sample = PoseSample::encode(raw).unwrap();
        let parsed = PoseSample::parse(&sample.serialize().unwrap()).unwrap();
        assert_eq!(sample, parsed);

        // the parsed values equal the 5-digit rounding of the inputs
        assert_eq!(parsed.x, Fixed5::from_f32(raw.x).unwrap());
        assert_eq!(parsed.rx, Fixed5::from_f32(raw.rx).unwrap());
    }
}
