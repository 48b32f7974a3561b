//! Signaling wire types
//!
//! Payloads exchanged with the pub/sub broker. Field names follow the
//! broker's JavaScript conventions (`channelId`, `sdpMLineIndex`, `sdpMid`),
//! so several fields carry serde renames.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

/// Prefix of the per-session channel the answer is published to
pub const ANSWER_CHANNEL_PREFIX: &str = "answer";

/// Prefix of the per-session channel candidates flow over
pub const CANDIDATE_CHANNEL_PREFIX: &str = "icecandidate";

/// Acknowledged emit event that retrieves the pending offer
pub const SIGNAL_EVENT: &str = "signal";

/// Request payload for the offer-retrieval emit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalRequest {
    /// Session identity whose pending offer is requested
    #[serde(rename = "channelId")]
    pub channel_id: String,
}

/// SDP description type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// Remote-originated offer
    Offer,
    /// Locally created answer
    Answer,
}

/// An SDP description as carried on the signaling plane
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionDescriptionRecord {
    /// Raw SDP text
    pub sdp: String,

    /// Whether this is an offer or an answer
    #[serde(rename = "type")]
    pub kind: SdpKind,
}

/// Successful ack payload of the offer-retrieval emit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalResponse {
    /// The remote peer's pending offer
    pub offer: SessionDescriptionRecord,
}

/// Envelope published to the answer channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerEnvelope {
    /// The locally created answer
    pub answer: SessionDescriptionRecord,
}

/// Envelope carried on the candidate channel, both directions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateEnvelope {
    /// The trickled candidate
    pub candidate: IceCandidateRecord,
}

/// An ICE candidate as carried on the signaling plane
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IceCandidateRecord {
    /// Candidate attribute line
    pub candidate: String,

    /// Media line index the candidate belongs to
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: u16,

    /// Media stream identification tag, if the sender provided one
    #[serde(rename = "sdpMid", skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
}

impl IceCandidateRecord {
    /// Parse an inbound candidate-channel payload
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedCandidate`] if the payload is not a
    /// well-formed candidate envelope. The caller drops the payload; a bad
    /// candidate from the remote peer never disturbs the session.
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self> {
        let envelope: CandidateEnvelope = serde_json::from_value(payload.clone())
            .map_err(|e| Error::MalformedCandidate(format!("invalid candidate payload: {e}")))?;
        Ok(envelope.candidate)
    }

    /// Build a record from a locally gathered candidate
    pub fn from_rtc(init: &RTCIceCandidateInit) -> Result<Self> {
        let sdp_mline_index = init.sdp_mline_index.ok_or_else(|| {
            Error::MalformedCandidate("local candidate missing media line index".to_string())
        })?;

        Ok(Self {
            candidate: init.candidate.clone(),
            sdp_mline_index,
            sdp_mid: init.sdp_mid.clone(),
        })
    }

    /// Convert to the form the peer-connection primitive accepts
    pub fn to_rtc(&self) -> RTCIceCandidateInit {
        RTCIceCandidateInit {
            candidate: self.candidate.clone(),
            sdp_mid: self.sdp_mid.clone(),
            sdp_mline_index: Some(self.sdp_mline_index),
            username_fragment: None,
        }
    }
}

impl SessionDescriptionRecord {
    /// Build an answer record from raw SDP
    pub fn answer(sdp: String) -> Self {
        Self {
            sdp,
            kind: SdpKind::Answer,
        }
    }
}

/// Per-session channel name, `prefix:channel_id`
pub fn scoped_channel(prefix: &str, channel_id: &str) -> String {
    format!("{prefix}:{channel_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_signal_request_field_name() {
        let req = SignalRequest {
            channel_id: "ALPHA".to_string(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json, json!({"channelId": "ALPHA"}));
    }

    #[test]
    fn test_signal_response_parsing() {
        let payload = json!({
            "offer": {"sdp": "v=0\r\no=- ...", "type": "offer"}
        });
        let resp: SignalResponse = serde_json::from_value(payload).unwrap();
        assert_eq!(resp.offer.kind, SdpKind::Offer);
        assert!(resp.offer.sdp.starts_with("v=0"));
    }

    #[test]
    fn test_answer_envelope_serialization() {
        let envelope = AnswerEnvelope {
            answer: SessionDescriptionRecord::answer("v=0\r\n...".to_string()),
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["answer"]["type"], "answer");
        assert_eq!(json["answer"]["sdp"], "v=0\r\n...");
    }

    #[test]
    fn test_candidate_from_payload() {
        let payload = json!({
            "candidate": {
                "candidate": "candidate:1 1 udp 2122260223 10.0.0.2 53421 typ host",
                "sdpMLineIndex": 0,
                "sdpMid": "0"
            }
        });
        let record = IceCandidateRecord::from_payload(&payload).unwrap();
        assert_eq!(record.sdp_mline_index, 0);
        assert_eq!(record.sdp_mid.as_deref(), Some("0"));
    }

    #[test]
    fn test_candidate_without_mid() {
        let payload = json!({
            "candidate": {
                "candidate": "candidate:2 1 udp 1686052607 203.0.113.7 53421 typ srflx",
                "sdpMLineIndex": 1
            }
        });
        let record = IceCandidateRecord::from_payload(&payload).unwrap();
        assert_eq!(record.sdp_mline_index, 1);
        assert!(record.sdp_mid.is_none());
    }

    #[test]
    fn test_malformed_candidate_rejected() {
        let missing_envelope = json!({"sdpMLineIndex": 0});
        assert!(matches!(
            IceCandidateRecord::from_payload(&missing_envelope),
            Err(Error::MalformedCandidate(_))
        ));

        let missing_index = json!({"candidate": {"candidate": "candidate:1 ..."}});
        assert!(matches!(
            IceCandidateRecord::from_payload(&missing_index),
            Err(Error::MalformedCandidate(_))
        ));

        let wrong_type = json!({"candidate": {"candidate": "c", "sdpMLineIndex": "zero"}});
        assert!(matches!(
            IceCandidateRecord::from_payload(&wrong_type),
            Err(Error::MalformedCandidate(_))
        ));
    }

    #[test]
    fn test_candidate_rtc_round_trip() {
        let record = IceCandidateRecord {
            candidate: "candidate:1 1 udp 2122260223 10.0.0.2 53421 typ host".to_string(),
            sdp_mline_index: 0,
            sdp_mid: Some("0".to_string()),
        };
        let init = record.to_rtc();
        assert_eq!(init.sdp_mline_index, Some(0));
        let back = IceCandidateRecord::from_rtc(&init).unwrap();
        assert_eq!(record, back);
    }

    #[test]
    fn test_scoped_channel_names() {
        assert_eq!(scoped_channel(ANSWER_CHANNEL_PREFIX, "ALPHA"), "answer:ALPHA");
        assert_eq!(
            scoped_channel(CANDIDATE_CHANNEL_PREFIX, "ALPHA"),
            "icecandidate:ALPHA"
        );
    }
}
