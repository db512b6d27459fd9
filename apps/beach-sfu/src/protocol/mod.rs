//! Signaling vocabulary shared with the SFU.
//!
//! Every frame on the signaling channel is a JSON-RPC 2.0 envelope. The client
//! sends `join` and `answer` requests and `trickle` notifications; the server
//! sends `offer` requests, `trickle` notifications and responses to our
//! requests. [`wire`] turns these into bytes and back.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod wire;

pub use wire::{decode, encode};

pub const METHOD_JOIN: &str = "join";
pub const METHOD_ANSWER: &str = "answer";
pub const METHOD_OFFER: &str = "offer";
pub const METHOD_TRICKLE: &str = "trickle";

pub(crate) const KNOWN_METHODS: [&str; 4] =
    [METHOD_JOIN, METHOD_ANSWER, METHOD_OFFER, METHOD_TRICKLE];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl SdpType {
    pub fn as_str(self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
        }
    }
}

/// One side of a negotiation round: `{"type": "offer"|"answer", "sdp": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescriptor {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Candidate attributes in `RTCIceCandidateInit` form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateInit {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// A candidate plus the transport it belongs to. `target` selects the
/// publisher (0) or subscriber (1) peer connection on the SFU side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateRecord {
    pub target: u32,
    pub candidate: CandidateInit,
}

impl IceCandidateRecord {
    pub fn new(target: u32, candidate: CandidateInit) -> Self {
        Self { target, candidate }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinParams {
    pub sid: String,
    pub offer: SessionDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerParams {
    pub sid: String,
    pub answer: SessionDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    Result(Value),
    Error(RpcError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignalingMessage {
    /// Client request publishing the local offer.
    Join { id: u64, params: JoinParams },
    /// Client request answering a server-initiated offer.
    Answer { id: u64, params: AnswerParams },
    /// Server request carrying a renegotiation offer.
    Offer { id: u64, offer: SessionDescriptor },
    /// Notification in either direction; never carries an id.
    Trickle(IceCandidateRecord),
    /// Reply to one of our requests.
    Response { id: u64, outcome: ResponseOutcome },
}

impl SignalingMessage {
    pub fn method(&self) -> Option<&'static str> {
        match self {
            SignalingMessage::Join { .. } => Some(METHOD_JOIN),
            SignalingMessage::Answer { .. } => Some(METHOD_ANSWER),
            SignalingMessage::Offer { .. } => Some(METHOD_OFFER),
            SignalingMessage::Trickle(_) => Some(METHOD_TRICKLE),
            SignalingMessage::Response { .. } => None,
        }
    }

    pub fn id(&self) -> Option<u64> {
        match self {
            SignalingMessage::Join { id, .. }
            | SignalingMessage::Answer { id, .. }
            | SignalingMessage::Offer { id, .. }
            | SignalingMessage::Response { id, .. } => Some(*id),
            SignalingMessage::Trickle(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn candidate_uses_browser_field_names() {
        let candidate = CandidateInit {
            candidate: "candidate:1 1 udp 2130706431 10.0.0.2 50000 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        };
        let value = serde_json::to_value(&candidate).unwrap();
        assert_eq!(
            value,
            json!({
                "candidate": "candidate:1 1 udp 2130706431 10.0.0.2 50000 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0
            })
        );
    }

    #[test]
    fn candidate_accepts_null_optionals() {
        let parsed: CandidateInit = serde_json::from_value(json!({
            "candidate": "candidate:2 1 tcp 1 10.0.0.3 9 typ host",
            "sdpMid": null,
            "sdpMLineIndex": null,
            "usernameFragment": null
        }))
        .unwrap();
        assert_eq!(parsed.sdp_mid, None);
        assert_eq!(parsed.sdp_mline_index, None);
    }

    #[test]
    fn descriptor_rejects_unsupported_sdp_type() {
        let result =
            serde_json::from_value::<SessionDescriptor>(json!({"type": "rollback", "sdp": ""}));
        assert!(result.is_err());
    }
}
