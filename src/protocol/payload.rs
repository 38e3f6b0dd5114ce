//! Payload bodies carried inside signaling envelopes
//!
//! Field names are camelCase on the wire to match browser clients.

use serde::{Deserialize, Serialize};

use super::ids::{ConnectionId, SessionId};

/// Session-scoped request (`admin-join`, `viewer-join`, `admin-stream-start`,
/// `admin-stream-stop`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    pub session_id: SessionId,
    /// Credential checked by the authorization gate for admin requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl SessionPayload {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Session lifecycle event sent by the hub
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    pub session_id: SessionId,
}

/// Session description exchange (`offer`, `answer`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdpPayload {
    pub sdp: String,
    /// Viewer the description belongs to. Filled in by the hub for offers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewer_id: Option<ConnectionId>,
}

/// One network-path candidate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }
}

/// Candidate trickle (`ice-candidate`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IcePayload {
    pub candidate: IceCandidate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewer_id: Option<ConnectionId>,
    #[serde(default)]
    pub from_broadcaster: bool,
}

/// Viewer membership event (`viewer-joined`, `viewer-left`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerPayload {
    pub viewer_id: ConnectionId,
}

/// Refused viewer join (`session-inactive`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    pub session_id: SessionId,
    pub reason: String,
}

/// Request-level failure reported back to the sender (`error`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ice_candidate_field_names() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 UDP 2122252543 10.0.0.2 54321 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        };
        let json = serde_json::to_value(&candidate).unwrap();

        assert_eq!(json["sdpMid"], "0");
        assert_eq!(json["sdpMLineIndex"], 0);
    }

    #[test]
    fn test_session_payload_token_optional() {
        let payload: SessionPayload = serde_json::from_str(r#"{"sessionId":"s1"}"#).unwrap();
        assert_eq!(payload.session_id, SessionId::new("s1"));
        assert!(payload.token.is_none());

        let json = serde_json::to_string(&SessionPayload::new("s1".into())).unwrap();
        assert!(!json.contains("token"));
    }

    #[test]
    fn test_ice_payload_defaults() {
        let payload: IcePayload =
            serde_json::from_str(r#"{"candidate":{"candidate":"c1"}}"#).unwrap();
        assert!(!payload.from_broadcaster);
        assert!(payload.viewer_id.is_none());
    }
}
