//! Signaling envelope
//!
//! Every message exchanged with the hub is one envelope:
//!
//! ```text
//! {"type": "offer", "payload": {"sdp": "..."}, "senderRole": "viewer", "targetId": 4}
//! ```
//!
//! `type` selects the [`Signal`] variant and `payload` is its body.
//! `senderRole` is advisory when sent by a client; the hub overwrites it with
//! the role it registered for the connection before forwarding. `targetId`
//! names the viewer connection a broadcaster-originated message is meant for.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::{ConnectionId, Role, SessionId};
use super::payload::{
    ErrorPayload, IceCandidate, IcePayload, Rejection, SdpPayload, SessionEvent, SessionPayload,
    ViewerPayload,
};
use crate::error::{Error, Result};

/// Typed message body, selected by the envelope `type`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum Signal {
    // Client to hub
    AdminJoin(SessionPayload),
    ViewerJoin(SessionPayload),
    AdminStreamStart(SessionPayload),
    AdminStreamStop(SessionPayload),

    // Relayed in both directions
    Offer(SdpPayload),
    Answer(SdpPayload),
    IceCandidate(IcePayload),

    // Hub to client
    AdminJoined(SessionEvent),
    ViewerJoined(ViewerPayload),
    ViewerJoinedStream(SessionEvent),
    ViewerLeft(ViewerPayload),
    StreamStarted(SessionEvent),
    StreamStopped(SessionEvent),
    SessionInactive(Rejection),
    Superseded(SessionEvent),
    Error(ErrorPayload),
}

impl Signal {
    /// Wire name of this message type
    pub fn kind(&self) -> &'static str {
        match self {
            Signal::AdminJoin(_) => "admin-join",
            Signal::ViewerJoin(_) => "viewer-join",
            Signal::AdminStreamStart(_) => "admin-stream-start",
            Signal::AdminStreamStop(_) => "admin-stream-stop",
            Signal::Offer(_) => "offer",
            Signal::Answer(_) => "answer",
            Signal::IceCandidate(_) => "ice-candidate",
            Signal::AdminJoined(_) => "admin-joined",
            Signal::ViewerJoined(_) => "viewer-joined",
            Signal::ViewerJoinedStream(_) => "viewer-joined-stream",
            Signal::ViewerLeft(_) => "viewer-left",
            Signal::StreamStarted(_) => "stream-started",
            Signal::StreamStopped(_) => "stream-stopped",
            Signal::SessionInactive(_) => "session-inactive",
            Signal::Superseded(_) => "superseded",
            Signal::Error(_) => "error",
        }
    }

    /// Whether the hub routes this message peer-to-peer instead of acting on it
    pub fn is_relayed(&self) -> bool {
        matches!(
            self,
            Signal::Offer(_) | Signal::Answer(_) | Signal::IceCandidate(_)
        )
    }

    pub fn stream_started(session_id: SessionId) -> Self {
        Signal::StreamStarted(SessionEvent { session_id })
    }

    pub fn stream_stopped(session_id: SessionId) -> Self {
        Signal::StreamStopped(SessionEvent { session_id })
    }

    pub fn viewer_joined(viewer_id: ConnectionId) -> Self {
        Signal::ViewerJoined(ViewerPayload { viewer_id })
    }

    pub fn viewer_left(viewer_id: ConnectionId) -> Self {
        Signal::ViewerLeft(ViewerPayload { viewer_id })
    }

    pub fn offer(sdp: impl Into<String>) -> Self {
        Signal::Offer(SdpPayload {
            sdp: sdp.into(),
            viewer_id: None,
        })
    }

    pub fn answer(sdp: impl Into<String>, viewer_id: ConnectionId) -> Self {
        Signal::Answer(SdpPayload {
            sdp: sdp.into(),
            viewer_id: Some(viewer_id),
        })
    }

    pub fn ice(candidate: IceCandidate, viewer_id: Option<ConnectionId>, from_broadcaster: bool) -> Self {
        Signal::IceCandidate(IcePayload {
            candidate,
            viewer_id,
            from_broadcaster,
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Signal::Error(ErrorPayload {
            message: message.into(),
        })
    }

    fn payload_value(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => map.remove("payload").unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }
}

/// Immutable signaling message
///
/// Produced by one side, consumed by the hub, forwarded to the other side
/// and dropped. Construction is by value: the `from_role`/`to` builders
/// return a new envelope rather than mutating one in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireEnvelope", into = "WireEnvelope")]
pub struct SignalingEnvelope {
    signal: Signal,
    sender_role: Option<Role>,
    target_id: Option<ConnectionId>,
}

impl SignalingEnvelope {
    /// Envelope with no sender role and no target (hub-originated events)
    pub fn new(signal: Signal) -> Self {
        Self {
            signal,
            sender_role: None,
            target_id: None,
        }
    }

    /// Same envelope stamped with a sender role
    pub fn from_role(self, role: Role) -> Self {
        Self {
            sender_role: Some(role),
            ..self
        }
    }

    /// Same envelope addressed to a specific viewer connection
    pub fn to(self, target: ConnectionId) -> Self {
        Self {
            target_id: Some(target),
            ..self
        }
    }

    pub fn signal(&self) -> &Signal {
        &self.signal
    }

    pub fn into_signal(self) -> Signal {
        self.signal
    }

    pub fn sender_role(&self) -> Option<Role> {
        self.sender_role
    }

    pub fn target_id(&self) -> Option<ConnectionId> {
        self.target_id
    }

    /// Wire name of the carried message type
    pub fn kind(&self) -> &'static str {
        self.signal.kind()
    }

    /// Decode one envelope from a JSON text frame
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode this envelope as a JSON text frame
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<Signal> for SignalingEnvelope {
    fn from(signal: Signal) -> Self {
        Self::new(signal)
    }
}

/// Flat wire form of [`SignalingEnvelope`]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    sender_role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target_id: Option<ConnectionId>,
}

impl TryFrom<WireEnvelope> for SignalingEnvelope {
    type Error = Error;

    fn try_from(wire: WireEnvelope) -> Result<Self> {
        let tagged = serde_json::json!({ "type": &wire.kind, "payload": wire.payload });
        let signal = serde_json::from_value(tagged)
            .map_err(|e| Error::MalformedEnvelope(format!("{} envelope: {}", wire.kind, e)))?;

        Ok(Self {
            signal,
            sender_role: wire.sender_role,
            target_id: wire.target_id,
        })
    }
}

impl From<SignalingEnvelope> for WireEnvelope {
    fn from(envelope: SignalingEnvelope) -> Self {
        Self {
            kind: envelope.signal.kind().to_owned(),
            payload: envelope.signal.payload_value(),
            sender_role: envelope.sender_role,
            target_id: envelope.target_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let envelope = SignalingEnvelope::new(Signal::answer("v=0", ConnectionId(4)))
            .from_role(Role::Broadcaster)
            .to(ConnectionId(4));

        let json: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();

        assert_eq!(json["type"], "answer");
        assert_eq!(json["payload"]["sdp"], "v=0");
        assert_eq!(json["payload"]["viewerId"], 4);
        assert_eq!(json["senderRole"], "broadcaster");
        assert_eq!(json["targetId"], 4);
    }

    #[test]
    fn test_decode_browser_message() {
        let text = r#"{
            "type": "ice-candidate",
            "payload": {"candidate": {"candidate": "c1", "sdpMid": "0", "sdpMLineIndex": 0}},
            "senderRole": "viewer"
        }"#;

        let envelope = SignalingEnvelope::from_json(text).unwrap();

        assert_eq!(envelope.kind(), "ice-candidate");
        assert_eq!(envelope.sender_role(), Some(Role::Viewer));
        assert!(envelope.target_id().is_none());
        match envelope.signal() {
            Signal::IceCandidate(payload) => {
                assert_eq!(payload.candidate.candidate, "c1");
                assert!(!payload.from_broadcaster);
            }
            other => panic!("unexpected signal {:?}", other),
        }
    }

    #[test]
    fn test_hub_event_has_null_sender() {
        let envelope = SignalingEnvelope::new(Signal::stream_stopped("s1".into()));
        let json: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();

        assert_eq!(json["type"], "stream-stopped");
        assert_eq!(json["payload"]["sessionId"], "s1");
        assert!(json["senderRole"].is_null());
        assert!(json.get("targetId").is_none());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result = SignalingEnvelope::from_json(r#"{"type":"teleport","payload":{}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_payload_rejected() {
        let result = SignalingEnvelope::from_json(r#"{"type":"viewer-join"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_kind_matches_serde_tag() {
        let signals = [
            Signal::viewer_joined(ConnectionId(1)),
            Signal::viewer_left(ConnectionId(1)),
            Signal::stream_started("s".into()),
            Signal::offer("sdp"),
            Signal::ice(IceCandidate::new("c"), None, true),
            Signal::error("boom"),
            Signal::AdminStreamStart(SessionPayload::new("s".into())),
            Signal::ViewerJoinedStream(SessionEvent {
                session_id: "s".into(),
            }),
        ];

        for signal in signals {
            let json = serde_json::to_value(&signal).unwrap();
            assert_eq!(json["type"], signal.kind());
        }
    }

    #[test]
    fn test_relayed_kinds() {
        assert!(Signal::offer("x").is_relayed());
        assert!(Signal::answer("x", ConnectionId(1)).is_relayed());
        assert!(!Signal::stream_started("s".into()).is_relayed());
    }
}
