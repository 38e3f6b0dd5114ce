//! Signaling wire protocol
//!
//! This module provides:
//! - Connection/session identifiers and roles
//! - Payload bodies for every message type
//! - The [`SignalingEnvelope`] wrapper and its JSON encoding

pub mod envelope;
pub mod ids;
pub mod payload;

pub use envelope::{Signal, SignalingEnvelope};
pub use ids::{ConnectionId, Role, SessionId};
pub use payload::{
    ErrorPayload, IceCandidate, IcePayload, Rejection, SdpPayload, SessionEvent, SessionPayload,
    ViewerPayload,
};
