//! Error types
//!
//! Routing misses and out-of-order candidates are not errors in this crate;
//! they are absorbed by the hub and the pending-candidate queue. Everything
//! that does surface goes through [`Error`].

use crate::registry::RegistryError;

/// Result type alias using the crate [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the hub, the orchestrators and the transports
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket level failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket framing or handshake failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON encode/decode failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Envelope could not be understood
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Registry rejected an operation
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Session description exchange failed
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// Underlying peer media connection failed
    #[error("Peer connection error: {0}")]
    PeerConnection(String),

    /// Operation not supported by the peer backend
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Relay server configuration could not be fetched
    #[error("Relay configuration unavailable: {0}")]
    RelayConfig(String),

    /// Media source could not be acquired
    #[error("Media source error: {0}")]
    MediaSource(String),

    /// Hub or task on the other end of a channel is gone
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    /// Operation did not finish in time
    #[error("Timed out: {0}")]
    Timeout(String),
}

impl Error {
    /// Whether the error ends a negotiation for good
    pub fn is_negotiation_failure(&self) -> bool {
        matches!(
            self,
            Error::Negotiation(_) | Error::PeerConnection(_) | Error::RelayConfig(_)
        )
    }
}
