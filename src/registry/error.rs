//! Registry error types
//!
//! Error types for connection registry and session state transitions.

use crate::protocol::{ConnectionId, SessionId};

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Connection was never attached or already removed
    UnknownConnection(ConnectionId),
    /// Connection has not declared a role yet
    NoRole(ConnectionId),
    /// Session not found
    SessionNotFound(SessionId),
    /// Session has no broadcaster to start a stream with
    NoBroadcaster(SessionId),
    /// Connection is not the broadcaster of the session
    NotBroadcaster(ConnectionId),
    /// Session is already live
    AlreadyLive(SessionId),
    /// Session is not live
    NotLive(SessionId),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::UnknownConnection(id) => write!(f, "Unknown connection: {}", id),
            RegistryError::NoRole(id) => write!(f, "Connection has no role: {}", id),
            RegistryError::SessionNotFound(id) => write!(f, "Session not found: {}", id),
            RegistryError::NoBroadcaster(id) => write!(f, "Session has no broadcaster: {}", id),
            RegistryError::NotBroadcaster(id) => {
                write!(f, "Connection is not the session broadcaster: {}", id)
            }
            RegistryError::AlreadyLive(id) => write!(f, "Session already live: {}", id),
            RegistryError::NotLive(id) => write!(f, "Session not live: {}", id),
        }
    }
}

impl std::error::Error for RegistryError {}
