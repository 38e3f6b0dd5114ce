//! Per-connection registry entry

use std::time::Instant;

use tokio::sync::mpsc;

use crate::protocol::{ConnectionId, Role, SessionId, SignalingEnvelope};

/// Outbound queue of one connection
///
/// Drained by the transport task that owns the socket.
pub type Outbox = mpsc::Sender<SignalingEnvelope>;

/// Entry for a single live transport connection
#[derive(Debug)]
pub struct ConnectionEntry {
    /// Connection identifier
    pub id: ConnectionId,

    /// Role, once the connection has joined as broadcaster or viewer
    pub role: Option<Role>,

    /// Session the connection belongs to
    pub session: Option<SessionId>,

    /// Delivery queue towards the connection
    pub(super) outbox: Outbox,

    /// When the transport connected
    pub connected_at: Instant,
}

impl ConnectionEntry {
    pub(super) fn new(id: ConnectionId, outbox: Outbox) -> Self {
        Self {
            id,
            role: None,
            session: None,
            outbox,
            connected_at: Instant::now(),
        }
    }
}

/// Session membership a connection lost
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeftSession {
    pub session: SessionId,
    pub role: Role,
    /// Set when a broadcaster left a live session
    pub was_live: bool,
}

/// Result of joining a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Previous membership, if the connection moved between sessions
    pub left: Option<LeftSession>,
    /// Broadcaster displaced by this join
    pub displaced: Option<ConnectionId>,
    /// Whether the session was live before a displacing join
    pub displaced_live: bool,
}

/// Everything a removed connection was attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedConnection {
    pub id: ConnectionId,
    pub role: Option<Role>,
    pub left: Option<LeftSession>,
}
