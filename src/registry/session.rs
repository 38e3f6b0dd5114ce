//! Stream session state
//!
//! A session is either idle or live. The broadcaster slot lives inside the
//! state tag so that "who is broadcasting" and "is it live" can never
//! disagree: a live session always has exactly one broadcaster, an idle one
//! has at most one.

use std::collections::BTreeSet;
use std::time::Instant;

use super::error::RegistryError;
use crate::protocol::{ConnectionId, SessionId};

/// Coarse session phase, as reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No stream running (a broadcaster may be registered)
    Idle,
    /// Stream running, viewers may join
    Live,
}

/// Tagged session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not streaming; `broadcaster` is set once one registers
    Idle { broadcaster: Option<ConnectionId> },
    /// Streaming from `broadcaster`
    Live { broadcaster: ConnectionId },
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        match self {
            SessionState::Idle { .. } => SessionPhase::Idle,
            SessionState::Live { .. } => SessionPhase::Live,
        }
    }

    pub fn broadcaster(&self) -> Option<ConnectionId> {
        match *self {
            SessionState::Idle { broadcaster } => broadcaster,
            SessionState::Live { broadcaster } => Some(broadcaster),
        }
    }
}

/// One logical broadcast channel
#[derive(Debug)]
pub struct StreamSession {
    /// Session identifier
    pub id: SessionId,

    state: SessionState,

    /// Viewer connections that joined this session
    viewers: BTreeSet<ConnectionId>,

    /// When the session was first referenced
    pub created_at: Instant,

    /// When the current stream went live
    pub started_at: Option<Instant>,
}

impl StreamSession {
    /// Create an idle session with no broadcaster
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            state: SessionState::Idle { broadcaster: None },
            viewers: BTreeSet::new(),
            created_at: Instant::now(),
            started_at: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    pub fn is_live(&self) -> bool {
        self.phase() == SessionPhase::Live
    }

    pub fn broadcaster(&self) -> Option<ConnectionId> {
        self.state.broadcaster()
    }

    pub fn viewers(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.viewers.iter().copied()
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    pub fn has_viewer(&self, id: ConnectionId) -> bool {
        self.viewers.contains(&id)
    }

    /// Whether nothing references this session any more
    pub fn is_vacant(&self) -> bool {
        self.broadcaster().is_none() && self.viewers.is_empty()
    }

    /// Install `conn` as the broadcaster
    ///
    /// Last writer wins: a different previous broadcaster is displaced and
    /// returned, and the session reverts to idle under the new one.
    /// Re-registering the current broadcaster leaves the state untouched.
    pub(super) fn install_broadcaster(&mut self, conn: ConnectionId) -> Option<ConnectionId> {
        let previous = self.broadcaster();
        if previous == Some(conn) {
            return None;
        }

        self.state = SessionState::Idle {
            broadcaster: Some(conn),
        };
        self.started_at = None;
        previous
    }

    /// Idle with broadcaster -> live
    pub(super) fn start(&mut self) -> Result<ConnectionId, RegistryError> {
        match self.state {
            SessionState::Idle {
                broadcaster: Some(broadcaster),
            } => {
                self.state = SessionState::Live { broadcaster };
                self.started_at = Some(Instant::now());
                Ok(broadcaster)
            }
            SessionState::Idle { broadcaster: None } => {
                Err(RegistryError::NoBroadcaster(self.id.clone()))
            }
            SessionState::Live { .. } => Err(RegistryError::AlreadyLive(self.id.clone())),
        }
    }

    /// Live -> idle, dropping the broadcaster reference
    pub(super) fn stop(&mut self) -> Result<ConnectionId, RegistryError> {
        match self.state {
            SessionState::Live { broadcaster } => {
                self.state = SessionState::Idle { broadcaster: None };
                self.started_at = None;
                Ok(broadcaster)
            }
            SessionState::Idle { .. } => Err(RegistryError::NotLive(self.id.clone())),
        }
    }

    /// Drop `conn` from the broadcaster slot if it holds it
    ///
    /// Returns whether the session was live at the time.
    pub(super) fn vacate(&mut self, conn: ConnectionId) -> Option<bool> {
        if self.broadcaster() != Some(conn) {
            return None;
        }

        let was_live = self.is_live();
        self.state = SessionState::Idle { broadcaster: None };
        self.started_at = None;
        Some(was_live)
    }

    pub(super) fn add_viewer(&mut self, conn: ConnectionId) -> bool {
        self.viewers.insert(conn)
    }

    pub(super) fn remove_viewer(&mut self, conn: ConnectionId) -> bool {
        self.viewers.remove(&conn)
    }
}
