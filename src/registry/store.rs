//! Connection registry implementation
//!
//! The table of live connections and the sessions they belong to. Owned by
//! exactly one hub; every mutation goes through `&mut self`, so index
//! updates can never be observed half-done.

use std::collections::HashMap;

use super::connection::{ConnectionEntry, JoinOutcome, LeftSession, Outbox, RemovedConnection};
use super::error::RegistryError;
use super::session::StreamSession;
use crate::protocol::{ConnectionId, Role, SessionId};

/// Live connections and session membership
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Map of connection id to entry
    connections: HashMap<ConnectionId, ConnectionEntry>,

    /// Map of session id to session
    sessions: HashMap<SessionId, StreamSession>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly connected transport
    ///
    /// Re-attaching a known id replaces its outbox and keeps its membership.
    pub fn attach(&mut self, id: ConnectionId, outbox: Outbox) {
        match self.connections.get_mut(&id) {
            Some(entry) => entry.outbox = outbox,
            None => {
                self.connections.insert(id, ConnectionEntry::new(id, outbox));
            }
        }
    }

    /// Tag a connection with a role
    ///
    /// Changing role drops the connection's previous session membership,
    /// which is returned.
    pub fn register(
        &mut self,
        id: ConnectionId,
        role: Role,
    ) -> Result<Option<LeftSession>, RegistryError> {
        let current = self
            .connections
            .get(&id)
            .ok_or(RegistryError::UnknownConnection(id))?
            .role;

        let left = match current {
            Some(previous) if previous != role => self.leave_session(id),
            _ => None,
        };

        if let Some(entry) = self.connections.get_mut(&id) {
            entry.role = Some(role);
        }

        Ok(left)
    }

    /// Put a registered connection into a session
    ///
    /// Broadcasters take the session's broadcaster slot (displacing any
    /// other holder), viewers are added to its viewer set. Sessions are
    /// created on first reference.
    pub fn join_session(
        &mut self,
        id: ConnectionId,
        session_id: SessionId,
    ) -> Result<JoinOutcome, RegistryError> {
        let entry = self
            .connections
            .get(&id)
            .ok_or(RegistryError::UnknownConnection(id))?;
        let role = entry.role.ok_or(RegistryError::NoRole(id))?;

        let mut outcome = JoinOutcome::default();
        if entry.session.as_ref() != Some(&session_id) {
            outcome.left = self.leave_session(id);
        }

        let session = self
            .sessions
            .entry(session_id.clone())
            .or_insert_with(|| StreamSession::new(session_id.clone()));

        match role {
            Role::Broadcaster => {
                let was_live = session.is_live();
                if let Some(displaced) = session.install_broadcaster(id) {
                    outcome.displaced = Some(displaced);
                    outcome.displaced_live = was_live;
                }
            }
            Role::Viewer => {
                session.add_viewer(id);
            }
        }

        if let Some(displaced) = outcome.displaced {
            if let Some(old) = self.connections.get_mut(&displaced) {
                old.session = None;
            }
        }
        if let Some(entry) = self.connections.get_mut(&id) {
            entry.session = Some(session_id);
        }

        Ok(outcome)
    }

    /// Detach a connection from its session without removing it
    pub fn leave_session(&mut self, id: ConnectionId) -> Option<LeftSession> {
        let entry = self.connections.get_mut(&id)?;
        let session_id = entry.session.take()?;
        let role = entry.role?;

        let mut was_live = false;
        if let Some(session) = self.sessions.get_mut(&session_id) {
            match role {
                Role::Broadcaster => was_live = session.vacate(id).unwrap_or(false),
                Role::Viewer => {
                    session.remove_viewer(id);
                }
            }
            if session.is_vacant() {
                self.sessions.remove(&session_id);
            }
        }

        Some(LeftSession {
            session: session_id,
            role,
            was_live,
        })
    }

    /// Remove a connection from every index
    ///
    /// Idempotent: unknown ids return `None`.
    pub fn remove(&mut self, id: ConnectionId) -> Option<RemovedConnection> {
        let left = self.leave_session(id);
        let entry = self.connections.remove(&id)?;

        Some(RemovedConnection {
            id,
            role: entry.role,
            left,
        })
    }

    /// Broadcaster currently holding a session
    pub fn broadcaster_of(&self, session: &SessionId) -> Option<ConnectionId> {
        self.sessions.get(session).and_then(|s| s.broadcaster())
    }

    /// Viewers of a session, in connection id order
    pub fn viewers_of(&self, session: &SessionId) -> Vec<ConnectionId> {
        self.sessions
            .get(session)
            .map(|s| s.viewers().collect())
            .unwrap_or_default()
    }

    pub fn role_of(&self, id: ConnectionId) -> Option<Role> {
        self.connections.get(&id).and_then(|e| e.role)
    }

    pub fn session_of(&self, id: ConnectionId) -> Option<&SessionId> {
        self.connections.get(&id).and_then(|e| e.session.as_ref())
    }

    pub fn outbox(&self, id: ConnectionId) -> Option<&Outbox> {
        self.connections.get(&id).map(|e| &e.outbox)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn session(&self, id: &SessionId) -> Option<&StreamSession> {
        self.sessions.get(id)
    }

    /// Take a session live under its registered broadcaster
    pub fn start_session(&mut self, id: &SessionId) -> Result<ConnectionId, RegistryError> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| RegistryError::SessionNotFound(id.clone()))?
            .start()
    }

    /// Take a live session back to idle
    ///
    /// The broadcaster loses its slot and its session membership; viewers
    /// stay members so a later start can re-announce them.
    pub fn stop_session(&mut self, id: &SessionId) -> Result<ConnectionId, RegistryError> {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| RegistryError::SessionNotFound(id.clone()))?;
        let broadcaster = session.stop()?;

        if session.is_vacant() {
            self.sessions.remove(id);
        }
        if let Some(entry) = self.connections.get_mut(&broadcaster) {
            entry.session = None;
        }

        Ok(broadcaster)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn live_session_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_live()).count()
    }
}
