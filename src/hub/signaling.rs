//! Signaling hub core
//!
//! Synchronous state machine over a [`ConnectionRegistry`]. Every method runs
//! to completion against `&mut self`; the event loop in
//! [`runtime`](super::runtime) feeds it one command at a time.

use std::sync::Arc;

use crate::error::Result;
use crate::protocol::{
    ConnectionId, IcePayload, Rejection, Role, SdpPayload, SessionEvent, SessionId, Signal,
    SignalingEnvelope,
};
use crate::registry::{ConnectionRegistry, LeftSession, Outbox, RegistryError, SessionPhase};
use crate::stats::HubStats;

use super::config::HubConfig;
use super::directory::StreamDirectory;

/// Point-in-time view of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub phase: SessionPhase,
    pub broadcaster: Option<ConnectionId>,
    pub viewers: Vec<ConnectionId>,
}

/// Outcome of a `viewer-join` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerAdmission {
    Admitted,
    Refused,
    /// The session is live but the directory has not been consulted yet
    AwaitingDirectory(PendingAdmission),
}

/// A viewer admission parked on a directory lookup
///
/// The lookup runs off the hub loop; its answer comes back through
/// [`SignalingHub::admit_viewer`], which re-checks the session phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAdmission {
    pub session: SessionId,
    pub viewer: ConnectionId,
}

impl PendingAdmission {
    /// Ask the directory whether the session is still marked active
    pub async fn lookup(&self, directory: &dyn StreamDirectory) -> bool {
        directory.is_active(&self.session).await
    }
}

/// Role admission, envelope routing and lifecycle events
pub struct SignalingHub {
    registry: ConnectionRegistry,
    directory: Arc<dyn StreamDirectory>,
    config: HubConfig,
    stats: HubStats,
}

impl SignalingHub {
    /// Create a hub with an empty registry
    pub fn new(config: HubConfig, directory: Arc<dyn StreamDirectory>) -> Self {
        Self::with_registry(ConnectionRegistry::new(), config, directory)
    }

    /// Create a hub around an existing registry
    pub fn with_registry(
        registry: ConnectionRegistry,
        config: HubConfig,
        directory: Arc<dyn StreamDirectory>,
    ) -> Self {
        Self {
            registry,
            directory,
            config,
            stats: HubStats::new(),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn directory(&self) -> Arc<dyn StreamDirectory> {
        self.directory.clone()
    }

    /// Attach a transport connection
    pub fn connect(&mut self, id: ConnectionId, outbox: Outbox) {
        if !self.registry.contains(id) {
            self.stats.total_connections += 1;
        }
        self.registry.attach(id, outbox);

        tracing::debug!(connection = %id, "Connection attached");
    }

    /// Install `id` as the broadcaster of `session`
    ///
    /// A previous broadcaster is told it was superseded; if the session was
    /// live its viewers see the stream stop.
    pub fn admit_broadcaster(&mut self, session: SessionId, id: ConnectionId) -> Result<()> {
        if let Some(left) = self.registry.register(id, Role::Broadcaster)? {
            self.after_leave(id, left);
        }

        let outcome = self.registry.join_session(id, session.clone())?;
        if let Some(left) = outcome.left {
            self.after_leave(id, left);
        }

        if let Some(displaced) = outcome.displaced {
            tracing::info!(
                session = %session,
                previous = %displaced,
                broadcaster = %id,
                "Broadcaster superseded"
            );

            self.deliver(
                displaced,
                Signal::Superseded(SessionEvent {
                    session_id: session.clone(),
                }),
            );
            if outcome.displaced_live {
                self.notify_viewers(&session, Signal::stream_stopped(session.clone()));
            }
        }

        tracing::info!(session = %session, broadcaster = %id, "Broadcaster admitted");
        self.deliver(
            id,
            Signal::AdminJoined(SessionEvent {
                session_id: session,
            }),
        );

        Ok(())
    }

    /// Handle a viewer's request to join `session`
    ///
    /// Refusals that need no directory answer are settled here. Otherwise the
    /// caller resolves the returned lookup and finishes with
    /// [`admit_viewer`](Self::admit_viewer).
    pub fn request_viewer(
        &mut self,
        session: SessionId,
        id: ConnectionId,
    ) -> Result<ViewerAdmission> {
        if !self.registry.contains(id) {
            return Err(RegistryError::UnknownConnection(id).into());
        }

        if self.config.require_directory_active && self.is_live(&session) {
            return Ok(ViewerAdmission::AwaitingDirectory(PendingAdmission {
                session,
                viewer: id,
            }));
        }

        let admitted = self.admit_viewer(session, id, true)?;
        Ok(if admitted {
            ViewerAdmission::Admitted
        } else {
            ViewerAdmission::Refused
        })
    }

    /// Admit `id` as a viewer of a live session
    ///
    /// `directory_active` is the directory's answer for `session`; it is
    /// ignored when the hub is configured to skip the check. The session
    /// phase is read here, so a stop that raced the lookup still refuses.
    ///
    /// Returns `false` when the join was refused; the viewer is told why and
    /// nothing is recorded.
    pub fn admit_viewer(
        &mut self,
        session: SessionId,
        id: ConnectionId,
        directory_active: bool,
    ) -> Result<bool> {
        if !self.registry.contains(id) {
            return Err(RegistryError::UnknownConnection(id).into());
        }

        let refusal = if !self.is_live(&session) {
            Some("stream has not started")
        } else if self.config.require_directory_active && !directory_active {
            Some("stream is not active")
        } else {
            None
        };

        if let Some(reason) = refusal {
            tracing::warn!(session = %session, viewer = %id, reason = reason, "Viewer rejected");

            self.stats.viewers_rejected += 1;
            self.deliver(
                id,
                Signal::SessionInactive(Rejection {
                    session_id: session,
                    reason: reason.to_owned(),
                }),
            );
            return Ok(false);
        }

        if let Some(left) = self.registry.register(id, Role::Viewer)? {
            self.after_leave(id, left);
        }
        let outcome = self.registry.join_session(id, session.clone())?;
        if let Some(left) = outcome.left {
            self.after_leave(id, left);
        }

        tracing::info!(session = %session, viewer = %id, "Viewer admitted");

        self.deliver(
            id,
            Signal::ViewerJoinedStream(SessionEvent {
                session_id: session.clone(),
            }),
        );
        if let Some(broadcaster) = self.registry.broadcaster_of(&session) {
            self.deliver(broadcaster, Signal::viewer_joined(id));
        }

        Ok(true)
    }

    fn is_live(&self, session: &SessionId) -> bool {
        self.registry
            .session(session)
            .map(|s| s.is_live())
            .unwrap_or(false)
    }

    /// Take a session live
    ///
    /// The broadcaster hears `stream-started` followed by a `viewer-joined`
    /// for every viewer still attached from an earlier run, then the viewers
    /// hear `stream-started`.
    pub fn start_stream(&mut self, session: &SessionId) -> Result<()> {
        let broadcaster = self.registry.start_session(session)?;
        let viewers = self.registry.viewers_of(session);

        tracing::info!(
            session = %session,
            broadcaster = %broadcaster,
            viewers = viewers.len(),
            "Stream started"
        );

        self.deliver(broadcaster, Signal::stream_started(session.clone()));
        for viewer in &viewers {
            self.deliver(broadcaster, Signal::viewer_joined(*viewer));
        }
        for viewer in viewers {
            self.deliver(viewer, Signal::stream_started(session.clone()));
        }

        Ok(())
    }

    /// Take a session back to idle
    ///
    /// The broadcaster and every viewer hear `stream-stopped`; the
    /// broadcaster's orchestrator releases its links on receipt.
    pub fn stop_stream(&mut self, session: &SessionId) -> Result<()> {
        let broadcaster = self.registry.stop_session(session)?;

        tracing::info!(session = %session, broadcaster = %broadcaster, "Stream stopped");

        self.deliver(broadcaster, Signal::stream_stopped(session.clone()));
        self.notify_viewers(session, Signal::stream_stopped(session.clone()));

        Ok(())
    }

    /// Route an offer, answer or candidate to its single recipient
    ///
    /// Returns whether the envelope was delivered. Anything unroutable is
    /// dropped and counted.
    pub fn relay(&mut self, from: ConnectionId, envelope: SignalingEnvelope) -> bool {
        let kind = envelope.kind();
        let Some((target, forward)) = self.route(from, envelope) else {
            tracing::debug!(connection = %from, kind = kind, "Unroutable envelope dropped");
            self.stats.envelopes_dropped += 1;
            return false;
        };

        tracing::debug!(from = %from, to = %target, kind = kind, "Relaying");

        let delivered = self.deliver_envelope(target, forward);
        if delivered {
            self.stats.envelopes_relayed += 1;
        }
        delivered
    }

    fn route(
        &self,
        from: ConnectionId,
        envelope: SignalingEnvelope,
    ) -> Option<(ConnectionId, SignalingEnvelope)> {
        let role = self.registry.role_of(from)?;
        let session = self.registry.session_of(from)?;
        let target_id = envelope.target_id();

        match (role, envelope.into_signal()) {
            (Role::Viewer, Signal::Offer(payload)) => {
                let live = self.registry.session(session)?;
                if !live.is_live() {
                    return None;
                }
                let broadcaster = live.broadcaster()?;
                let signal = Signal::Offer(SdpPayload {
                    sdp: payload.sdp,
                    viewer_id: Some(from),
                });
                Some((broadcaster, SignalingEnvelope::new(signal).from_role(role)))
            }
            (Role::Viewer, Signal::IceCandidate(payload)) => {
                let broadcaster = self.registry.broadcaster_of(session)?;
                let signal = Signal::IceCandidate(IcePayload {
                    candidate: payload.candidate,
                    viewer_id: Some(from),
                    from_broadcaster: false,
                });
                Some((broadcaster, SignalingEnvelope::new(signal).from_role(role)))
            }
            (Role::Broadcaster, Signal::Answer(payload)) => {
                let viewer = target_id.or(payload.viewer_id)?;
                if !self.registry.session(session)?.has_viewer(viewer) {
                    return None;
                }
                let signal = Signal::Answer(SdpPayload {
                    sdp: payload.sdp,
                    viewer_id: Some(viewer),
                });
                Some((viewer, SignalingEnvelope::new(signal).from_role(role).to(viewer)))
            }
            (Role::Broadcaster, Signal::IceCandidate(payload)) => {
                let viewer = target_id.or(payload.viewer_id)?;
                if !self.registry.session(session)?.has_viewer(viewer) {
                    return None;
                }
                let signal = Signal::IceCandidate(IcePayload {
                    candidate: payload.candidate,
                    viewer_id: Some(viewer),
                    from_broadcaster: true,
                });
                Some((viewer, SignalingEnvelope::new(signal).from_role(role).to(viewer)))
            }
            _ => None,
        }
    }

    /// Act on one envelope received from a connection
    ///
    /// Request failures are reported back to the sender as `error`; they
    /// never affect other connections. A `viewer-join` on a live session
    /// hands back the directory lookup it is waiting on.
    pub fn handle_envelope(
        &mut self,
        from: ConnectionId,
        envelope: SignalingEnvelope,
    ) -> Option<PendingAdmission> {
        if !self.registry.contains(from) {
            tracing::debug!(connection = %from, kind = envelope.kind(), "Envelope from unknown connection");
            return None;
        }

        if envelope.signal().is_relayed() {
            self.relay(from, envelope);
            return None;
        }

        let result = match envelope.into_signal() {
            Signal::AdminJoin(payload) => self.admit_broadcaster(payload.session_id, from),
            Signal::ViewerJoin(payload) => match self.request_viewer(payload.session_id, from) {
                Ok(ViewerAdmission::AwaitingDirectory(pending)) => return Some(pending),
                Ok(_) => Ok(()),
                Err(e) => Err(e),
            },
            Signal::AdminStreamStart(payload) => self
                .ensure_broadcaster(&payload.session_id, from)
                .and_then(|_| self.start_stream(&payload.session_id)),
            Signal::AdminStreamStop(payload) => self
                .ensure_broadcaster(&payload.session_id, from)
                .and_then(|_| self.stop_stream(&payload.session_id)),
            other => {
                tracing::warn!(connection = %from, kind = other.kind(), "Hub event sent by client");
                self.deliver(
                    from,
                    Signal::error(format!("{} is not accepted from clients", other.kind())),
                );
                return None;
            }
        };

        if let Err(e) = result {
            tracing::warn!(connection = %from, error = %e, "Request refused");
            self.deliver(from, Signal::error(e.to_string()));
        }
        None
    }

    fn ensure_broadcaster(&self, session: &SessionId, id: ConnectionId) -> Result<()> {
        if self.registry.broadcaster_of(session) == Some(id) {
            Ok(())
        } else {
            Err(RegistryError::NotBroadcaster(id).into())
        }
    }

    /// Detach a connection and notify whoever depended on it
    ///
    /// Idempotent.
    pub fn disconnect(&mut self, id: ConnectionId) {
        let Some(removed) = self.registry.remove(id) else {
            return;
        };

        tracing::info!(
            connection = %id,
            role = ?removed.role,
            "Connection closed"
        );

        if let Some(left) = removed.left {
            self.after_leave(id, left);
        }
    }

    /// Notifications owed after `id` lost its session membership
    fn after_leave(&mut self, id: ConnectionId, left: LeftSession) {
        match left.role {
            Role::Viewer => {
                if let Some(broadcaster) = self.registry.broadcaster_of(&left.session) {
                    self.deliver(broadcaster, Signal::viewer_left(id));
                }
            }
            Role::Broadcaster => {
                if left.was_live {
                    tracing::info!(
                        session = %left.session,
                        broadcaster = %id,
                        "Broadcaster left live session"
                    );
                    self.notify_viewers(&left.session, Signal::stream_stopped(left.session.clone()));
                }
            }
        }
    }

    fn notify_viewers(&mut self, session: &SessionId, signal: Signal) {
        for viewer in self.registry.viewers_of(session) {
            self.deliver(viewer, signal.clone());
        }
    }

    fn deliver(&mut self, to: ConnectionId, signal: Signal) -> bool {
        self.deliver_envelope(to, SignalingEnvelope::new(signal))
    }

    fn deliver_envelope(&mut self, to: ConnectionId, envelope: SignalingEnvelope) -> bool {
        let kind = envelope.kind();
        let result = match self.registry.outbox(to) {
            Some(outbox) => outbox.try_send(envelope).map_err(|e| e.to_string()),
            None => Err("not connected".to_owned()),
        };

        match result {
            Ok(()) => true,
            Err(reason) => {
                tracing::warn!(connection = %to, kind = kind, reason = %reason, "Delivery dropped");
                self.stats.envelopes_dropped += 1;
                false
            }
        }
    }

    /// Current view of a session, if anything references it
    pub fn snapshot(&self, session: &SessionId) -> Option<SessionSnapshot> {
        let s = self.registry.session(session)?;
        Some(SessionSnapshot {
            id: s.id.clone(),
            phase: s.phase(),
            broadcaster: s.broadcaster(),
            viewers: s.viewers().collect(),
        })
    }

    /// Counter snapshot with session gauges refreshed
    pub fn stats(&self) -> HubStats {
        let mut stats = self.stats.clone();
        stats.active_connections = self.registry.connection_count() as u64;
        stats.sessions = self.registry.session_count() as u64;
        stats.live_sessions = self.registry.live_session_count() as u64;
        stats
    }
}
