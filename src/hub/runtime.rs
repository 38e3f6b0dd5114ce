//! Hub event loop and handles
//!
//! One task owns the [`SignalingHub`] and consumes [`HubCommand`]s in
//! arrival order. Everything else talks to it through a cloneable
//! [`HubHandle`] or a per-connection [`HubConnection`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::protocol::{ConnectionId, SessionId, SignalingEnvelope};
use crate::registry::Outbox;
use crate::stats::HubStats;

use super::signaling::{PendingAdmission, SessionSnapshot, SignalingHub};

/// Commands consumed by the hub task
#[derive(Debug)]
pub enum HubCommand {
    Connect {
        id: ConnectionId,
        outbox: Outbox,
    },
    Envelope {
        from: ConnectionId,
        envelope: SignalingEnvelope,
    },
    Disconnect {
        id: ConnectionId,
    },
    /// Directory verdict for a viewer join looked up off the loop
    AdmitViewer {
        session: SessionId,
        id: ConnectionId,
        active: bool,
    },
    StartStream {
        session: SessionId,
        reply: oneshot::Sender<Result<()>>,
    },
    StopStream {
        session: SessionId,
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        session: SessionId,
        reply: oneshot::Sender<Option<SessionSnapshot>>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
    Shutdown,
}

/// Move `hub` onto its own task
pub fn spawn_hub(hub: SignalingHub) -> (HubHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = HubHandle {
        tx,
        next_id: Arc::new(AtomicU64::new(1)),
        outbox_capacity: hub.config().outbox_capacity,
    };

    let task = tokio::spawn(run_hub(hub, rx, handle.tx.downgrade()));
    (handle, task)
}

async fn run_hub(
    mut hub: SignalingHub,
    mut rx: mpsc::UnboundedReceiver<HubCommand>,
    loopback: mpsc::WeakUnboundedSender<HubCommand>,
) {
    tracing::info!("Signaling hub running");

    while let Some(command) = rx.recv().await {
        match command {
            HubCommand::Connect { id, outbox } => hub.connect(id, outbox),
            HubCommand::Envelope { from, envelope } => {
                if let Some(pending) = hub.handle_envelope(from, envelope) {
                    spawn_lookup(&hub, pending, loopback.clone());
                }
            }
            HubCommand::Disconnect { id } => hub.disconnect(id),
            HubCommand::AdmitViewer { session, id, active } => {
                if let Err(e) = hub.admit_viewer(session, id, active) {
                    tracing::debug!(viewer = %id, error = %e, "Viewer left before admission");
                }
            }
            HubCommand::StartStream { session, reply } => {
                let _ = reply.send(hub.start_stream(&session));
            }
            HubCommand::StopStream { session, reply } => {
                let _ = reply.send(hub.stop_stream(&session));
            }
            HubCommand::Snapshot { session, reply } => {
                let _ = reply.send(hub.snapshot(&session));
            }
            HubCommand::Stats { reply } => {
                let _ = reply.send(hub.stats());
            }
            HubCommand::Shutdown => break,
        }
    }

    let stats = hub.stats();
    tracing::info!(
        connections = stats.active_connections,
        relayed = stats.envelopes_relayed,
        dropped = stats.envelopes_dropped,
        "Signaling hub stopped"
    );
}

/// Resolve a directory lookup on its own task
///
/// The hub holds only a weak sender so that dropping every handle still
/// ends the loop.
fn spawn_lookup(
    hub: &SignalingHub,
    pending: PendingAdmission,
    loopback: mpsc::WeakUnboundedSender<HubCommand>,
) {
    let directory = hub.directory();
    tokio::spawn(async move {
        let active = pending.lookup(directory.as_ref()).await;
        if let Some(tx) = loopback.upgrade() {
            let _ = tx.send(HubCommand::AdmitViewer {
                session: pending.session,
                id: pending.viewer,
                active,
            });
        }
    });
}

/// Cloneable access to a running hub
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
    next_id: Arc<AtomicU64>,
    outbox_capacity: usize,
}

impl HubHandle {
    /// Open a new connection to the hub
    pub fn connect(&self) -> Result<HubConnection> {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (outbox, inbox) = mpsc::channel(self.outbox_capacity);

        self.send(HubCommand::Connect { id, outbox })?;

        Ok(HubConnection {
            sender: HubSender {
                id,
                guard: Arc::new(DisconnectGuard {
                    id,
                    tx: self.tx.clone(),
                }),
            },
            inbox,
        })
    }

    /// Take a session live (control path)
    pub async fn start_stream(&self, session: SessionId) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::StartStream { session, reply })?;
        rx.await.map_err(|_| Error::ChannelClosed("hub"))?
    }

    /// Take a session back to idle (control path)
    pub async fn stop_stream(&self, session: SessionId) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::StopStream { session, reply })?;
        rx.await.map_err(|_| Error::ChannelClosed("hub"))?
    }

    pub async fn session_snapshot(&self, session: SessionId) -> Result<Option<SessionSnapshot>> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Snapshot { session, reply })?;
        rx.await.map_err(|_| Error::ChannelClosed("hub"))
    }

    pub async fn stats(&self) -> Result<HubStats> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Stats { reply })?;
        rx.await.map_err(|_| Error::ChannelClosed("hub"))
    }

    /// Detach a connection by id
    pub fn disconnect(&self, id: ConnectionId) {
        let _ = self.tx.send(HubCommand::Disconnect { id });
    }

    /// Stop the hub task after the commands already queued
    pub fn shutdown(&self) {
        let _ = self.tx.send(HubCommand::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, command: HubCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| Error::ChannelClosed("hub"))
    }
}

/// Detaches the connection once the last sender is dropped
#[derive(Debug)]
struct DisconnectGuard {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<HubCommand>,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(HubCommand::Disconnect { id: self.id });
    }
}

/// Sending half of a hub connection
#[derive(Debug, Clone)]
pub struct HubSender {
    id: ConnectionId,
    guard: Arc<DisconnectGuard>,
}

impl HubSender {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue an envelope for the hub
    pub fn send(&self, envelope: SignalingEnvelope) -> Result<()> {
        self.guard
            .tx
            .send(HubCommand::Envelope {
                from: self.id,
                envelope,
            })
            .map_err(|_| Error::ChannelClosed("hub"))
    }
}

/// In-process connection to the hub
///
/// Dropping every sender half disconnects it.
#[derive(Debug)]
pub struct HubConnection {
    sender: HubSender,
    inbox: mpsc::Receiver<SignalingEnvelope>,
}

impl HubConnection {
    pub fn id(&self) -> ConnectionId {
        self.sender.id
    }

    pub fn send(&self, envelope: SignalingEnvelope) -> Result<()> {
        self.sender.send(envelope)
    }

    /// Next envelope from the hub; `None` once the hub dropped the connection
    pub async fn recv(&mut self) -> Option<SignalingEnvelope> {
        self.inbox.recv().await
    }

    pub fn sender(&self) -> HubSender {
        self.sender.clone()
    }

    /// Split into sending and receiving halves
    pub fn split(self) -> (HubSender, mpsc::Receiver<SignalingEnvelope>) {
        (self.sender, self.inbox)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::{sleep, timeout, Instant};
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::hub::config::HubConfig;
    use crate::hub::directory::{MemoryDirectory, StreamConfig, StreamDirectory};
    use crate::protocol::{Role, SessionPayload, Signal};
    use crate::registry::SessionPhase;

    const WAIT: Duration = Duration::from_secs(1);

    async fn next_kind(conn: &mut HubConnection) -> &'static str {
        timeout(WAIT, conn.recv())
            .await
            .expect("timed out")
            .expect("hub closed")
            .kind()
    }

    fn spawn() -> (HubHandle, Arc<MemoryDirectory>) {
        let directory = Arc::new(MemoryDirectory::new());
        let hub = SignalingHub::new(HubConfig::default(), directory.clone());
        let (handle, _task) = spawn_hub(hub);
        (handle, directory)
    }

    /// Directory whose reads take `delay`
    struct SlowDirectory {
        inner: MemoryDirectory,
        delay: Duration,
    }

    #[async_trait]
    impl StreamDirectory for SlowDirectory {
        async fn is_active(&self, session: &SessionId) -> bool {
            sleep(self.delay).await;
            self.inner.is_active(session).await
        }

        async fn set_active(&self, session: &SessionId, active: bool) {
            self.inner.set_active(session, active).await
        }

        async fn stream_config(&self, session: &SessionId) -> Option<StreamConfig> {
            self.inner.stream_config(session).await
        }

        async fn set_stream_config(&self, session: &SessionId, config: StreamConfig) {
            self.inner.set_stream_config(session, config).await
        }
    }

    fn join(session: &SessionId) -> SignalingEnvelope {
        SignalingEnvelope::new(Signal::ViewerJoin(SessionPayload::new(session.clone())))
            .from_role(Role::Viewer)
    }

    async fn live_on_slow_directory(
        delay: Duration,
    ) -> (HubHandle, HubConnection, SessionId) {
        let directory = Arc::new(SlowDirectory {
            inner: MemoryDirectory::new(),
            delay,
        });
        let s = SessionId::new("s1");
        directory.set_active(&s, true).await;

        let (hub, _task) = spawn_hub(SignalingHub::new(HubConfig::default(), directory));
        let mut broadcaster = hub.connect().unwrap();
        broadcaster
            .send(
                SignalingEnvelope::new(Signal::AdminJoin(SessionPayload::new(s.clone())))
                    .from_role(Role::Broadcaster),
            )
            .unwrap();
        assert_eq!(next_kind(&mut broadcaster).await, "admin-joined");
        assert_ok!(hub.start_stream(s.clone()).await);
        assert_eq!(next_kind(&mut broadcaster).await, "stream-started");

        (hub, broadcaster, s)
    }

    #[tokio::test]
    async fn test_directory_lookup_does_not_stall_hub() {
        let (hub, mut broadcaster, s) = live_on_slow_directory(Duration::from_millis(500)).await;
        let mut viewer = hub.connect().unwrap();

        viewer.send(join(&s)).unwrap();

        let started = Instant::now();
        let stats = hub.stats().await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(stats.active_connections, 2);

        assert_eq!(next_kind(&mut viewer).await, "viewer-joined-stream");
        assert_eq!(next_kind(&mut broadcaster).await, "viewer-joined");
    }

    #[tokio::test]
    async fn test_stop_while_lookup_pending_refuses_viewer() {
        let (hub, _broadcaster, s) = live_on_slow_directory(Duration::from_millis(200)).await;
        let mut viewer = hub.connect().unwrap();

        viewer.send(join(&s)).unwrap();
        assert_ok!(hub.stop_stream(s.clone()).await);

        assert_eq!(next_kind(&mut viewer).await, "session-inactive");
        let snapshot = hub.session_snapshot(s).await.unwrap();
        assert!(snapshot.map_or(true, |s| s.viewers.is_empty()));
    }

    #[tokio::test]
    async fn test_connection_ids_are_unique() {
        let (hub, _) = spawn();
        let a = hub.connect().unwrap();
        let b = hub.connect().unwrap();

        assert_ne!(a.id(), b.id());
        assert_eq!(hub.stats().await.unwrap().active_connections, 2);
    }

    #[tokio::test]
    async fn test_control_path_start_and_snapshot() {
        let (hub, directory) = spawn();
        let s = SessionId::new("s1");
        let mut broadcaster = hub.connect().unwrap();

        broadcaster
            .send(
                SignalingEnvelope::new(Signal::AdminJoin(SessionPayload::new(s.clone())))
                    .from_role(Role::Broadcaster),
            )
            .unwrap();
        assert_eq!(next_kind(&mut broadcaster).await, "admin-joined");

        directory.set_active(&s, true).await;
        assert_ok!(hub.start_stream(s.clone()).await);
        assert_eq!(next_kind(&mut broadcaster).await, "stream-started");

        let snapshot = hub.session_snapshot(s.clone()).await.unwrap().unwrap();
        assert_eq!(snapshot.phase, SessionPhase::Live);
        assert_eq!(snapshot.broadcaster, Some(broadcaster.id()));

        assert_err!(hub.start_stream(s.clone()).await);
        assert_ok!(hub.stop_stream(s).await);
    }

    #[tokio::test]
    async fn test_drop_disconnects() {
        let (hub, _) = spawn();
        let conn = hub.connect().unwrap();
        let sender = conn.sender();

        drop(conn);
        assert_eq!(hub.stats().await.unwrap().active_connections, 1);

        drop(sender);
        assert_eq!(hub.stats().await.unwrap().active_connections, 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_handle() {
        let directory = Arc::new(MemoryDirectory::new());
        let (hub, task) = spawn_hub(SignalingHub::new(HubConfig::default(), directory));

        hub.shutdown();
        assert_ok!(timeout(WAIT, task).await.unwrap());

        assert!(hub.is_closed());
        assert!(hub.stats().await.is_err());
    }
}
