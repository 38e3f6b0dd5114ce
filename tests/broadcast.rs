//! End-to-end broadcasts over an in-process hub with loopback peers

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use live_signal::client::{BroadcasterCommand, BroadcasterOrchestrator, ViewerOrchestrator, ViewerPhase};
use live_signal::hub::{MemoryDirectory, StreamDirectory};
use live_signal::peer::{LoopbackFactory, LoopbackMedia, PeerCall, SdpKind, StaticRelayConfig};
use live_signal::protocol::SessionPayload;
use live_signal::registry::SessionPhase;
use live_signal::{
    spawn_hub, ConnectionId, HubConfig, HubHandle, Role, SessionId, Signal, SignalingEnvelope,
    SignalingHub,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(2);

type Task = JoinHandle<live_signal::Result<()>>;

struct Fixture {
    hub: HubHandle,
    directory: Arc<MemoryDirectory>,
    session: SessionId,
    broadcaster_peers: Arc<LoopbackFactory>,
    viewer_peers: Arc<LoopbackFactory>,
    relays: Arc<StaticRelayConfig>,
}

struct Viewer {
    id: ConnectionId,
    phase: watch::Receiver<ViewerPhase>,
    task: Task,
}

impl Fixture {
    fn new() -> Self {
        let directory = Arc::new(MemoryDirectory::new());
        let (hub, _task) = spawn_hub(SignalingHub::new(HubConfig::default(), directory.clone()));

        Self {
            hub,
            directory,
            session: SessionId::new("S1"),
            broadcaster_peers: Arc::new(LoopbackFactory::new()),
            viewer_peers: Arc::new(LoopbackFactory::new()),
            relays: Arc::new(StaticRelayConfig::default()),
        }
    }

    /// Broadcaster that has already asked to go live
    async fn broadcaster(&self) -> (ConnectionId, mpsc::Sender<BroadcasterCommand>, Task) {
        let (sender, inbox) = self.hub.connect().unwrap().split();
        let id = sender.id();
        let mut broadcaster = BroadcasterOrchestrator::new(
            self.session.clone(),
            Arc::new(sender),
            self.broadcaster_peers.clone(),
            self.relays.clone(),
            Arc::new(LoopbackMedia::new()),
        );

        self.directory.set_active(&self.session, true).await;
        broadcaster.start().await.unwrap();

        let (commands, rx) = mpsc::channel(8);
        (id, commands, tokio::spawn(broadcaster.run(inbox, rx)))
    }

    async fn viewer(&self) -> Viewer {
        let (sender, inbox) = self.hub.connect().unwrap().split();
        let id = sender.id();
        let mut viewer = ViewerOrchestrator::new(
            self.session.clone(),
            Arc::new(sender),
            self.viewer_peers.clone(),
            self.relays.clone(),
        );
        viewer.join().await.unwrap();

        Viewer {
            id,
            phase: viewer.watch_phase(),
            task: tokio::spawn(viewer.run(inbox)),
        }
    }

    async fn phase(&self) -> Option<(SessionPhase, Option<ConnectionId>, Vec<ConnectionId>)> {
        self.hub
            .session_snapshot(self.session.clone())
            .await
            .unwrap()
            .map(|s| (s.phase, s.broadcaster, s.viewers))
    }
}

async fn wait_phase(viewer: &mut Viewer, want: ViewerPhase) {
    timeout(WAIT, viewer.phase.wait_for(|p| *p == want))
        .await
        .expect("viewer phase not reached")
        .expect("viewer dropped");
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    timeout(WAIT, async {
        while !check().await {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_viewer_receives_broadcast_until_stop() {
    let fx = Fixture::new();
    let (broadcaster, commands, _task) = fx.broadcaster().await;
    let mut viewer = fx.viewer().await;

    wait_phase(&mut viewer, ViewerPhase::Connected).await;

    let (phase, current, viewers) = fx.phase().await.unwrap();
    assert_eq!(phase, SessionPhase::Live);
    assert_eq!(current, Some(broadcaster));
    assert_eq!(viewers, vec![viewer.id]);

    // The broadcaster side answers, it never offers
    let link = fx.broadcaster_peers.probe(0).await.unwrap();
    let calls = link.calls().await;
    let remote_offer = calls
        .iter()
        .position(|c| *c == PeerCall::SetRemote(SdpKind::Offer))
        .unwrap();
    let answer = calls.iter().position(|c| *c == PeerCall::CreateAnswer).unwrap();
    assert!(remote_offer < answer);
    assert!(!calls.contains(&PeerCall::CreateOffer));

    commands.send(BroadcasterCommand::Stop).await.unwrap();
    wait_phase(&mut viewer, ViewerPhase::Idle).await;
    eventually(|| async { link.is_closed().await }).await;

    let (phase, current, _) = fx.phase().await.unwrap();
    assert_eq!(phase, SessionPhase::Idle);
    assert_eq!(current, None);
}

#[tokio::test]
async fn test_broadcaster_disconnect_stops_viewers() {
    let fx = Fixture::new();
    let (_, commands, task) = fx.broadcaster().await;
    let mut first = fx.viewer().await;
    let mut second = fx.viewer().await;

    wait_phase(&mut first, ViewerPhase::Connected).await;
    wait_phase(&mut second, ViewerPhase::Connected).await;

    commands.send(BroadcasterCommand::Shutdown).await.unwrap();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();

    wait_phase(&mut first, ViewerPhase::Idle).await;
    wait_phase(&mut second, ViewerPhase::Idle).await;

    let (phase, current, viewers) = fx.phase().await.unwrap();
    assert_eq!(phase, SessionPhase::Idle);
    assert_eq!(current, None);
    assert_eq!(viewers.len(), 2);
}

#[tokio::test]
async fn test_new_broadcaster_supersedes_live_one() {
    let fx = Fixture::new();
    let (_, _commands, _task) = fx.broadcaster().await;
    let mut viewer = fx.viewer().await;
    wait_phase(&mut viewer, ViewerPhase::Connected).await;

    let mut usurper = fx.hub.connect().unwrap();
    usurper
        .send(
            SignalingEnvelope::new(Signal::AdminJoin(SessionPayload::new(fx.session.clone())))
                .from_role(Role::Broadcaster),
        )
        .unwrap();

    let reply = timeout(WAIT, usurper.recv()).await.unwrap().unwrap();
    assert_eq!(reply.kind(), "admin-joined");

    wait_phase(&mut viewer, ViewerPhase::Idle).await;
    let link = fx.broadcaster_peers.probe(0).await.unwrap();
    eventually(|| async { link.is_closed().await }).await;

    let (phase, current, _) = fx.phase().await.unwrap();
    assert_eq!(phase, SessionPhase::Idle);
    assert_eq!(current, Some(usurper.id()));
}

fn admin(signal: fn(SessionPayload) -> Signal, session: &SessionId) -> SignalingEnvelope {
    SignalingEnvelope::new(signal(SessionPayload::new(session.clone()))).from_role(Role::Broadcaster)
}

async fn next_kind(conn: &mut live_signal::hub::HubConnection) -> &'static str {
    timeout(WAIT, conn.recv()).await.unwrap().unwrap().kind()
}

#[tokio::test]
async fn test_superseded_queued_before_successor_admitted() {
    let fx = Fixture::new();
    fx.directory.set_active(&fx.session, true).await;

    let mut first = fx.hub.connect().unwrap();
    first.send(admin(Signal::AdminJoin, &fx.session)).unwrap();
    assert_eq!(next_kind(&mut first).await, "admin-joined");
    first.send(admin(Signal::AdminStreamStart, &fx.session)).unwrap();
    assert_eq!(next_kind(&mut first).await, "stream-started");

    let mut viewer = fx.hub.connect().unwrap();
    viewer
        .send(SignalingEnvelope::new(Signal::ViewerJoin(SessionPayload::new(fx.session.clone()))))
        .unwrap();
    assert_eq!(next_kind(&mut viewer).await, "viewer-joined-stream");
    assert_eq!(next_kind(&mut first).await, "viewer-joined");

    let mut second = fx.hub.connect().unwrap();
    second.send(admin(Signal::AdminJoin, &fx.session)).unwrap();
    assert_eq!(next_kind(&mut second).await, "admin-joined");

    // Already queued by the time the successor hears it was admitted
    let (_first_sender, mut first_inbox) = first.split();
    assert_eq!(first_inbox.try_recv().unwrap().kind(), "superseded");
    assert_eq!(next_kind(&mut viewer).await, "stream-stopped");

    second.send(admin(Signal::AdminStreamStart, &fx.session)).unwrap();
    assert_eq!(next_kind(&mut second).await, "stream-started");
    assert_eq!(
        timeout(WAIT, second.recv()).await.unwrap().unwrap().into_signal(),
        Signal::viewer_joined(viewer.id())
    );
    assert_eq!(next_kind(&mut viewer).await, "stream-started");

    // The displaced broadcaster hears nothing about the new run
    assert!(first_inbox.try_recv().is_err());
}

#[tokio::test]
async fn test_idle_session_rejects_viewer() {
    let fx = Fixture::new();
    let (sender, mut inbox) = fx.hub.connect().unwrap().split();
    let mut viewer = ViewerOrchestrator::new(
        fx.session.clone(),
        Arc::new(sender),
        fx.viewer_peers.clone(),
        fx.relays.clone(),
    );

    viewer.join().await.unwrap();
    let reply = timeout(WAIT, inbox.recv()).await.unwrap().unwrap();
    assert_eq!(reply.kind(), "session-inactive");
    viewer.handle(reply).await.unwrap();

    assert_eq!(viewer.phase(), ViewerPhase::Idle);
    assert!(viewer.rejection().is_some());
    assert_eq!(fx.viewer_peers.created().await, 0);
    assert_eq!(fx.hub.stats().await.unwrap().viewers_rejected, 1);
}

#[tokio::test]
async fn test_stop_closes_every_link() {
    let fx = Fixture::new();
    let (_, commands, _task) = fx.broadcaster().await;

    let mut viewers = Vec::new();
    for _ in 0..4 {
        viewers.push(fx.viewer().await);
    }
    for viewer in viewers.iter_mut() {
        wait_phase(viewer, ViewerPhase::Connected).await;
    }
    assert_eq!(fx.broadcaster_peers.created().await, 4);

    commands.send(BroadcasterCommand::Stop).await.unwrap();
    for viewer in viewers.iter_mut() {
        wait_phase(viewer, ViewerPhase::Idle).await;
    }

    for link in fx.broadcaster_peers.probes().await {
        eventually(|| async { link.is_closed().await }).await;
    }

    let (phase, _, _) = fx.phase().await.unwrap();
    assert_eq!(phase, SessionPhase::Idle);
    assert_eq!(fx.hub.stats().await.unwrap().live_sessions, 0);
}

#[tokio::test]
async fn test_departed_viewer_loses_only_its_link() {
    let fx = Fixture::new();
    let (_, _commands, _task) = fx.broadcaster().await;
    let mut leaving = fx.viewer().await;
    let mut staying = fx.viewer().await;

    wait_phase(&mut leaving, ViewerPhase::Connected).await;
    wait_phase(&mut staying, ViewerPhase::Connected).await;

    leaving.task.abort();

    let gone = fx.broadcaster_peers.probe(0).await.unwrap();
    let kept = fx.broadcaster_peers.probe(1).await.unwrap();
    eventually(|| async { gone.is_closed().await }).await;
    assert!(!kept.is_closed().await);

    let (_, _, viewers) = fx.phase().await.unwrap();
    assert_eq!(viewers, vec![staying.id]);
}
