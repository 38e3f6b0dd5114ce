//! Broadcaster-side orchestrator
//!
//! Owns one [`ViewerLink`] per admitted viewer and the local tracks they
//! share. Reacts to hub events (`viewer-joined`, `offer`, `ice-candidate`,
//! `viewer-left`, `stream-stopped`, `superseded`) and to local commands
//! (start, stop, camera switch).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::peer::{
    LocalTrack, MediaConstraints, MediaSource, PeerConnectionFactory, RelayConfigSource,
    TrackKind, TrackLedger,
};
use crate::protocol::{
    ConnectionId, IcePayload, Role, SdpPayload, SessionId, SessionPayload, Signal,
    SignalingEnvelope, ViewerPayload,
};

use super::link::{LinkPhase, ViewerLink};
use super::sink::SignalSink;

/// Outcome of a camera switch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchReport {
    /// Links now sending the new track
    pub switched: Vec<ConnectionId>,
    /// Links that kept the previous track because in-place replacement is unsupported
    pub kept_previous: Vec<ConnectionId>,
    /// Links where replacement failed outright
    pub failed: Vec<(ConnectionId, String)>,
}

impl SwitchReport {
    pub fn is_complete(&self) -> bool {
        self.kept_previous.is_empty() && self.failed.is_empty()
    }
}

/// Local requests for a running broadcaster
#[derive(Debug)]
pub enum BroadcasterCommand {
    Start,
    Stop,
    SwitchVideo {
        device: String,
        reply: oneshot::Sender<Result<SwitchReport>>,
    },
    Shutdown,
}

/// Fans one broadcaster out to N independent viewer links
pub struct BroadcasterOrchestrator {
    session: SessionId,
    sink: Arc<dyn SignalSink>,
    factory: Arc<dyn PeerConnectionFactory>,
    relays: Arc<dyn RelayConfigSource>,
    media: Arc<dyn MediaSource>,
    constraints: MediaConstraints,
    token: Option<String>,
    links: HashMap<ConnectionId, ViewerLink>,
    ledger: TrackLedger,
    joined: bool,
    live: bool,
    close_timeout: Duration,
}

impl BroadcasterOrchestrator {
    pub fn new(
        session: SessionId,
        sink: Arc<dyn SignalSink>,
        factory: Arc<dyn PeerConnectionFactory>,
        relays: Arc<dyn RelayConfigSource>,
        media: Arc<dyn MediaSource>,
    ) -> Self {
        Self {
            session,
            sink,
            factory,
            relays,
            media,
            constraints: MediaConstraints::default(),
            token: None,
            links: HashMap::new(),
            ledger: TrackLedger::new(),
            joined: false,
            live: false,
            close_timeout: Duration::from_secs(5),
        }
    }

    /// Credential presented with admin requests
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_constraints(mut self, constraints: MediaConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// How long a single link may take to close
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn link_phase(&self, viewer: ConnectionId) -> Option<LinkPhase> {
        self.links.get(&viewer).map(|l| l.phase())
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Tracks new links receive
    pub fn active_tracks(&self) -> Vec<LocalTrack> {
        self.ledger.active()
    }

    fn request(&self) -> SessionPayload {
        let payload = SessionPayload::new(self.session.clone());
        match &self.token {
            Some(token) => payload.with_token(token.clone()),
            None => payload,
        }
    }

    async fn send(&self, signal: Signal) -> Result<()> {
        self.sink
            .send(SignalingEnvelope::new(signal).from_role(Role::Broadcaster))
            .await
    }

    /// Register as the session's broadcaster
    pub async fn join(&mut self) -> Result<()> {
        self.send(Signal::AdminJoin(self.request())).await?;
        self.joined = true;
        Ok(())
    }

    /// Capture local media if needed and ask the hub to go live
    pub async fn start(&mut self) -> Result<()> {
        if self.ledger.active().is_empty() {
            let tracks = self.media.acquire(&self.constraints).await?;
            for track in tracks {
                let orphans = self.ledger.activate(track);
                self.stop_tracks(orphans).await;
            }
        }

        if !self.joined {
            self.join().await?;
        }

        tracing::info!(session = %self.session, "Requesting stream start");
        self.send(Signal::AdminStreamStart(self.request())).await
    }

    /// Ask the hub to stop the stream; links are released on `stream-stopped`
    pub async fn stop(&mut self) -> Result<()> {
        tracing::info!(session = %self.session, "Requesting stream stop");
        self.send(Signal::AdminStreamStop(self.request())).await
    }

    /// React to one envelope from the hub
    pub async fn handle(&mut self, envelope: SignalingEnvelope) -> Result<()> {
        match envelope.into_signal() {
            Signal::AdminJoined(event) => {
                tracing::info!(session = %event.session_id, "Joined as broadcaster");
                self.joined = true;
            }
            Signal::StreamStarted(_) => {
                tracing::info!(session = %self.session, "Stream live");
                self.live = true;
            }
            Signal::ViewerJoined(ViewerPayload { viewer_id }) => {
                self.open_link(viewer_id).await?;
            }
            Signal::ViewerLeft(ViewerPayload { viewer_id }) => {
                self.close_link(viewer_id).await;
            }
            Signal::Offer(SdpPayload {
                sdp,
                viewer_id: Some(viewer),
            }) => match self.links.get(&viewer) {
                Some(link) => link.offer(sdp),
                None => tracing::debug!(viewer = %viewer, "Offer for unknown link dropped"),
            },
            Signal::IceCandidate(IcePayload {
                candidate,
                viewer_id: Some(viewer),
                from_broadcaster: false,
            }) => match self.links.get(&viewer) {
                Some(link) => link.candidate(candidate),
                None => tracing::debug!(viewer = %viewer, "Candidate for unknown link dropped"),
            },
            Signal::StreamStopped(_) => {
                tracing::info!(session = %self.session, links = self.links.len(), "Stream stopped");
                self.live = false;
                self.joined = false;
                self.teardown().await;
            }
            Signal::Superseded(_) => {
                tracing::warn!(session = %self.session, "Superseded by another broadcaster");
                self.live = false;
                self.joined = false;
                self.teardown().await;
            }
            Signal::Error(error) => {
                tracing::warn!(session = %self.session, message = %error.message, "Hub refused request");
            }
            other => {
                tracing::debug!(kind = other.kind(), "Ignoring envelope");
            }
        }

        Ok(())
    }

    async fn open_link(&mut self, viewer: ConnectionId) -> Result<()> {
        if self.links.contains_key(&viewer) {
            // Viewer rejoined; its old link is useless now
            self.close_link(viewer).await;
        }

        let relays = self.relays.relay_servers().await?;
        let tracks = self.ledger.active();
        let link = ViewerLink::open(
            self.session.clone(),
            viewer,
            self.factory.as_ref(),
            &relays,
            &tracks,
            Arc::clone(&self.sink),
        )
        .await?;

        for track in &tracks {
            self.ledger.hold(viewer, track);
        }
        self.links.insert(viewer, link);

        tracing::info!(
            session = %self.session,
            viewer = %viewer,
            links = self.links.len(),
            "Viewer link created"
        );
        Ok(())
    }

    async fn close_link(&mut self, viewer: ConnectionId) {
        let Some(link) = self.links.remove(&viewer) else {
            return;
        };

        if let Err(e) = link.close(self.close_timeout).await {
            tracing::warn!(viewer = %viewer, error = %e, "Link close failed");
        }
        let orphans = self.ledger.release_owner(viewer);
        self.stop_tracks(orphans).await;
    }

    /// Close every link concurrently
    ///
    /// A link that fails or hangs while closing does not keep the others
    /// open, and every link is released either way. Returns the links that
    /// did not close cleanly, with the reason.
    pub async fn close_all(&mut self) -> Vec<(ConnectionId, Error)> {
        let links: Vec<(ConnectionId, ViewerLink)> = self.links.drain().collect();
        let wait = self.close_timeout;

        let results = join_all(
            links
                .into_iter()
                .map(|(viewer, link)| async move { (viewer, link.close(wait).await) }),
        )
        .await;

        let mut failed = Vec::new();
        for (viewer, result) in results {
            if let Err(e) = result {
                tracing::warn!(viewer = %viewer, error = %e, "Link close failed");
                failed.push((viewer, e));
            }
            let orphans = self.ledger.release_owner(viewer);
            self.stop_tracks(orphans).await;
        }

        failed
    }

    async fn teardown(&mut self) {
        self.close_all().await;
        let orphans = self.ledger.deactivate_all();
        self.stop_tracks(orphans).await;
    }

    /// Switch the camera feeding every open link
    ///
    /// Audio is left alone. Links whose backend cannot replace a track in
    /// place keep the previous camera until they are renegotiated.
    pub async fn switch_video_source(&mut self, device: impl Into<String>) -> Result<SwitchReport> {
        let device = device.into();
        let acquired = self.media.acquire(&MediaConstraints::camera(device.clone())).await?;
        let mut new_track = None;
        for track in acquired {
            if track.kind == TrackKind::Video && new_track.is_none() {
                new_track = Some(track);
            } else {
                self.media.stop(&track).await;
            }
        }
        let new_track = new_track
            .ok_or_else(|| Error::MediaSource(format!("{} produced no video track", device)))?;

        let previous = self.ledger.active_of(TrackKind::Video);
        let mut report = SwitchReport::default();

        let viewers: Vec<ConnectionId> = self.links.keys().copied().collect();
        for viewer in viewers {
            let Some(link) = self.links.get(&viewer) else {
                continue;
            };
            if !link.phase().is_open() {
                continue;
            }

            match link.replace_track(new_track.clone()).await {
                Ok(()) => {
                    let orphan = match &previous {
                        Some(old) => self.ledger.swap(viewer, old.id, &new_track),
                        None => {
                            self.ledger.hold(viewer, &new_track);
                            None
                        }
                    };
                    self.stop_tracks(orphan.into_iter().collect()).await;
                    report.switched.push(viewer);
                }
                Err(Error::Unsupported(reason)) => {
                    tracing::debug!(viewer = %viewer, reason = %reason, "Link keeps previous camera");
                    report.kept_previous.push(viewer);
                }
                Err(e) => {
                    tracing::warn!(viewer = %viewer, error = %e, "Camera switch failed on link");
                    report.failed.push((viewer, e.to_string()));
                }
            }
        }

        let orphans = self.ledger.activate(new_track);
        self.stop_tracks(orphans).await;
        self.constraints.video_device = Some(device.clone());

        report.switched.sort();
        report.kept_previous.sort();
        report.failed.sort();

        tracing::info!(
            session = %self.session,
            device = %device,
            switched = report.switched.len(),
            kept = report.kept_previous.len(),
            "Camera switched"
        );
        Ok(report)
    }

    async fn stop_tracks(&self, tracks: Vec<LocalTrack>) {
        for track in tracks {
            self.media.stop(&track).await;
        }
    }

    /// Drive the orchestrator from the hub inbox and a command channel
    ///
    /// Returns once the hub connection closes or `Shutdown` is received;
    /// every link is closed on the way out.
    pub async fn run(
        mut self,
        mut inbox: mpsc::Receiver<SignalingEnvelope>,
        commands: mpsc::Receiver<BroadcasterCommand>,
    ) -> Result<()> {
        let mut commands = Some(commands);

        loop {
            let next = tokio::select! {
                envelope = inbox.recv() => Next::Envelope(envelope),
                command = recv_command(&mut commands) => Next::Command(command),
            };

            match next {
                Next::Envelope(Some(envelope)) => {
                    if let Err(e) = self.handle(envelope).await {
                        tracing::warn!(session = %self.session, error = %e, "Envelope handling failed");
                    }
                }
                Next::Envelope(None) => {
                    tracing::info!(session = %self.session, "Hub connection closed");
                    break;
                }
                Next::Command(Some(BroadcasterCommand::Shutdown)) => break,
                Next::Command(Some(command)) => self.handle_command(command).await,
                Next::Command(None) => commands = None,
            }
        }

        self.teardown().await;
        Ok(())
    }

    async fn handle_command(&mut self, command: BroadcasterCommand) {
        let result = match command {
            BroadcasterCommand::Start => self.start().await,
            BroadcasterCommand::Stop => self.stop().await,
            BroadcasterCommand::SwitchVideo { device, reply } => {
                let _ = reply.send(self.switch_video_source(device).await);
                Ok(())
            }
            BroadcasterCommand::Shutdown => Ok(()),
        };

        if let Err(e) = result {
            tracing::warn!(session = %self.session, error = %e, "Command failed");
        }
    }
}

enum Next {
    Envelope(Option<SignalingEnvelope>),
    Command(Option<BroadcasterCommand>),
}

async fn recv_command(
    commands: &mut Option<mpsc::Receiver<BroadcasterCommand>>,
) -> Option<BroadcasterCommand> {
    match commands {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;
    use crate::peer::{LoopbackFactory, LoopbackMedia, LoopbackOptions, StaticRelayConfig};
    use crate::protocol::IceCandidate;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<SignalingEnvelope>>,
    }

    #[async_trait]
    impl SignalSink for RecordingSink {
        async fn send(&self, envelope: SignalingEnvelope) -> Result<()> {
            self.sent.lock().await.push(envelope);
            Ok(())
        }
    }

    impl RecordingSink {
        async fn kinds(&self) -> Vec<&'static str> {
            self.sent.lock().await.iter().map(|e| e.kind()).collect()
        }
    }

    struct Fixture {
        orchestrator: BroadcasterOrchestrator,
        sink: Arc<RecordingSink>,
        factory: Arc<LoopbackFactory>,
        media: Arc<LoopbackMedia>,
    }

    fn fixture(options: LoopbackOptions) -> Fixture {
        let sink = Arc::new(RecordingSink::default());
        let factory = Arc::new(LoopbackFactory::with_options(options));
        let media = Arc::new(LoopbackMedia::new());
        let orchestrator = BroadcasterOrchestrator::new(
            "s1".into(),
            sink.clone(),
            factory.clone(),
            Arc::new(StaticRelayConfig::default()),
            media.clone(),
        );
        Fixture {
            orchestrator,
            sink,
            factory,
            media,
        }
    }

    fn event(signal: Signal) -> SignalingEnvelope {
        SignalingEnvelope::new(signal)
    }

    fn offer_from(viewer: ConnectionId) -> SignalingEnvelope {
        event(Signal::Offer(SdpPayload {
            sdp: "v=0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=recvonly\r\n".into(),
            viewer_id: Some(viewer),
        }))
        .from_role(Role::Viewer)
    }

    async fn wait_connected(orchestrator: &BroadcasterOrchestrator, viewer: ConnectionId) {
        let mut rx = orchestrator.links[&viewer].watch_phase();
        tokio::time::timeout(
            Duration::from_secs(1),
            rx.wait_for(|p| *p == LinkPhase::Connected),
        )
        .await
        .expect("timed out")
        .expect("link gone");
    }

    #[tokio::test]
    async fn test_start_acquires_media_and_joins() {
        let mut f = fixture(LoopbackOptions::default());

        f.orchestrator.start().await.unwrap();

        assert_eq!(f.sink.kinds().await, vec!["admin-join", "admin-stream-start"]);
        assert_eq!(f.orchestrator.active_tracks().len(), 2);
    }

    #[tokio::test]
    async fn test_one_link_per_viewer_and_nothing_sent_before_offer() {
        let mut f = fixture(LoopbackOptions::default());
        f.orchestrator.start().await.unwrap();
        f.orchestrator.handle(event(Signal::stream_started("s1".into()))).await.unwrap();
        let baseline = f.sink.kinds().await.len();

        for id in [10, 11, 12] {
            f.orchestrator
                .handle(event(Signal::viewer_joined(ConnectionId(id))))
                .await
                .unwrap();
        }
        f.orchestrator
            .handle(event(Signal::viewer_left(ConnectionId(11))))
            .await
            .unwrap();

        assert_eq!(f.orchestrator.link_count(), 2);
        assert_eq!(f.orchestrator.link_phase(ConnectionId(10)), Some(LinkPhase::Negotiating));
        assert_eq!(f.orchestrator.link_phase(ConnectionId(11)), None);
        assert_eq!(f.sink.kinds().await.len(), baseline);
        assert_eq!(f.factory.created().await, 3);
    }

    #[tokio::test]
    async fn test_offer_answered_and_candidates_ordered() {
        let mut f = fixture(LoopbackOptions::default());
        let viewer = ConnectionId(10);
        f.orchestrator.start().await.unwrap();
        f.orchestrator.handle(event(Signal::viewer_joined(viewer))).await.unwrap();

        for c in ["c1", "c2"] {
            f.orchestrator
                .handle(event(Signal::ice(IceCandidate::new(c), Some(viewer), false)))
                .await
                .unwrap();
        }
        f.orchestrator.handle(offer_from(viewer)).await.unwrap();
        wait_connected(&f.orchestrator, viewer).await;

        let answer = f
            .sink
            .sent
            .lock()
            .await
            .iter()
            .find(|e| e.kind() == "answer")
            .cloned()
            .unwrap();
        assert_eq!(answer.target_id(), Some(viewer));

        let probe = f.factory.probe(0).await.unwrap();
        assert_eq!(probe.applied_candidates().await, vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn test_stream_stopped_closes_all_links_and_releases_camera() {
        let mut f = fixture(LoopbackOptions::default());
        f.orchestrator.start().await.unwrap();
        for id in [10, 11] {
            f.orchestrator
                .handle(event(Signal::viewer_joined(ConnectionId(id))))
                .await
                .unwrap();
        }

        f.orchestrator.handle(event(Signal::stream_stopped("s1".into()))).await.unwrap();

        assert_eq!(f.orchestrator.link_count(), 0);
        for probe in f.factory.probes().await {
            assert!(probe.is_closed().await);
        }
        assert_eq!(f.media.stopped().await.len(), 2);
        assert!(f.orchestrator.active_tracks().is_empty());
    }

    #[tokio::test]
    async fn test_restart_rejoins() {
        let mut f = fixture(LoopbackOptions::default());
        f.orchestrator.start().await.unwrap();
        f.orchestrator.handle(event(Signal::stream_stopped("s1".into()))).await.unwrap();

        f.orchestrator.start().await.unwrap();

        assert_eq!(
            f.sink.kinds().await,
            vec!["admin-join", "admin-stream-start", "admin-join", "admin-stream-start"]
        );
    }

    #[tokio::test]
    async fn test_switch_camera_in_place() {
        let mut f = fixture(LoopbackOptions::default());
        let viewer = ConnectionId(10);
        f.orchestrator.start().await.unwrap();
        f.orchestrator.handle(event(Signal::viewer_joined(viewer))).await.unwrap();
        f.orchestrator.handle(offer_from(viewer)).await.unwrap();
        wait_connected(&f.orchestrator, viewer).await;

        let old_video = f.orchestrator.ledger.active_of(TrackKind::Video).unwrap();
        let audio = f.orchestrator.ledger.active_of(TrackKind::Audio).unwrap();
        let report = f.orchestrator.switch_video_source("rear").await.unwrap();

        assert_eq!(report.switched, vec![viewer]);
        assert!(report.is_complete());
        assert_eq!(f.orchestrator.link_phase(viewer), Some(LinkPhase::Connected));

        let new_video = f.orchestrator.ledger.active_of(TrackKind::Video).unwrap();
        assert_eq!(new_video.label, "rear");
        assert_eq!(f.orchestrator.ledger.active_of(TrackKind::Audio), Some(audio.clone()));
        assert_eq!(f.media.stopped().await, vec![old_video.id]);

        let senders = f.factory.probe(0).await.unwrap().sender_tracks().await;
        assert!(senders.contains(&new_video.id));
        assert!(senders.contains(&audio.id));
    }

    #[tokio::test]
    async fn test_switch_camera_unsupported_keeps_previous() {
        let mut f = fixture(LoopbackOptions::default().without_replace_track());
        let viewer = ConnectionId(10);
        f.orchestrator.start().await.unwrap();
        f.orchestrator.handle(event(Signal::viewer_joined(viewer))).await.unwrap();
        let old_video = f.orchestrator.ledger.active_of(TrackKind::Video).unwrap();

        let report = f.orchestrator.switch_video_source("rear").await.unwrap();

        assert_eq!(report.kept_previous, vec![viewer]);
        assert!(!report.is_complete());
        // Still carried by the link, so not stopped
        assert!(f.media.stopped().await.is_empty());
        assert_eq!(f.orchestrator.ledger.holders(old_video.id), 1);
    }

    #[tokio::test]
    async fn test_superseded_tears_down() {
        let mut f = fixture(LoopbackOptions::default());
        f.orchestrator.start().await.unwrap();
        f.orchestrator.handle(event(Signal::stream_started("s1".into()))).await.unwrap();
        f.orchestrator
            .handle(event(Signal::viewer_joined(ConnectionId(10))))
            .await
            .unwrap();
        f.orchestrator
            .handle(event(Signal::viewer_joined(ConnectionId(11))))
            .await
            .unwrap();

        f.orchestrator
            .handle(event(Signal::Superseded(crate::protocol::SessionEvent {
                session_id: "s1".into(),
            })))
            .await
            .unwrap();

        // Every peer is already closed when the handler returns
        assert!(!f.orchestrator.is_live());
        assert_eq!(f.orchestrator.link_count(), 0);
        for peer in f.factory.probes().await {
            assert!(peer.is_closed().await);
        }
    }

    async fn four_viewers_with_broken_closes() -> Fixture {
        let mut f = fixture(LoopbackOptions::default().fail_close_of(1).hang_close_of(2));
        f.orchestrator = f.orchestrator.close_timeout(Duration::from_millis(100));
        f.orchestrator.start().await.unwrap();
        for id in [10, 11, 12, 13] {
            f.orchestrator
                .handle(event(Signal::viewer_joined(ConnectionId(id))))
                .await
                .unwrap();
        }
        f
    }

    #[tokio::test]
    async fn test_close_all_reports_failed_and_hung_links() {
        let mut f = four_viewers_with_broken_closes().await;

        let mut failed = f.orchestrator.close_all().await;
        failed.sort_by_key(|(viewer, _)| *viewer);

        assert_eq!(failed.len(), 2);
        assert_eq!(failed[0].0, ConnectionId(11));
        assert!(matches!(failed[0].1, Error::PeerConnection(_)));
        assert_eq!(failed[1].0, ConnectionId(12));
        assert!(matches!(failed[1].1, Error::Timeout(_)));

        assert_eq!(f.orchestrator.link_count(), 0);
        let peers = f.factory.probes().await;
        assert!(peers[0].is_closed().await);
        assert!(peers[3].is_closed().await);
    }

    #[tokio::test]
    async fn test_stream_stopped_survives_broken_closes() {
        let mut f = four_viewers_with_broken_closes().await;

        f.orchestrator.handle(event(Signal::stream_stopped("s1".into()))).await.unwrap();

        assert_eq!(f.orchestrator.link_count(), 0);
        let peers = f.factory.probes().await;
        assert!(peers[0].is_closed().await);
        assert!(peers[3].is_closed().await);
        assert!(!peers[2].is_closed().await);
        assert_eq!(f.media.stopped().await.len(), 2);
        assert!(f.orchestrator.active_tracks().is_empty());
    }
}
