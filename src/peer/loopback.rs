//! In-memory peer backend
//!
//! Deterministic [`PeerConnection`] and [`MediaSource`] implementations that
//! record every call. Descriptions are plain SDP-like text; a connection
//! reports itself connected once both descriptions are set, and a remote
//! description that sends media surfaces as [`PeerEvent::RemoteTrack`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::error::{Error, Result};
use crate::protocol::IceCandidate;

use super::track::{LocalTrack, MediaConstraints, MediaSource, RemoteTrack, TrackId};
use super::{
    PeerConnection, PeerConnectionFactory, PeerEvent, PeerEvents, PeerState, RelayServer,
    SdpKind, SenderId, SessionDescription, TrackKind,
};

/// Behaviour switches for loopback peers
#[derive(Debug, Clone)]
pub struct LoopbackOptions {
    pub replace_track: bool,
    pub fail_negotiation: bool,
    pub local_candidates: usize,
    pub auto_connect: bool,
    /// Peers, by creation index, whose `close` returns an error
    pub fail_close: HashSet<usize>,
    /// Peers, by creation index, whose `close` never completes
    pub hang_close: HashSet<usize>,
}

impl Default for LoopbackOptions {
    fn default() -> Self {
        Self {
            replace_track: true,
            fail_negotiation: false,
            local_candidates: 1,
            auto_connect: true,
            fail_close: HashSet::new(),
            hang_close: HashSet::new(),
        }
    }
}

impl LoopbackOptions {
    /// Peers refuse in-place track replacement
    pub fn without_replace_track(mut self) -> Self {
        self.replace_track = false;
        self
    }

    /// Peers reject every remote description
    pub fn fail_negotiation(mut self) -> Self {
        self.fail_negotiation = true;
        self
    }

    /// Number of local candidates gathered per local description
    pub fn local_candidates(mut self, count: usize) -> Self {
        self.local_candidates = count;
        self
    }

    /// Never report the connection as connected
    pub fn manual_connect(mut self) -> Self {
        self.auto_connect = false;
        self
    }

    /// The `index`th peer created fails to close
    pub fn fail_close_of(mut self, index: usize) -> Self {
        self.fail_close.insert(index);
        self
    }

    /// The `index`th peer created hangs in `close`
    pub fn hang_close_of(mut self, index: usize) -> Self {
        self.hang_close.insert(index);
        self
    }
}

/// One recorded call on a loopback peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCall {
    AddTrack(TrackId),
    AddReceiver(TrackKind),
    ReplaceTrack(SenderId, TrackId),
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpKind),
    SetRemote(SdpKind),
    AddCandidate(String),
    Close,
}

#[derive(Debug)]
struct PeerRecord {
    calls: Vec<PeerCall>,
    senders: Vec<(SenderId, LocalTrack)>,
    receivers: Vec<TrackKind>,
    local: Option<SdpKind>,
    remote: Option<SessionDescription>,
    state: PeerState,
    closed: bool,
}

impl PeerRecord {
    fn new() -> Self {
        Self {
            calls: Vec::new(),
            senders: Vec::new(),
            receivers: Vec::new(),
            local: None,
            remote: None,
            state: PeerState::New,
            closed: false,
        }
    }
}

type SharedRecord = Arc<Mutex<PeerRecord>>;

/// Read access to a loopback peer's record
#[derive(Debug, Clone)]
pub struct LoopbackProbe {
    record: SharedRecord,
}

impl LoopbackProbe {
    pub async fn calls(&self) -> Vec<PeerCall> {
        self.record.lock().await.calls.clone()
    }

    /// Remote candidates applied, in order
    pub async fn applied_candidates(&self) -> Vec<String> {
        self.record
            .lock()
            .await
            .calls
            .iter()
            .filter_map(|c| match c {
                PeerCall::AddCandidate(candidate) => Some(candidate.clone()),
                _ => None,
            })
            .collect()
    }

    /// Track currently behind each sender
    pub async fn sender_tracks(&self) -> Vec<TrackId> {
        self.record
            .lock()
            .await
            .senders
            .iter()
            .map(|(_, t)| t.id)
            .collect()
    }

    pub async fn state(&self) -> PeerState {
        self.record.lock().await.state
    }

    pub async fn is_closed(&self) -> bool {
        self.record.lock().await.closed
    }
}

/// Factory producing [`LoopbackPeer`]s
#[derive(Debug, Default)]
pub struct LoopbackFactory {
    options: LoopbackOptions,
    peers: Mutex<Vec<SharedRecord>>,
}

impl LoopbackFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: LoopbackOptions) -> Self {
        Self {
            options,
            peers: Mutex::new(Vec::new()),
        }
    }

    /// Probe for the `index`th peer created
    pub async fn probe(&self, index: usize) -> Option<LoopbackProbe> {
        self.peers.lock().await.get(index).map(|record| LoopbackProbe {
            record: Arc::clone(record),
        })
    }

    pub async fn probes(&self) -> Vec<LoopbackProbe> {
        self.peers
            .lock()
            .await
            .iter()
            .map(|record| LoopbackProbe {
                record: Arc::clone(record),
            })
            .collect()
    }

    pub async fn created(&self) -> usize {
        self.peers.lock().await.len()
    }
}

#[async_trait]
impl PeerConnectionFactory for LoopbackFactory {
    async fn create(&self, relays: &[RelayServer]) -> Result<(Box<dyn PeerConnection>, PeerEvents)> {
        let (events, rx) = mpsc::unbounded_channel();
        let record = Arc::new(Mutex::new(PeerRecord::new()));

        let mut peers = self.peers.lock().await;
        let index = peers.len();
        peers.push(Arc::clone(&record));

        tracing::debug!(peer = index, relays = relays.len(), "Loopback peer created");

        let peer = LoopbackPeer {
            index,
            options: self.options.clone(),
            record,
            events,
        };
        Ok((Box::new(peer), rx))
    }
}

/// Recording in-memory peer connection
pub struct LoopbackPeer {
    index: usize,
    options: LoopbackOptions,
    record: SharedRecord,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl LoopbackPeer {
    fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }

    fn render(&self, record: &PeerRecord) -> String {
        let mut sdp = format!(
            "v=0\r\no=loopback {} {} IN IP4 127.0.0.1\r\ns=-\r\n",
            self.index,
            record.calls.len()
        );
        for (_, track) in &record.senders {
            sdp.push_str(&format!("m={} 9 UDP/TLS/RTP/SAVPF 96\r\na=sendonly\r\na=msid:- {}\r\n", track.kind, track.id));
        }
        for kind in &record.receivers {
            sdp.push_str(&format!("m={} 9 UDP/TLS/RTP/SAVPF 96\r\na=recvonly\r\n", kind));
        }
        sdp
    }

    /// Media kinds the remote side sends
    fn remote_senders(sdp: &str) -> Vec<TrackKind> {
        let mut kinds = Vec::new();
        let mut current = None;
        for line in sdp.lines() {
            if let Some(media) = line.strip_prefix("m=") {
                current = match media.split_whitespace().next() {
                    Some("audio") => Some(TrackKind::Audio),
                    Some("video") => Some(TrackKind::Video),
                    _ => None,
                };
            } else if line == "a=sendonly" || line == "a=sendrecv" {
                if let Some(kind) = current.take() {
                    kinds.push(kind);
                }
            }
        }
        kinds
    }

    fn maybe_connect(&self, record: &mut PeerRecord) {
        if !self.options.auto_connect || record.state == PeerState::Connected {
            return;
        }
        if record.local.is_some() && record.remote.is_some() {
            record.state = PeerState::Connecting;
            self.emit(PeerEvent::StateChanged(PeerState::Connecting));
            record.state = PeerState::Connected;
            self.emit(PeerEvent::StateChanged(PeerState::Connected));
        }
    }

    fn ensure_open(record: &PeerRecord) -> Result<()> {
        if record.closed {
            Err(Error::PeerConnection("connection closed".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PeerConnection for LoopbackPeer {
    async fn add_track(&self, track: &LocalTrack) -> Result<SenderId> {
        let mut record = self.record.lock().await;
        Self::ensure_open(&record)?;

        let sender = SenderId(record.senders.len() as u32);
        record.senders.push((sender, track.clone()));
        record.calls.push(PeerCall::AddTrack(track.id));
        Ok(sender)
    }

    async fn add_receiver(&self, kind: TrackKind) -> Result<()> {
        let mut record = self.record.lock().await;
        Self::ensure_open(&record)?;

        record.receivers.push(kind);
        record.calls.push(PeerCall::AddReceiver(kind));
        Ok(())
    }

    async fn replace_track(&self, sender: SenderId, track: &LocalTrack) -> Result<()> {
        if !self.options.replace_track {
            return Err(Error::Unsupported("in-place track replacement".into()));
        }

        let mut record = self.record.lock().await;
        Self::ensure_open(&record)?;

        let slot = record
            .senders
            .iter_mut()
            .find(|(id, _)| *id == sender)
            .ok_or_else(|| Error::PeerConnection(format!("unknown sender {:?}", sender)))?;
        slot.1 = track.clone();
        record.calls.push(PeerCall::ReplaceTrack(sender, track.id));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let mut record = self.record.lock().await;
        Self::ensure_open(&record)?;

        record.calls.push(PeerCall::CreateOffer);
        Ok(SessionDescription::offer(self.render(&record)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let mut record = self.record.lock().await;
        Self::ensure_open(&record)?;

        match record.remote.as_ref().map(|d| d.kind) {
            Some(SdpKind::Offer) => {}
            _ => return Err(Error::Negotiation("no remote offer to answer".into())),
        }
        record.calls.push(PeerCall::CreateAnswer);
        Ok(SessionDescription::answer(self.render(&record)))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let mut record = self.record.lock().await;
        Self::ensure_open(&record)?;

        record.calls.push(PeerCall::SetLocal(description.kind));
        record.local = Some(description.kind);

        for n in 0..self.options.local_candidates {
            self.emit(PeerEvent::LocalCandidate(IceCandidate {
                candidate: format!(
                    "candidate:{} 1 udp 2122260223 127.0.0.1 {} typ host",
                    n + 1,
                    50000 + self.index * 10 + n
                ),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
            }));
        }

        self.maybe_connect(&mut record);
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let mut record = self.record.lock().await;
        Self::ensure_open(&record)?;

        if self.options.fail_negotiation {
            return Err(Error::Negotiation(format!(
                "remote {:?} rejected",
                description.kind
            )));
        }

        record.calls.push(PeerCall::SetRemote(description.kind));
        for kind in Self::remote_senders(&description.sdp) {
            self.emit(PeerEvent::RemoteTrack(RemoteTrack {
                id: format!("{}-{}", kind, self.index),
                kind,
            }));
        }
        record.remote = Some(description);

        self.maybe_connect(&mut record);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut record = self.record.lock().await;
        Self::ensure_open(&record)?;

        if record.remote.is_none() {
            return Err(Error::Negotiation(
                "candidate applied before remote description".into(),
            ));
        }
        record.calls.push(PeerCall::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.options.hang_close.contains(&self.index) {
            std::future::pending::<()>().await;
        }

        let mut record = self.record.lock().await;
        if record.closed {
            return Ok(());
        }
        if self.options.fail_close.contains(&self.index) {
            record.state = PeerState::Failed;
            return Err(Error::PeerConnection("close failed".into()));
        }

        record.closed = true;
        record.state = PeerState::Closed;
        record.calls.push(PeerCall::Close);
        self.emit(PeerEvent::StateChanged(PeerState::Closed));
        Ok(())
    }
}

/// Fake capture devices
#[derive(Debug)]
pub struct LoopbackMedia {
    next_id: AtomicU64,
    unavailable: HashSet<String>,
    stopped: Mutex<Vec<TrackId>>,
}

impl Default for LoopbackMedia {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            unavailable: HashSet::new(),
            stopped: Mutex::new(Vec::new()),
        }
    }
}

impl LoopbackMedia {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make acquiring `device` fail
    pub fn unavailable_device(mut self, device: impl Into<String>) -> Self {
        self.unavailable.insert(device.into());
        self
    }

    /// Tracks stopped so far, in order
    pub async fn stopped(&self) -> Vec<TrackId> {
        self.stopped.lock().await.clone()
    }

    fn track(&self, kind: TrackKind, label: String) -> LocalTrack {
        LocalTrack {
            id: TrackId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            kind,
            label,
        }
    }
}

#[async_trait]
impl MediaSource for LoopbackMedia {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<Vec<LocalTrack>> {
        let mut tracks = Vec::new();

        if constraints.video {
            let device = constraints
                .video_device
                .clone()
                .unwrap_or_else(|| "default-camera".to_owned());
            if self.unavailable.contains(&device) {
                return Err(Error::MediaSource(format!("camera {} unavailable", device)));
            }
            tracks.push(self.track(TrackKind::Video, device));
        }
        if constraints.audio {
            tracks.push(self.track(TrackKind::Audio, "microphone".to_owned()));
        }

        Ok(tracks)
    }

    async fn stop(&self, track: &LocalTrack) {
        tracing::debug!(track = %track.id, label = %track.label, "Track stopped");
        self.stopped.lock().await.push(track.id);
    }
}
