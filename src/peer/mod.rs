//! Peer media connection seam
//!
//! The orchestrators never touch a media stack directly. They drive a
//! [`PeerConnection`] built by a [`PeerConnectionFactory`] and observe it
//! through a stream of [`PeerEvent`]s.
//!
//! ```text
//!   orchestrator ──> Negotiation ──> PeerConnection (loopback, webrtc, ...)
//!        ▲              └ PendingCandidateQueue            │
//!        └──────────────── PeerEvent ◄─────────────────────┘
//! ```

pub mod candidates;
pub mod loopback;
pub mod negotiation;
pub mod relay;
pub mod track;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::IceCandidate;

pub use candidates::PendingCandidateQueue;
pub use loopback::{LoopbackFactory, LoopbackMedia, LoopbackOptions, LoopbackProbe, PeerCall};
pub use negotiation::{CandidateDisposition, Negotiation};
pub use relay::{RelayConfigSource, RelayServer, StaticRelayConfig};
pub use track::{LocalTrack, MediaConstraints, MediaSource, RemoteTrack, TrackId, TrackLedger};

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackKind {
    Audio,
    Video,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// Handle to one outgoing track slot of a peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SenderId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Session description with its type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Connectivity state reported by the media stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Asynchronous notification from a peer connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// Local network-path candidate to trickle to the remote side
    LocalCandidate(IceCandidate),
    StateChanged(PeerState),
    /// Remote side started sending a track
    RemoteTrack(RemoteTrack),
}

/// Event stream of one peer connection
pub type PeerEvents = mpsc::UnboundedReceiver<PeerEvent>;

/// One direct media connection to a remote endpoint
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Attach an outgoing track
    async fn add_track(&self, track: &LocalTrack) -> Result<SenderId>;

    /// Ask to receive a track of `kind` without sending one
    async fn add_receiver(&self, kind: TrackKind) -> Result<()>;

    /// Swap the track behind `sender` without renegotiating
    ///
    /// Backends that cannot do this return [`Error::Unsupported`](crate::Error::Unsupported).
    async fn replace_track(&self, sender: SenderId, track: &LocalTrack) -> Result<()>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Release every resource held by the connection
    async fn close(&self) -> Result<()>;
}

/// Builds peer connections
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(&self, relays: &[RelayServer]) -> Result<(Box<dyn PeerConnection>, PeerEvents)>;
}
