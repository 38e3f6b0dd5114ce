//! Local and remote media tracks

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::ConnectionId;

use super::TrackKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub u64);

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "track-{}", self.0)
    }
}

/// Captured track owned by the broadcaster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    pub id: TrackId,
    pub kind: TrackKind,
    /// Device label, e.g. the camera name
    pub label: String,
}

/// Track received from the remote side of a peer link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
}

/// What to capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
    /// Specific camera to use; `None` picks the default one
    pub video_device: Option<String>,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
            video_device: None,
        }
    }
}

impl MediaConstraints {
    /// Video only, from a specific camera
    pub fn camera(device: impl Into<String>) -> Self {
        Self {
            audio: false,
            video: true,
            video_device: Some(device.into()),
        }
    }

    pub fn video_device(mut self, device: impl Into<String>) -> Self {
        self.video_device = Some(device.into());
        self
    }
}

/// Capture device access
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Open the tracks described by `constraints`
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<Vec<LocalTrack>>;

    /// Stop capturing a track
    async fn stop(&self, track: &LocalTrack);
}

#[derive(Debug)]
struct LedgerEntry {
    track: LocalTrack,
    holders: HashSet<ConnectionId>,
    active: bool,
}

/// Reference bookkeeping for local tracks
///
/// A track stays alive while it is part of the active set or attached to at
/// least one peer link. Every method that can drop the last reference
/// returns the tracks that should now be stopped.
#[derive(Debug, Default)]
pub struct TrackLedger {
    entries: BTreeMap<TrackId, LedgerEntry>,
}

impl TrackLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks new peer links should receive, in id order
    pub fn active(&self) -> Vec<LocalTrack> {
        self.entries
            .values()
            .filter(|e| e.active)
            .map(|e| e.track.clone())
            .collect()
    }

    pub fn active_of(&self, kind: TrackKind) -> Option<LocalTrack> {
        self.entries
            .values()
            .find(|e| e.active && e.track.kind == kind)
            .map(|e| e.track.clone())
    }

    /// Make `track` the active track of its kind
    pub fn activate(&mut self, track: LocalTrack) -> Vec<LocalTrack> {
        let kind = track.kind;
        let previous: Vec<TrackId> = self
            .entries
            .values()
            .filter(|e| e.active && e.track.kind == kind && e.track.id != track.id)
            .map(|e| e.track.id)
            .collect();

        self.entries
            .entry(track.id)
            .or_insert_with(|| LedgerEntry {
                track,
                holders: HashSet::new(),
                active: false,
            })
            .active = true;

        let mut orphans = Vec::new();
        for id in previous {
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.active = false;
            }
            orphans.extend(self.take_if_unused(id));
        }
        orphans
    }

    /// Drop every track from the active set
    pub fn deactivate_all(&mut self) -> Vec<LocalTrack> {
        let ids: Vec<TrackId> = self.entries.keys().copied().collect();
        let mut orphans = Vec::new();
        for id in ids {
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.active = false;
            }
            orphans.extend(self.take_if_unused(id));
        }
        orphans
    }

    /// Record that `owner`'s link carries `track`
    pub fn hold(&mut self, owner: ConnectionId, track: &LocalTrack) {
        self.entries
            .entry(track.id)
            .or_insert_with(|| LedgerEntry {
                track: track.clone(),
                holders: HashSet::new(),
                active: false,
            })
            .holders
            .insert(owner);
    }

    /// Move `owner` from track `old` to `new`
    pub fn swap(&mut self, owner: ConnectionId, old: TrackId, new: &LocalTrack) -> Option<LocalTrack> {
        self.hold(owner, new);
        if let Some(entry) = self.entries.get_mut(&old) {
            entry.holders.remove(&owner);
        }
        self.take_if_unused(old)
    }

    /// Release everything `owner` holds
    pub fn release_owner(&mut self, owner: ConnectionId) -> Vec<LocalTrack> {
        let held: Vec<TrackId> = self
            .entries
            .iter_mut()
            .filter_map(|(id, e)| e.holders.remove(&owner).then_some(*id))
            .collect();

        held.into_iter()
            .filter_map(|id| self.take_if_unused(id))
            .collect()
    }

    /// Tracks `owner`'s link carries
    pub fn held_by(&self, owner: ConnectionId) -> Vec<LocalTrack> {
        self.entries
            .values()
            .filter(|e| e.holders.contains(&owner))
            .map(|e| e.track.clone())
            .collect()
    }

    pub fn holders(&self, id: TrackId) -> usize {
        self.entries.get(&id).map(|e| e.holders.len()).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn take_if_unused(&mut self, id: TrackId) -> Option<LocalTrack> {
        let unused = self
            .entries
            .get(&id)
            .map(|e| !e.active && e.holders.is_empty())
            .unwrap_or(false);

        if unused {
            self.entries.remove(&id).map(|e| e.track)
        } else {
            None
        }
    }
}
