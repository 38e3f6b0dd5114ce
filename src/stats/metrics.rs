//! Statistics for the signaling hub

use std::time::{Duration, Instant};

/// Hub-wide counters
///
/// Maintained by the hub task; callers get copies through
/// [`HubHandle::stats`](crate::hub::HubHandle::stats).
#[derive(Debug, Clone)]
pub struct HubStats {
    /// Total connections ever attached
    pub total_connections: u64,
    /// Currently attached connections
    pub active_connections: u64,
    /// Sessions currently referenced by a broadcaster or viewer
    pub sessions: u64,
    /// Sessions currently live
    pub live_sessions: u64,
    /// Offers, answers and candidates forwarded
    pub envelopes_relayed: u64,
    /// Envelopes dropped (routing misses, full or closed outboxes)
    pub envelopes_dropped: u64,
    /// Viewer joins refused
    pub viewers_rejected: u64,
    /// When the hub started
    pub started_at: Instant,
}

impl HubStats {
    pub fn new() -> Self {
        Self {
            total_connections: 0,
            active_connections: 0,
            sessions: 0,
            live_sessions: 0,
            envelopes_relayed: 0,
            envelopes_dropped: 0,
            viewers_rejected: 0,
            started_at: Instant::now(),
        }
    }

    /// Time since the hub started
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Share of relayed traffic that was dropped
    pub fn drop_ratio(&self) -> f64 {
        let total = self.envelopes_relayed + self.envelopes_dropped;
        if total > 0 {
            self.envelopes_dropped as f64 / total as f64
        } else {
            0.0
        }
    }
}

impl Default for HubStats {
    fn default() -> Self {
        Self::new()
    }
}
