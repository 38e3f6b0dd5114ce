//! Candidates received ahead of the remote description

use std::collections::VecDeque;

use crate::protocol::IceCandidate;

/// FIFO of remote candidates waiting for a remote description
#[derive(Debug, Default)]
pub struct PendingCandidateQueue {
    queue: VecDeque<IceCandidate>,
}

impl PendingCandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: IceCandidate) {
        self.queue.push_back(candidate);
    }

    /// Take every queued candidate in arrival order
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.queue.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
