//! Offer/answer exchange for one peer link
//!
//! Owns the peer connection together with its pending-candidate queue so the
//! ordering rule holds in one place: a remote candidate is applied only once
//! a remote description exists, and queued candidates are applied in arrival
//! order right after it is set.

use crate::error::{Error, Result};
use crate::protocol::IceCandidate;

use super::candidates::PendingCandidateQueue;
use super::{PeerConnection, SessionDescription};

/// What happened to a remote candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDisposition {
    Applied,
    Queued,
}

/// Negotiation state of one peer link
pub struct Negotiation {
    peer: Box<dyn PeerConnection>,
    pending: PendingCandidateQueue,
    remote_set: bool,
    closed: bool,
}

impl Negotiation {
    pub fn new(peer: Box<dyn PeerConnection>) -> Self {
        Self {
            peer,
            pending: PendingCandidateQueue::new(),
            remote_set: false,
            closed: false,
        }
    }

    pub fn peer(&self) -> &dyn PeerConnection {
        self.peer.as_ref()
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote_set
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Create an offer and install it locally; returns its SDP
    pub async fn create_offer(&mut self) -> Result<String> {
        self.ensure_open()?;

        let offer = self.peer.create_offer().await?;
        let sdp = offer.sdp.clone();
        self.peer.set_local_description(offer).await?;
        Ok(sdp)
    }

    /// Apply a remote offer and produce the local answer
    pub async fn answer_offer(&mut self, sdp: String) -> Result<String> {
        self.ensure_open()?;

        self.peer
            .set_remote_description(SessionDescription::offer(sdp))
            .await?;
        self.remote_set = true;
        self.drain_pending().await;

        let answer = self.peer.create_answer().await?;
        let sdp = answer.sdp.clone();
        self.peer.set_local_description(answer).await?;
        Ok(sdp)
    }

    /// Apply the remote answer to an offer created here
    pub async fn accept_answer(&mut self, sdp: String) -> Result<()> {
        self.ensure_open()?;

        self.peer
            .set_remote_description(SessionDescription::answer(sdp))
            .await?;
        self.remote_set = true;
        self.drain_pending().await;
        Ok(())
    }

    /// Apply a remote candidate now, or hold it until the remote description
    pub async fn add_remote_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<CandidateDisposition> {
        self.ensure_open()?;

        if !self.remote_set {
            self.pending.push(candidate);
            return Ok(CandidateDisposition::Queued);
        }

        self.peer.add_ice_candidate(candidate).await?;
        Ok(CandidateDisposition::Applied)
    }

    /// A bad candidate only loses that path; the rest still apply.
    async fn drain_pending(&mut self) {
        for candidate in self.pending.drain() {
            if let Err(e) = self.peer.add_ice_candidate(candidate).await {
                tracing::warn!(error = %e, "Queued candidate rejected");
            }
        }
    }

    /// Close the peer connection; repeated calls are no-ops
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        self.closed = true;
        self.pending.clear();
        self.peer.close().await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::Negotiation("peer link closed".into()))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::loopback::{LoopbackFactory, LoopbackOptions, PeerCall};
    use crate::peer::{PeerConnectionFactory, SdpKind, TrackKind};

    async fn negotiation(factory: &LoopbackFactory) -> Negotiation {
        let (peer, _events) = factory.create(&[]).await.unwrap();
        Negotiation::new(peer)
    }

    #[tokio::test]
    async fn test_candidates_before_description_applied_in_order() {
        let factory = LoopbackFactory::new();
        let mut negotiation = negotiation(&factory).await;

        for c in ["c1", "c2", "c3"] {
            let disposition = negotiation
                .add_remote_candidate(IceCandidate::new(c))
                .await
                .unwrap();
            assert_eq!(disposition, CandidateDisposition::Queued);
        }
        assert_eq!(negotiation.pending_candidates(), 3);

        let probe = factory.probe(0).await.unwrap();
        assert!(probe.applied_candidates().await.is_empty());

        negotiation.answer_offer("v=0 remote".into()).await.unwrap();

        assert_eq!(probe.applied_candidates().await, vec!["c1", "c2", "c3"]);
        assert_eq!(negotiation.pending_candidates(), 0);

        let calls = probe.calls().await;
        let remote_at = calls
            .iter()
            .position(|c| *c == PeerCall::SetRemote(SdpKind::Offer))
            .unwrap();
        let first_candidate = calls
            .iter()
            .position(|c| matches!(c, PeerCall::AddCandidate(_)))
            .unwrap();
        assert!(remote_at < first_candidate);
    }

    #[tokio::test]
    async fn test_candidate_after_description_applied_immediately() {
        let factory = LoopbackFactory::new();
        let mut negotiation = negotiation(&factory).await;

        negotiation.peer().add_receiver(TrackKind::Video).await.unwrap();
        negotiation.create_offer().await.unwrap();
        negotiation.accept_answer("v=0 remote".into()).await.unwrap();

        let disposition = negotiation
            .add_remote_candidate(IceCandidate::new("late"))
            .await
            .unwrap();

        assert_eq!(disposition, CandidateDisposition::Applied);
        assert!(negotiation.has_remote_description());
    }

    #[tokio::test]
    async fn test_failed_remote_description_surfaces() {
        let factory = LoopbackFactory::with_options(LoopbackOptions::default().fail_negotiation());
        let mut negotiation = negotiation(&factory).await;

        let err = negotiation.answer_offer("garbage".into()).await.unwrap_err();

        assert!(err.is_negotiation_failure());
        assert!(!negotiation.has_remote_description());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let factory = LoopbackFactory::new();
        let mut negotiation = negotiation(&factory).await;

        negotiation.close().await.unwrap();
        negotiation.close().await.unwrap();

        assert!(negotiation.is_closed());
        assert!(negotiation.create_offer().await.is_err());
        let probe = factory.probe(0).await.unwrap();
        assert_eq!(
            probe.calls().await.iter().filter(|c| **c == PeerCall::Close).count(),
            1
        );
    }
}
