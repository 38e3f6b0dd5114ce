//! Outbound signaling seam

use async_trait::async_trait;

use crate::error::Result;
use crate::hub::HubSender;
use crate::protocol::SignalingEnvelope;

/// Where an orchestrator sends its envelopes
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn send(&self, envelope: SignalingEnvelope) -> Result<()>;
}

#[async_trait]
impl SignalSink for HubSender {
    async fn send(&self, envelope: SignalingEnvelope) -> Result<()> {
        HubSender::send(self, envelope)
    }
}
