//! Stream metadata collaborator
//!
//! The hub only reads from the directory ("is this session active?"). The
//! control layer writes to it when an authorized broadcaster starts or stops
//! a stream.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::protocol::SessionId;

/// How a session's stream is delivered to viewers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Peer links negotiated through this hub
    #[default]
    Webrtc,
    /// Embedded YouTube live stream
    Youtube,
    /// Embedded Zoom meeting
    Zoom,
}

/// Stored stream settings for a session
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    pub kind: StreamKind,
    /// Id of the stream on the external platform, when not `webrtc`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

/// Stream metadata store
#[async_trait]
pub trait StreamDirectory: Send + Sync {
    /// Whether the session is currently marked active
    async fn is_active(&self, session: &SessionId) -> bool;

    /// Mark a session active or inactive
    async fn set_active(&self, session: &SessionId, active: bool);

    /// Stored stream settings, if any
    async fn stream_config(&self, session: &SessionId) -> Option<StreamConfig>;

    /// Replace stored stream settings
    async fn set_stream_config(&self, session: &SessionId, config: StreamConfig);
}

#[derive(Debug, Default, Clone)]
struct DirectoryEntry {
    active: bool,
    config: Option<StreamConfig>,
}

/// In-process [`StreamDirectory`]
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    entries: RwLock<HashMap<SessionId, DirectoryEntry>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StreamDirectory for MemoryDirectory {
    async fn is_active(&self, session: &SessionId) -> bool {
        self.entries
            .read()
            .await
            .get(session)
            .map(|e| e.active)
            .unwrap_or(false)
    }

    async fn set_active(&self, session: &SessionId, active: bool) {
        let mut entries = self.entries.write().await;
        entries.entry(session.clone()).or_default().active = active;

        tracing::debug!(session = %session, active = active, "Directory updated");
    }

    async fn stream_config(&self, session: &SessionId) -> Option<StreamConfig> {
        self.entries
            .read()
            .await
            .get(session)
            .and_then(|e| e.config.clone())
    }

    async fn set_stream_config(&self, session: &SessionId, config: StreamConfig) {
        let mut entries = self.entries.write().await;
        entries.entry(session.clone()).or_default().config = Some(config);
    }
}
