//! Relay server configuration
//!
//! Relay and reflection servers are supplied from outside; this crate only
//! passes them to the peer connection factory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One relay/reflection server entry, in browser `iceServers` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl RelayServer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, credential: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.credential = Some(credential.into());
        self
    }

    /// Parse a comma-separated list of `url` or `url|username|credential`
    pub fn parse_list(input: &str) -> Result<Vec<RelayServer>> {
        input
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(Self::parse_entry)
            .collect()
    }

    fn parse_entry(entry: &str) -> Result<RelayServer> {
        let mut parts = entry.split('|');
        let url = parts.next().unwrap_or_default().trim();

        if !(url.starts_with("stun:") || url.starts_with("turn:") || url.starts_with("turns:")) {
            return Err(Error::RelayConfig(format!("unsupported relay url: {}", url)));
        }

        let server = RelayServer::new(url);
        match (parts.next(), parts.next(), parts.next()) {
            (None, _, _) => Ok(server),
            (Some(username), Some(credential), None) => {
                Ok(server.with_credentials(username.trim(), credential.trim()))
            }
            _ => Err(Error::RelayConfig(format!("malformed relay entry: {}", entry))),
        }
    }
}

/// Where relay servers come from
#[async_trait]
pub trait RelayConfigSource: Send + Sync {
    async fn relay_servers(&self) -> Result<Vec<RelayServer>>;
}

/// Fixed relay list
#[derive(Debug, Clone, Default)]
pub struct StaticRelayConfig {
    servers: Vec<RelayServer>,
}

impl StaticRelayConfig {
    pub fn new(servers: Vec<RelayServer>) -> Self {
        Self { servers }
    }
}

#[async_trait]
impl RelayConfigSource for StaticRelayConfig {
    async fn relay_servers(&self) -> Result<Vec<RelayServer>> {
        Ok(self.servers.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        let servers = RelayServer::parse_list(
            "stun:stun.l.google.com:19302, turn:relay.example.com:3478|alice|secret,",
        )
        .unwrap();

        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0], RelayServer::new("stun:stun.l.google.com:19302"));
        assert_eq!(servers[1].username.as_deref(), Some("alice"));
        assert_eq!(servers[1].credential.as_deref(), Some("secret"));
    }

    #[test]
    fn test_parse_rejects_bad_entries() {
        assert!(RelayServer::parse_list("http://example.com").is_err());
        assert!(RelayServer::parse_list("turn:x|only-user").is_err());
        assert!(RelayServer::parse_list("").unwrap().is_empty());
    }

    #[test]
    fn test_browser_shape() {
        let json = serde_json::to_value(RelayServer::new("stun:a").with_credentials("u", "p")).unwrap();

        assert_eq!(json["urls"][0], "stun:a");
        assert_eq!(json["username"], "u");
        assert_eq!(json["credential"], "p");
    }

    #[tokio::test]
    async fn test_static_source() {
        let source = StaticRelayConfig::new(vec![RelayServer::new("stun:a")]);
        assert_eq!(source.relay_servers().await.unwrap().len(), 1);
    }
}
