//! Authorization seam for admin requests
//!
//! The signaling server asks an [`Authorizer`] before forwarding
//! `admin-join`, `admin-stream-start` or `admin-stream-stop` to the hub.
//! Viewers are never authorized here; whether they get in depends on the
//! session phase and the stream directory.

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::protocol::SessionId;

/// Result of an authorization check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    /// Let the request through
    Accept,
    /// Refuse with a reason reported to the client
    Reject(String),
}

impl AuthResult {
    pub fn is_accept(&self) -> bool {
        matches!(self, AuthResult::Accept)
    }
}

/// Gate in front of broadcaster privileges
#[async_trait]
pub trait Authorizer: Send + Sync + 'static {
    /// Called for each accepted TCP connection; `false` drops it
    async fn on_connection(&self, _peer: SocketAddr) -> bool {
        true
    }

    /// Whether the holder of `token` may act as broadcaster of `session`
    async fn authorize(&self, session: &SessionId, token: Option<&str>) -> AuthResult;
}

/// Accepts everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _session: &SessionId, _token: Option<&str>) -> AuthResult {
        AuthResult::Accept
    }
}

/// Accepts requests carrying one shared admin token
#[derive(Debug, Clone)]
pub struct StaticTokenAuthorizer {
    token: String,
}

impl StaticTokenAuthorizer {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl Authorizer for StaticTokenAuthorizer {
    async fn authorize(&self, session: &SessionId, token: Option<&str>) -> AuthResult {
        match token {
            Some(token) if token == self.token => AuthResult::Accept,
            Some(_) => {
                tracing::warn!(session = %session, "Admin token mismatch");
                AuthResult::Reject("invalid admin token".into())
            }
            None => AuthResult::Reject("admin token required".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allow_all() {
        let session = SessionId::new("s1");
        assert!(AllowAll.authorize(&session, None).await.is_accept());
        assert!(AllowAll.on_connection("127.0.0.1:1".parse().unwrap()).await);
    }

    #[tokio::test]
    async fn test_static_token() {
        let auth = StaticTokenAuthorizer::new("hunter2");
        let session = SessionId::new("s1");

        assert_eq!(auth.authorize(&session, Some("hunter2")).await, AuthResult::Accept);
        assert_eq!(
            auth.authorize(&session, Some("nope")).await,
            AuthResult::Reject("invalid admin token".into())
        );
        assert_eq!(
            auth.authorize(&session, None).await,
            AuthResult::Reject("admin token required".into())
        );
    }
}
