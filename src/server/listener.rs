//! Signaling server listener
//!
//! Handles the TCP accept loop and spawns connection handlers.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::hub::{spawn_hub, HubHandle, SignalingHub, StreamDirectory};
use crate::protocol::SessionId;
use crate::server::config::ServerConfig;
use crate::server::connection::Connection;
use crate::server::handler::Authorizer;

/// WebSocket signaling server
///
/// Owns the hub task. Must be created inside a Tokio runtime.
pub struct SignalServer<A: Authorizer> {
    config: ServerConfig,
    authorizer: Arc<A>,
    directory: Arc<dyn StreamDirectory>,
    hub: HubHandle,
    _hub_task: JoinHandle<()>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl<A: Authorizer> SignalServer<A> {
    /// Create a new server and start its hub
    pub fn new(config: ServerConfig, authorizer: A, directory: Arc<dyn StreamDirectory>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        let hub = SignalingHub::new(config.hub_config(), Arc::clone(&directory));
        let (hub, hub_task) = spawn_hub(hub);

        Self {
            config,
            authorizer: Arc::new(authorizer),
            directory,
            hub,
            _hub_task: hub_task,
            connection_semaphore,
        }
    }

    /// Handle to the running hub, for in-process clients and control calls
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    pub fn directory(&self) -> &Arc<dyn StreamDirectory> {
        &self.directory
    }

    /// Take a session live from the control path
    ///
    /// Marks the directory first so viewers joining right after are admitted.
    pub async fn start_stream(&self, session: &SessionId) -> Result<()> {
        self.directory.set_active(session, true).await;
        let result = self.hub.start_stream(session.clone()).await;
        if result.is_err() {
            self.directory.set_active(session, false).await;
        }
        result
    }

    /// Stop a session's stream from the control path
    pub async fn stop_stream(&self, session: &SessionId) -> Result<()> {
        self.directory.set_active(session, false).await;
        self.hub.stop_stream(session.clone()).await
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "Signaling server listening");

        self.accept_loop(&listener).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve_until(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve_until<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(addr = %listener.local_addr()?, "Signaling server listening");

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        }
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        if !self.authorizer.on_connection(peer_addr).await {
            tracing::debug!(peer = %peer_addr, "Connection refused by authorizer");
            return;
        }

        tracing::debug!(peer = %peer_addr, "New connection");

        if let Err(e) = self.configure_socket(&socket) {
            tracing::error!(error = %e, "Failed to configure socket");
            return;
        }

        let mut connection = Connection::new(
            peer_addr,
            self.config.clone(),
            Arc::clone(&self.authorizer),
            Arc::clone(&self.directory),
            self.hub.clone(),
        );

        tokio::spawn(async move {
            let _permit = permit;

            if let Err(e) = connection.run(socket).await {
                tracing::debug!(peer = %peer_addr, error = %e, "Connection error");
            }

            tracing::debug!(peer = %peer_addr, "Connection closed");
        });
    }

    fn configure_socket(&self, socket: &TcpStream) -> std::io::Result<()> {
        if self.config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }
        Ok(())
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}

impl<A: Authorizer> Drop for SignalServer<A> {
    fn drop(&mut self) {
        self.hub.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::hub::MemoryDirectory;
    use crate::protocol::{Role, SessionPayload, Signal, SignalingEnvelope};
    use crate::server::handler::AllowAll;

    fn server() -> SignalServer<AllowAll> {
        SignalServer::new(
            ServerConfig::default().max_connections(4),
            AllowAll,
            Arc::new(MemoryDirectory::new()),
        )
    }

    #[tokio::test]
    async fn test_control_start_marks_directory() {
        let server = server();
        let session = SessionId::new("s1");
        let mut broadcaster = server.hub().connect().unwrap();

        broadcaster
            .send(
                SignalingEnvelope::new(Signal::AdminJoin(SessionPayload::new(session.clone())))
                    .from_role(Role::Broadcaster),
            )
            .unwrap();
        let joined = timeout(Duration::from_secs(1), broadcaster.recv()).await.unwrap();
        assert_eq!(joined.unwrap().kind(), "admin-joined");

        assert_ok!(server.start_stream(&session).await);
        assert!(server.directory().is_active(&session).await);

        assert_ok!(server.stop_stream(&session).await);
        assert!(!server.directory().is_active(&session).await);
    }

    #[tokio::test]
    async fn test_control_start_without_broadcaster_reverts_directory() {
        let server = server();
        let session = SessionId::new("nobody");

        assert_err!(server.start_stream(&session).await);
        assert!(!server.directory().is_active(&session).await);
    }

    #[tokio::test]
    async fn test_bind_addr() {
        let server = server();
        assert_eq!(server.bind_addr().port(), 8765);
    }
}
