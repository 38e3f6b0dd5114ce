//! Server configuration

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::hub::HubConfig;
use crate::peer::RelayServer;

/// Default signaling port
pub const DEFAULT_PORT: u16 = 8765;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Capacity of each connection's outbound queue
    pub outbox_capacity: usize,

    /// WebSocket upgrade must complete within this time
    pub handshake_timeout: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Relay servers handed to clients, supplied externally
    pub relays: Vec<RelayServer>,

    /// Consult the stream directory before admitting a viewer
    pub require_directory_active: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_connections: 0, // Unlimited
            outbox_capacity: 256,
            handshake_timeout: Duration::from_secs(10),
            tcp_nodelay: true, // Signaling is latency bound
            relays: Vec::new(),
            require_directory_active: true,
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the per-connection outbox capacity
    pub fn outbox_capacity(mut self, capacity: usize) -> Self {
        self.outbox_capacity = capacity.max(1);
        self
    }

    /// Set handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the relay servers list
    pub fn relays(mut self, relays: Vec<RelayServer>) -> Self {
        self.relays = relays;
        self
    }

    /// Admit viewers on session phase alone
    pub fn skip_directory_check(mut self) -> Self {
        self.require_directory_active = false;
        self
    }

    /// Hub settings derived from this config
    pub fn hub_config(&self) -> HubConfig {
        let config = HubConfig::default().outbox_capacity(self.outbox_capacity);
        if self.require_directory_active {
            config
        } else {
            config.skip_directory_check()
        }
    }
}
