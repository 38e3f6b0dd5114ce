//! # live-signal
//!
//! Signaling for one-to-many live camera broadcasts.
//!
//! A single broadcaster per session sends its camera and microphone to any
//! number of viewers over direct peer links. This crate carries everything
//! except the media itself:
//!
//! - [`hub`]: admits broadcasters and viewers, relays offers, answers and
//!   candidates between them, and announces session lifecycle events
//! - [`server`]: the WebSocket front end for the hub
//! - [`client`]: broadcaster and viewer orchestrators that drive one peer
//!   link per viewer
//! - [`peer`]: the seam to a peer media stack, plus an in-process loopback
//!   backend
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use live_signal::hub::MemoryDirectory;
//! use live_signal::server::{AllowAll, ServerConfig, SignalServer};
//!
//! #[tokio::main]
//! async fn main() -> live_signal::Result<()> {
//!     let config = ServerConfig::default();
//!     let server = SignalServer::new(config, AllowAll, Arc::new(MemoryDirectory::new()));
//!     server.run().await
//! }
//! ```

pub mod client;
pub mod error;
pub mod hub;
pub mod peer;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod stats;

pub use error::{Error, Result};
pub use hub::{spawn_hub, HubConfig, HubHandle, SignalingHub};
pub use protocol::{ConnectionId, Role, SessionId, Signal, SignalingEnvelope};
pub use server::{ServerConfig, SignalServer};
