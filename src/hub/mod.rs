//! Signaling hub
//!
//! Admits broadcasters and viewers, routes negotiation envelopes between
//! them and emits session lifecycle events. Media never passes through here.
//!
//! # Architecture
//!
//! ```text
//!   ws session ─┐                                   ┌─> outbox ─> ws session
//!   ws session ─┼─> HubCommand ─> [hub task] ───────┼─> outbox ─> ws session
//!   HubHandle  ─┘   (unbounded,   SignalingHub      └─> outbox ─> in-process
//!                    in order)     └ ConnectionRegistry
//!                                  └ StreamDirectory (read off the loop)
//! ```
//!
//! Commands are handled one at a time, so registry updates are never torn.
//! Deliveries use `try_send`: a connection that stops draining its outbox
//! loses messages instead of stalling the hub.

pub mod config;
pub mod directory;
pub mod runtime;
pub mod signaling;

pub use self::config::HubConfig;
pub use self::directory::{MemoryDirectory, StreamConfig, StreamDirectory, StreamKind};
pub use self::runtime::{spawn_hub, HubCommand, HubConnection, HubHandle, HubSender};
pub use self::signaling::{PendingAdmission, SessionSnapshot, SignalingHub, ViewerAdmission};
