//! WebSocket signaling server
//!
//! Accepts connections, upgrades them to WebSocket and bridges each one to
//! the [`hub`](crate::hub). Admin requests are checked by an [`Authorizer`]
//! on the way in.

pub mod config;
pub mod connection;
pub mod handler;
pub mod listener;

pub use config::ServerConfig;
pub use handler::{AllowAll, AuthResult, Authorizer, StaticTokenAuthorizer};
pub use listener::SignalServer;
