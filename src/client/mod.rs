//! Peer link orchestration
//!
//! Client-side halves of the system:
//! - [`BroadcasterOrchestrator`] fans one local feed out to a peer link per viewer
//! - [`ViewerOrchestrator`] negotiates the single link to the broadcaster
//!
//! Both send through a [`SignalSink`]: an in-process [`HubSender`](crate::hub::HubSender)
//! or a WebSocket [`SignalingClient`].

pub mod broadcaster;
pub mod link;
pub mod sink;
pub mod transport;
pub mod viewer;

pub use broadcaster::{BroadcasterCommand, BroadcasterOrchestrator, SwitchReport};
pub use link::{LinkPhase, ViewerLink};
pub use sink::SignalSink;
pub use transport::SignalingClient;
pub use viewer::{ViewerOrchestrator, ViewerPhase};
