//! Connection registry for signaling routing
//!
//! The registry tracks live transport connections, the role each one plays,
//! and the stream session it joined. It is owned by a single hub task and is
//! never shared, so it needs no locks.
//!
//! # Architecture
//!
//! ```text
//!                        ConnectionRegistry
//!               ┌──────────────────────────────────┐
//!               │ connections: HashMap<ConnId,     │
//!               │   ConnectionEntry { role,        │
//!               │     session, outbox } >          │
//!               │ sessions: HashMap<SessionId,     │
//!               │   StreamSession { state:         │
//!               │     Idle{b?} | Live{b},          │
//!               │     viewers } >                  │
//!               └────────────────┬─────────────────┘
//!                                │
//!        ┌───────────────────────┼───────────────────────┐
//!        ▼                       ▼                       ▼
//!   [Broadcaster]            [Viewer]                [Viewer]
//!   broadcaster_of()         viewers_of()            viewers_of()
//! ```

pub mod connection;
pub mod error;
pub mod session;
pub mod store;

pub use connection::{ConnectionEntry, JoinOutcome, LeftSession, Outbox, RemovedConnection};
pub use error::RegistryError;
pub use session::{SessionPhase, SessionState, StreamSession};
pub use store::ConnectionRegistry;
