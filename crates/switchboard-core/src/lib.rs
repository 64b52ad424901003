//! # switchboard-core
//!
//! Real-time fan-out hub for the Switchboard messaging service.
//!
//! This crate provides the building blocks:
//!
//! - **Hub** - single-task router that owns the client registry
//! - **Session** - per-connection read and write tasks, and the bootstrap
//!   that registers a connection as a client
//! - **Id** - unguessable client identifiers
//! - **Transform** - content rewrite for the `_special` message kinds
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  register/unregister  ┌─────────────┐
//! │ read task   │──────────────────────▶│             │
//! │ (per client)│  broadcast/direct     │     Hub     │
//! └─────────────┘──────────────────────▶│  (1 task)   │
//!                                       └──────┬──────┘
//!                                              │ try_send
//!                                              ▼
//! ┌─────────────┐     outbound queue    ┌─────────────┐
//! │ write task  │◀──────────────────────│   bounded   │
//! │ (per client)│                       │    queue    │
//! └─────────────┘                       └─────────────┘
//! ```

pub mod hub;
pub mod id;
pub mod session;
pub mod transform;

pub use hub::{Hub, HubConfig, HubError, HubHandle, HubStats, Registration, SessionId};
pub use id::{ClientId, IdError, IdSource, SecureIds};
pub use session::{ConnectError, Connector, Session, SessionConfig};
pub use transform::{PrefixTransform, Transform};
