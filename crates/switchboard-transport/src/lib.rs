//! # switchboard-transport
//!
//! Transport adapters for the Switchboard hub.
//!
//! A transport hands the core a duplex, message-framed [`Connection`]. The
//! connection is split exactly once into an owned [`FrameReader`] and an
//! owned [`FrameWriter`], so only one task can ever write to it.
//!
//! - **WebSocket** - axum upgrade adapter used by the server
//! - **Memory** - channel-backed pair used in tests and embedding
//!
//! ```rust,ignore
//! use switchboard_transport::{Connection, FrameReader};
//!
//! async fn pump<C: Connection>(conn: C) {
//!     let (mut reader, _writer) = conn.split();
//!     while let Ok(Some(frame)) = reader.recv().await {
//!         // Route frame
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{CloseSignal, Connection, FrameReader, FrameWriter, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketConnection};
