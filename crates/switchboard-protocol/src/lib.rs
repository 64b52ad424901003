//! # switchboard-protocol
//!
//! Wire format for the Switchboard messaging hub.
//!
//! Every frame exchanged with a client is a JSON object with four fields:
//!
//! - `type` - one of `broadcast`, `broadcast_special`, `private`, `private_special`
//! - `target` - recipient client ID, only meaningful for the `private` kinds
//! - `content` - the payload
//! - `sender` - assigned by the server on ingress
//!
//! ## Example
//!
//! ```rust
//! use switchboard_protocol::{codec, Envelope, Inbound};
//!
//! let envelope = Envelope::private("ws_zz99", "secret").with_sender("ws_ab12cd34");
//!
//! let encoded = codec::encode(&envelope).unwrap();
//! match codec::decode(encoded.as_bytes()).unwrap() {
//!     Inbound::Envelope(decoded) => assert_eq!(decoded.content, "secret"),
//!     Inbound::Unrecognized(kind) => panic!("unexpected kind {kind}"),
//! }
//! ```

pub mod codec;
pub mod envelope;

pub use codec::{decode, encode, ProtocolError};
pub use envelope::{Envelope, Inbound, MessageKind};
