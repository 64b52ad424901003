//! Content transformation for the `_special` message kinds.
//!
//! The transform sits between "message received" and "message routed": the
//! client read task applies it once, then hands the result to the same
//! fan-out as the plain kind.

use switchboard_protocol::{Envelope, MessageKind};

/// A deterministic rewrite of envelope content.
pub trait Transform: Send + Sync {
    /// Rewrite `envelope`. Called once per transformed message.
    fn apply(&self, envelope: Envelope) -> Envelope;
}

/// Prefixes content, with one prefix for each transformed kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixTransform {
    /// Prefix for `broadcast_special`.
    pub broadcast_prefix: String,
    /// Prefix for `private_special`.
    pub direct_prefix: String,
}

impl PrefixTransform {
    /// Create a transform with the given prefixes.
    #[must_use]
    pub fn new(broadcast_prefix: impl Into<String>, direct_prefix: impl Into<String>) -> Self {
        Self {
            broadcast_prefix: broadcast_prefix.into(),
            direct_prefix: direct_prefix.into(),
        }
    }
}

impl Default for PrefixTransform {
    fn default() -> Self {
        Self::new("ALARM: ", "SECURE MSG: ")
    }
}

impl Transform for PrefixTransform {
    fn apply(&self, mut envelope: Envelope) -> Envelope {
        let prefix = match envelope.kind {
            MessageKind::BroadcastSpecial => &self.broadcast_prefix,
            MessageKind::PrivateSpecial => &self.direct_prefix,
            MessageKind::Broadcast | MessageKind::Private => return envelope,
        };
        envelope.content.insert_str(0, prefix);
        envelope
    }
}
