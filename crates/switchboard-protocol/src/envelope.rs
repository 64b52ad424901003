//! Message envelope types.
//!
//! The envelope is the unit of routing: the hub fans it out unchanged
//! apart from the server-assigned `sender`.

use serde::{Deserialize, Serialize};

/// Routing kind of an envelope, carried in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Deliver to every connected client.
    #[serde(rename = "broadcast")]
    Broadcast,
    /// Transform the content, then deliver to every connected client.
    #[serde(rename = "broadcast_special")]
    BroadcastSpecial,
    /// Deliver to the client named in `target`.
    #[serde(rename = "private")]
    Private,
    /// Transform the content, then deliver to the client named in `target`.
    #[serde(rename = "private_special")]
    PrivateSpecial,
}

impl MessageKind {
    /// The wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Broadcast => "broadcast",
            MessageKind::BroadcastSpecial => "broadcast_special",
            MessageKind::Private => "private",
            MessageKind::PrivateSpecial => "private_special",
        }
    }

    /// Whether this kind addresses a single client.
    #[must_use]
    pub fn is_direct(&self) -> bool {
        matches!(self, MessageKind::Private | MessageKind::PrivateSpecial)
    }

    /// Whether the content passes through the transform step before routing.
    #[must_use]
    pub fn is_transformed(&self) -> bool {
        matches!(
            self,
            MessageKind::BroadcastSpecial | MessageKind::PrivateSpecial
        )
    }
}

impl TryFrom<&str> for MessageKind {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "broadcast" => Ok(MessageKind::Broadcast),
            "broadcast_special" => Ok(MessageKind::BroadcastSpecial),
            "private" => Ok(MessageKind::Private),
            "private_special" => Ok(MessageKind::PrivateSpecial),
            _ => Err("Unrecognized message type"),
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A routed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Routing kind.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Recipient client ID for the direct kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Opaque payload.
    #[serde(default)]
    pub content: String,
    /// ID of the submitting client. Always set by the server.
    #[serde(default)]
    pub sender: String,
}

impl Envelope {
    /// Create an envelope of the given kind with no target and no sender.
    #[must_use]
    pub fn new(kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            target: None,
            content: content.into(),
            sender: String::new(),
        }
    }

    /// Create a broadcast envelope.
    #[must_use]
    pub fn broadcast(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Broadcast, content)
    }

    /// Create a private envelope addressed to `target`.
    #[must_use]
    pub fn private(target: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(MessageKind::Private, content).with_target(target)
    }

    /// Set the kind.
    #[must_use]
    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the recipient.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Set the sender.
    #[must_use]
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }
}

/// Result of decoding one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A frame with a recognized `type`.
    Envelope(Envelope),
    /// Well-formed JSON whose `type` is not one of the routed kinds.
    Unrecognized(String),
}
