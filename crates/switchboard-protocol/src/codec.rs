//! JSON codec for envelopes.
//!
//! Inbound frames are decoded leniently: missing or `null` fields take their
//! defaults, any client-supplied `sender` is dropped, and an unknown `type` yields
//! [`Inbound::Unrecognized`] rather than an error. Only malformed JSON or an
//! oversize frame is an error.

use serde::Deserialize;
use thiserror::Error;

use crate::envelope::{Envelope, Inbound, MessageKind};

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Inbound shape: `sender` is deliberately absent so that whatever the
/// client put there is never read.
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

/// Encode an envelope as a JSON text frame.
///
/// # Errors
///
/// Returns an error if serialization fails or the result is too large.
pub fn encode(envelope: &Envelope) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(envelope)?;

    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(text)
}

/// Decode one inbound frame.
///
/// The returned envelope always has an empty `sender`.
///
/// # Errors
///
/// Returns an error if the frame is too large or is not a JSON object of
/// the expected shape.
pub fn decode(data: &[u8]) -> Result<Inbound, ProtocolError> {
    decode_with_limit(data, MAX_FRAME_SIZE)
}

/// Decode one inbound frame, rejecting anything larger than `max_size` bytes.
///
/// # Errors
///
/// See [`decode`].
pub fn decode_with_limit(data: &[u8], max_size: usize) -> Result<Inbound, ProtocolError> {
    if data.len() > max_size {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    let raw: RawEnvelope = serde_json::from_slice(data)?;
    let raw_kind = raw.kind.unwrap_or_default();

    let Ok(kind) = MessageKind::try_from(raw_kind.as_str()) else {
        return Ok(Inbound::Unrecognized(raw_kind));
    };

    Ok(Inbound::Envelope(Envelope {
        kind,
        target: raw.target,
        content: raw.content.unwrap_or_default(),
        sender: String::new(),
    }))
}
