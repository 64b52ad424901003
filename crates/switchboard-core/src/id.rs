//! Client identifiers.
//!
//! Client IDs double as direct-message addresses, so they are drawn from the
//! operating system's secure random source and must not be guessable.

use rand::rngs::OsRng;
use rand::TryRngCore;
use std::borrow::Borrow;
use std::fmt;
use thiserror::Error;

/// Prefix carried by every generated ID.
pub const ID_PREFIX: &str = "ws_";

/// Number of random characters after the prefix.
pub const ID_RANDOM_LEN: usize = 8;

/// Characters the random part is drawn from.
pub const ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

// Largest multiple of the charset length that fits in a byte; bytes at or
// above it are rejected so every character is equally likely.
const ACCEPT_BELOW: u8 = (256 - 256 % ID_CHARSET.len()) as u8;

/// ID generation errors.
#[derive(Debug, Error)]
pub enum IdError {
    /// The secure random source could not be read.
    #[error("Secure random source unavailable: {0}")]
    RandomSource(String),
}

/// Unique identifier of a registered client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(String);

impl ClientId {
    /// Wrap an existing ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the operating system's random source fails.
    pub fn generate() -> Result<Self, IdError> {
        generate_with(&mut OsRng)
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ClientId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Source of client IDs. The connector asks it for a new ID on every
/// registration attempt.
pub trait IdSource: Send + Sync {
    /// Produce one ID.
    ///
    /// # Errors
    ///
    /// Returns an error if no ID can be produced for this attempt.
    fn next_id(&self) -> Result<ClientId, IdError>;
}

/// The production [`IdSource`], backed by the OS random source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecureIds;

impl IdSource for SecureIds {
    fn next_id(&self) -> Result<ClientId, IdError> {
        ClientId::generate()
    }
}

/// Generate an ID from the given random source.
///
/// # Errors
///
/// Returns an error if the random source fails.
pub fn generate_with<R: TryRngCore>(rng: &mut R) -> Result<ClientId, IdError> {
    let mut id = String::with_capacity(ID_PREFIX.len() + ID_RANDOM_LEN);
    id.push_str(ID_PREFIX);

    let mut buf = [0u8; 2 * ID_RANDOM_LEN];
    let mut remaining = ID_RANDOM_LEN;
    while remaining > 0 {
        rng.try_fill_bytes(&mut buf)
            .map_err(|e| IdError::RandomSource(e.to_string()))?;

        for byte in buf.iter().copied().filter(|b| *b < ACCEPT_BELOW) {
            id.push(ID_CHARSET[usize::from(byte) % ID_CHARSET.len()] as char);
            remaining -= 1;
            if remaining == 0 {
                break;
            }
        }
    }

    Ok(ClientId(id))
}
