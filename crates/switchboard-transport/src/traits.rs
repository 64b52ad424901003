//! Transport abstraction traits for Switchboard.
//!
//! These traits define the interface every transport provides, allowing the
//! core to stay transport-agnostic.

use async_trait::async_trait;
use std::sync::Arc;
use switchboard_protocol::{Envelope, Inbound};
use thiserror::Error;
use tokio::sync::watch;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation did not complete in time.
    #[error("Connection timed out")]
    Timeout,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] switchboard_protocol::ProtocolError),
}

/// Closed state shared by the two halves of one connection.
///
/// Closing is idempotent and may happen from either half. A reader blocked
/// on the peer observes a close initiated by the writer, and vice versa.
#[derive(Debug, Clone)]
pub struct CloseSignal {
    state: Arc<watch::Sender<bool>>,
}

impl CloseSignal {
    /// Create an open signal.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            state: Arc::new(tx),
        }
    }

    /// Mark the connection closed.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn close(&self) -> bool {
        self.state.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    /// Check whether the connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.state.borrow()
    }

    /// Wait until the connection is closed.
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// The receiving half of a connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Receive the next frame.
    ///
    /// Returns `None` if the connection is closed cleanly, by the peer or by
    /// the writer half.
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError>;

    /// Mark the connection closed from the reading side.
    fn close(&mut self);
}

/// The sending half of a connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Send one envelope.
    async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError>;

    /// Close the connection gracefully. Safe to call after the reader closed.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// A duplex, message-framed connection produced by a transport.
pub trait Connection: Send + 'static {
    /// Receiving half.
    type Reader: FrameReader + 'static;
    /// Sending half.
    type Writer: FrameWriter + 'static;

    /// Split into independently owned halves sharing one [`CloseSignal`].
    fn split(self) -> (Self::Reader, Self::Writer);

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}
