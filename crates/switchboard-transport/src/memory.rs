//! In-memory transport.
//!
//! [`pair`] returns a server-side [`MemoryConnection`] and the [`MemoryPeer`]
//! that plays the remote client. Frames travel as JSON text, exactly as they
//! would over a WebSocket. The peer-to-server direction is unbounded; the
//! server-to-peer direction is bounded, so a peer that stops reading stalls
//! the writer the way a slow socket would.

use async_trait::async_trait;
use switchboard_protocol::{codec, Envelope, Inbound};
use tokio::sync::mpsc;

use crate::traits::{CloseSignal, Connection, FrameReader, FrameWriter, TransportError};

/// Default number of frames buffered towards the peer.
pub const DEFAULT_PEER_BUFFER: usize = 1024;

/// Create a connected server/peer pair.
#[must_use]
pub fn pair() -> (MemoryConnection, MemoryPeer) {
    pair_with_capacity(DEFAULT_PEER_BUFFER)
}

/// Create a pair whose server-to-peer direction buffers at most `capacity`
/// frames.
#[must_use]
pub fn pair_with_capacity(capacity: usize) -> (MemoryConnection, MemoryPeer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::channel(capacity.max(1));
    let signal = CloseSignal::new();

    let connection = MemoryConnection {
        inbound: inbound_rx,
        outbound: outbound_tx,
        signal: signal.clone(),
    };
    let peer = MemoryPeer {
        inbound: Some(inbound_tx),
        outbound: outbound_rx,
        signal,
    };

    (connection, peer)
}

/// Server side of an in-memory connection.
pub struct MemoryConnection {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::Sender<String>,
    signal: CloseSignal,
}

impl Connection for MemoryConnection {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    fn split(self) -> (MemoryReader, MemoryWriter) {
        let reader = MemoryReader {
            inbound: self.inbound,
            signal: self.signal.clone(),
        };
        let writer = MemoryWriter {
            outbound: Some(self.outbound),
            signal: self.signal,
        };
        (reader, writer)
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }
}

/// Receiving half of an in-memory connection.
pub struct MemoryReader {
    inbound: mpsc::UnboundedReceiver<String>,
    signal: CloseSignal,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError> {
        let text = tokio::select! {
            _ = self.signal.closed() => return Ok(None),
            text = self.inbound.recv() => text,
        };

        match text {
            Some(text) => Ok(Some(codec::decode(text.as_bytes())?)),
            None => {
                self.signal.close();
                Ok(None)
            }
        }
    }

    fn close(&mut self) {
        self.signal.close();
    }
}

/// Sending half of an in-memory connection.
pub struct MemoryWriter {
    outbound: Option<mpsc::Sender<String>>,
    signal: CloseSignal,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        let outbound = match &self.outbound {
            Some(outbound) if !self.signal.is_closed() => outbound,
            _ => return Err(TransportError::ConnectionClosed),
        };

        let text = codec::encode(envelope)?;
        tokio::select! {
            _ = self.signal.closed() => Err(TransportError::ConnectionClosed),
            sent = outbound.send(text) => {
                sent.map_err(|_| TransportError::SendFailed("peer dropped".to_string()))
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.signal.close();
        self.outbound = None;
        Ok(())
    }
}

/// The remote end of an in-memory connection.
pub struct MemoryPeer {
    inbound: Option<mpsc::UnboundedSender<String>>,
    outbound: mpsc::Receiver<String>,
    signal: CloseSignal,
}

impl MemoryPeer {
    /// Send a raw text frame. Returns `false` once the peer has disconnected
    /// or the server dropped its reader.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.inbound
            .as_ref()
            .is_some_and(|tx| tx.send(text.into()).is_ok())
    }

    /// Send an envelope, including whatever `sender` it carries.
    pub fn send_envelope(&self, envelope: &Envelope) -> bool {
        serde_json::to_string(envelope).is_ok_and(|text| self.send_text(text))
    }

    /// Receive the next raw frame. `None` once the server side is closed and
    /// drained.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Receive and parse the next frame.
    pub async fn recv_envelope(&mut self) -> Option<Envelope> {
        let text = self.recv_text().await?;
        serde_json::from_str(&text).ok()
    }

    /// Take a frame if one is already buffered.
    pub fn try_recv_text(&mut self) -> Option<String> {
        self.outbound.try_recv().ok()
    }

    /// Hang up: the server reader sees end-of-stream.
    pub fn disconnect(&mut self) {
        self.inbound = None;
    }

    /// Whether either server half has closed the connection.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.signal.is_closed()
    }

    /// Wait until the server side closes the connection.
    pub async fn closed(&self) {
        self.signal.closed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_protocol::MessageKind;

    #[tokio::test]
    async fn test_peer_frames_reach_reader() {
        let (conn, peer) = pair();
        let (mut reader, _writer) = conn.split();

        assert!(peer.send_text(r#"{"type":"broadcast","content":"hi","sender":"ws_forged"}"#));

        match reader.recv().await.unwrap() {
            Some(Inbound::Envelope(envelope)) => {
                assert_eq!(envelope.kind, MessageKind::Broadcast);
                assert!(envelope.sender.is_empty());
            }
            other => panic!("Expected envelope, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_ends_reader() {
        let (conn, mut peer) = pair();
        let (mut reader, _writer) = conn.split();

        peer.disconnect();
        assert!(reader.recv().await.unwrap().is_none());
        assert!(peer.is_closed());
    }

    #[tokio::test]
    async fn test_writer_close_ends_reader_and_peer_stream() {
        let (conn, mut peer) = pair();
        let (mut reader, mut writer) = conn.split();

        writer.send(&Envelope::broadcast("last")).await.unwrap();
        writer.close().await.unwrap();

        assert!(reader.recv().await.unwrap().is_none());
        assert_eq!(peer.recv_envelope().await.unwrap().content, "last");
        assert!(peer.recv_text().await.is_none());
        assert!(matches!(
            writer.send(&Envelope::broadcast("late")).await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_malformed_frame_is_error() {
        let (conn, peer) = pair();
        let (mut reader, _writer) = conn.split();

        peer.send_text("{not json");
        assert!(matches!(
            reader.recv().await,
            Err(TransportError::Protocol(_))
        ));
    }
}
