//! WebSocket transport implementation.
//!
//! Adapts an upgraded axum [`WebSocket`] into the split reader/writer pair.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use switchboard_protocol::{codec, Envelope, Inbound};
use tracing::debug;

use crate::traits::{CloseSignal, Connection, FrameReader, FrameWriter, TransportError};

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: 64 * 1024, // 64 KB
        }
    }
}

/// An upgraded WebSocket, not yet split.
pub struct WebSocketConnection {
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
    max_message_size: usize,
}

impl WebSocketConnection {
    /// Wrap an upgraded socket.
    #[must_use]
    pub fn new(socket: WebSocket, config: &WebSocketConfig) -> Self {
        Self {
            socket,
            remote_addr: None,
            max_message_size: config.max_message_size,
        }
    }

    /// Record the peer address for logging.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }
}

impl Connection for WebSocketConnection {
    type Reader = WebSocketReader;
    type Writer = WebSocketWriter;

    fn split(self) -> (WebSocketReader, WebSocketWriter) {
        let (sink, stream) = self.socket.split();
        let signal = CloseSignal::new();

        let reader = WebSocketReader {
            stream,
            signal: signal.clone(),
            max_message_size: self.max_message_size,
        };
        let writer = WebSocketWriter { sink, signal };

        (reader, writer)
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }
}

/// Receiving half of a WebSocket.
pub struct WebSocketReader {
    stream: SplitStream<WebSocket>,
    signal: CloseSignal,
    max_message_size: usize,
}

impl WebSocketReader {
    fn decode(&self, data: &[u8]) -> Result<Inbound, TransportError> {
        Ok(codec::decode_with_limit(data, self.max_message_size)?)
    }
}

#[async_trait]
impl FrameReader for WebSocketReader {
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError> {
        loop {
            let message = tokio::select! {
                _ = self.signal.closed() => return Ok(None),
                message = self.stream.next() => message,
            };

            match message {
                Some(Ok(Message::Text(text))) => return self.decode(text.as_bytes()).map(Some),
                Some(Ok(Message::Binary(data))) => return self.decode(&data).map(Some),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // Pongs are queued by the protocol layer
                }
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame");
                    self.signal.close();
                    return Ok(None);
                }
                Some(Err(e)) => {
                    self.signal.close();
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!("WebSocket stream ended");
                    self.signal.close();
                    return Ok(None);
                }
            }
        }
    }

    fn close(&mut self) {
        self.signal.close();
    }
}

/// Sending half of a WebSocket. The only writer for its socket.
pub struct WebSocketWriter {
    sink: SplitSink<WebSocket, Message>,
    signal: CloseSignal,
}

#[async_trait]
impl FrameWriter for WebSocketWriter {
    async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        if self.signal.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }

        let text = codec::encode(envelope)?;
        tokio::select! {
            _ = self.signal.closed() => Err(TransportError::ConnectionClosed),
            sent = self.sink.send(Message::Text(text)) => {
                sent.map_err(|e| TransportError::SendFailed(e.to_string()))
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.signal.close() {
            // We initiated the close; tell the peer.
            if let Err(e) = self.sink.send(Message::Close(None)).await {
                debug!("Failed to send close frame: {}", e);
            }
        }

        self.sink
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {}", e)))
    }
}
