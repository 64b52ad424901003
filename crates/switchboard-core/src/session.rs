//! Client sessions: bootstrap plus the per-connection read and write tasks.
//!
//! [`Connector::attach`] takes an authenticated identity and a fresh
//! connection, registers a new client with the hub, splits the connection and
//! spawns two tasks:
//!
//! - the **read task** decodes inbound frames, stamps `sender` with the
//!   client's ID and submits them to the hub;
//! - the **write task** is the only writer to the connection and drains the
//!   client's outbound queue in order.
//!
//! The session ends when the read side fails or closes (the read task
//! unregisters the client and the writer drains what is left) or when the
//! hub evicts the client. Eviction fires the registration's disconnect
//! signal: both tasks stop immediately and the connection is closed without
//! draining. Either task closing the transport makes the other stop.

use crate::hub::{HubError, HubHandle, SessionId};
use crate::id::{ClientId, IdError, IdSource, SecureIds};
use crate::transform::Transform;
use std::sync::Arc;
use std::time::Duration;
use switchboard_protocol::{Envelope, Inbound};
use switchboard_transport::{CloseSignal, Connection, FrameReader, FrameWriter, TransportError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Upper bound on closing a connection after eviction. The peer may not be
/// reading, so the close frame can stall like any other write.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Bootstrap errors. Each one fails a single connection attempt.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// No ID could be generated.
    #[error("Failed to generate client ID: {0}")]
    Id(#[from] IdError),

    /// The hub refused or is gone.
    #[error("Hub error: {0}")]
    Hub(#[from] HubError),

    /// Every generated ID was already taken.
    #[error("No unique client ID after {0} attempts")]
    IdsExhausted(usize),
}

/// Per-session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Deadline for a single outbound write. `None` waits indefinitely.
    pub write_timeout: Option<Duration>,
    /// How many IDs to try before giving up on registration.
    pub register_attempts: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            write_timeout: Some(Duration::from_secs(10)),
            register_attempts: 3,
        }
    }
}

/// Turns authenticated connections into registered clients.
#[derive(Clone)]
pub struct Connector {
    hub: HubHandle,
    transform: Arc<dyn Transform>,
    ids: Arc<dyn IdSource>,
    config: SessionConfig,
}

impl Connector {
    /// Create a connector that uses secure random IDs and default settings.
    #[must_use]
    pub fn new(hub: HubHandle, transform: Arc<dyn Transform>) -> Self {
        Self {
            hub,
            transform,
            ids: Arc::new(SecureIds),
            config: SessionConfig::default(),
        }
    }

    /// Replace the session settings.
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the ID source.
    #[must_use]
    pub fn with_id_source(mut self, ids: Arc<dyn IdSource>) -> Self {
        self.ids = ids;
        self
    }

    /// The hub this connector registers with.
    #[must_use]
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Register `connection` as a new client owned by `owner` and start its
    /// read and write tasks.
    ///
    /// On failure the connection is closed; nothing else is affected.
    ///
    /// # Errors
    ///
    /// Returns an error if no ID can be generated or the hub refuses the
    /// registration.
    pub async fn attach<C: Connection>(
        &self,
        owner: &str,
        connection: C,
    ) -> Result<Session, ConnectError> {
        let remote = connection.remote_addr();

        let Registered {
            id,
            session,
            queue,
            disconnect,
        } = match self.register(owner).await {
            Ok(registered) => registered,
            Err(e) => {
                let (_reader, mut writer) = connection.split();
                if let Err(close_err) = writer.close().await {
                    trace!(error = %close_err, "Close after failed bootstrap");
                }
                return Err(e);
            }
        };

        debug!(client = %id, owner = %owner, remote = ?remote, "Client connected");

        let (reader, writer) = connection.split();
        let writer = tokio::spawn(write_pump(
            id.clone(),
            writer,
            queue,
            disconnect.clone(),
            self.config.write_timeout,
        ));
        let reader = tokio::spawn(read_pump(
            ReadContext {
                id: id.clone(),
                session,
                hub: self.hub.clone(),
                transform: Arc::clone(&self.transform),
                disconnect,
            },
            reader,
        ));

        Ok(Session { id, reader, writer })
    }

    async fn register(&self, owner: &str) -> Result<Registered, ConnectError> {
        let attempts = self.config.register_attempts.max(1);

        for attempt in 1..=attempts {
            let id = self.ids.next_id()?;
            let (registration, queue) = self.hub.registration(id.clone(), owner);
            let disconnect = registration.disconnect_signal();

            match self.hub.register(registration).await {
                Ok(session) => {
                    return Ok(Registered {
                        id,
                        session,
                        queue,
                        disconnect,
                    })
                }
                Err(HubError::IdCollision(_)) => {
                    warn!(client = %id, attempt = attempt, "Client ID collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ConnectError::IdsExhausted(attempts))
    }
}

struct Registered {
    id: ClientId,
    session: SessionId,
    queue: mpsc::Receiver<Arc<Envelope>>,
    disconnect: CloseSignal,
}

/// A running client session.
pub struct Session {
    id: ClientId,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Session {
    /// The client's ID.
    #[must_use]
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Wait for both tasks to finish.
    pub async fn finished(self) {
        if let Err(e) = self.reader.await {
            warn!(client = %self.id, error = %e, "Read task failed");
        }
        if let Err(e) = self.writer.await {
            warn!(client = %self.id, error = %e, "Write task failed");
        }
    }
}

struct ReadContext {
    id: ClientId,
    session: SessionId,
    hub: HubHandle,
    transform: Arc<dyn Transform>,
    disconnect: CloseSignal,
}

impl ReadContext {
    async fn route(&self, envelope: Envelope) -> Result<(), HubError> {
        let mut envelope = self.stamp(envelope);
        if envelope.kind.is_transformed() {
            envelope = self.transformed(envelope);
        }

        if envelope.kind.is_direct() {
            self.hub.direct(envelope).await
        } else {
            self.hub.broadcast(envelope).await
        }
    }

    fn stamp(&self, envelope: Envelope) -> Envelope {
        envelope.with_sender(self.id.as_str())
    }

    fn transformed(&self, envelope: Envelope) -> Envelope {
        // Re-stamp so a transform cannot alter the sender.
        self.stamp(self.transform.apply(envelope))
    }
}

async fn read_pump<R: FrameReader>(ctx: ReadContext, mut reader: R) {
    loop {
        let inbound = tokio::select! {
            biased;
            _ = ctx.disconnect.closed() => {
                debug!(client = %ctx.id, "Evicted, reader stopping");
                break;
            }
            inbound = reader.recv() => inbound,
        };

        let envelope = match inbound {
            Ok(Some(Inbound::Envelope(envelope))) => envelope,
            Ok(Some(Inbound::Unrecognized(kind))) => {
                trace!(client = %ctx.id, kind = %kind, "Ignoring unrecognized message type");
                continue;
            }
            Ok(None) => {
                debug!(client = %ctx.id, "Connection closed");
                break;
            }
            Err(e) => {
                debug!(client = %ctx.id, error = %e, "Read failed");
                break;
            }
        };

        trace!(client = %ctx.id, kind = %envelope.kind, "Inbound");
        if ctx.route(envelope).await.is_err() {
            warn!(client = %ctx.id, "Hub unavailable, ending session");
            break;
        }
    }

    // Fails only if the hub is gone, in which case the queue is already closed.
    let _ = ctx.hub.unregister(ctx.id.clone(), ctx.session).await;
    reader.close();
}

async fn write_pump<W: FrameWriter>(
    id: ClientId,
    mut writer: W,
    mut queue: mpsc::Receiver<Arc<Envelope>>,
    disconnect: CloseSignal,
    write_timeout: Option<Duration>,
) {
    loop {
        let envelope = tokio::select! {
            biased;
            _ = disconnect.closed() => break,
            envelope = queue.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };

        let send = async {
            match write_timeout {
                Some(limit) => tokio::time::timeout(limit, writer.send(&envelope))
                    .await
                    .unwrap_or(Err(TransportError::Timeout)),
                None => writer.send(&envelope).await,
            }
        };
        let result = tokio::select! {
            biased;
            _ = disconnect.closed() => break,
            result = send => result,
        };

        if let Err(e) = result {
            debug!(client = %id, error = %e, "Write failed");
            break;
        }
    }

    if disconnect.is_closed() {
        debug!(client = %id, "Evicted, closing connection");
        match tokio::time::timeout(CLOSE_TIMEOUT, writer.close()).await {
            Ok(Err(e)) => trace!(client = %id, error = %e, "Close after eviction"),
            Err(_) => debug!(client = %id, "Close timed out, dropping connection"),
            Ok(Ok(())) => {}
        }
    } else if let Err(e) = writer.close().await {
        trace!(client = %id, error = %e, "Close after write task");
    }
    debug!(client = %id, "Writer stopped");
}
