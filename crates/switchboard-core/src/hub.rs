//! The hub: a single task that owns the client registry.
//!
//! Every registry read and write happens inside [`Hub::run`]. Other tasks
//! talk to the hub only through a [`HubHandle`], which sends on the hub's
//! input channels (register, unregister, broadcast, direct, plus a
//! read-only stats query). No lock guards the registry.
//!
//! Delivery to a client is a non-blocking enqueue onto its bounded outbound
//! queue. A full queue marks a consumer that cannot keep up: the hub removes
//! it, closes the queue and fires the client's disconnect signal on the spot
//! instead of dropping the one message or waiting.

use crate::id::ClientId;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use switchboard_protocol::Envelope;
use switchboard_transport::CloseSignal;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub task has stopped.
    #[error("Hub is not running")]
    Closed,

    /// Another live client already holds this ID.
    #[error("Client ID already registered: {0}")]
    IdCollision(ClientId),
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of each client's outbound queue.
    pub client_queue_capacity: usize,
    /// Capacity of each hub input channel.
    pub channel_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            client_queue_capacity: 256,
            channel_capacity: 1024,
        }
    }
}

/// Distinguishes successive registrations, so a late unregister from an old
/// session never removes a newer one. Assigned by the hub on register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

/// A client as the hub sees it: an ID, the sending end of its queue and the
/// signal that tears its connection down.
#[derive(Debug)]
pub struct Registration {
    /// Client ID, unique among registered clients.
    pub id: ClientId,
    /// Authenticated identity that owns the connection.
    pub owner: String,
    queue: mpsc::Sender<Arc<Envelope>>,
    disconnect: CloseSignal,
}

impl Registration {
    /// Create a registration and the receiving end of its outbound queue.
    #[must_use]
    pub fn new(
        id: ClientId,
        owner: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Arc<Envelope>>) {
        let (queue, rx) = mpsc::channel(capacity.max(1));
        let registration = Self {
            id,
            owner: owner.into(),
            queue,
            disconnect: CloseSignal::new(),
        };
        (registration, rx)
    }

    /// Fired by the hub when it evicts this client. The client's tasks
    /// watch it and drop the connection at once.
    #[must_use]
    pub fn disconnect_signal(&self) -> CloseSignal {
        self.disconnect.clone()
    }
}

/// A registry entry.
#[derive(Debug)]
struct Client {
    owner: String,
    session: SessionId,
    queue: mpsc::Sender<Arc<Envelope>>,
    disconnect: CloseSignal,
}

/// Hub statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Currently registered clients.
    pub clients: usize,
    /// Successful registrations.
    pub registered: u64,
    /// Registrations refused because the ID was taken.
    pub rejected: u64,
    /// Clients removed by unregister.
    pub unregistered: u64,
    /// Envelopes enqueued to clients.
    pub delivered: u64,
    /// Clients removed because their queue was full or closed.
    pub evicted: u64,
    /// Direct envelopes whose target was not registered.
    pub dropped: u64,
}

struct RegisterRequest {
    registration: Registration,
    reply: oneshot::Sender<Result<SessionId, HubError>>,
}

struct UnregisterRequest {
    id: ClientId,
    session: SessionId,
}

enum Query {
    Stats(oneshot::Sender<HubStats>),
}

/// Cloneable handle for submitting events to the hub.
///
/// The hub stops once every handle has been dropped.
#[derive(Clone)]
pub struct HubHandle {
    register: mpsc::Sender<RegisterRequest>,
    unregister: mpsc::Sender<UnregisterRequest>,
    broadcast: mpsc::Sender<Envelope>,
    direct: mpsc::Sender<Envelope>,
    query: mpsc::Sender<Query>,
    queue_capacity: usize,
}

impl HubHandle {
    /// Create a registration sized for this hub's client queues.
    #[must_use]
    pub fn registration(
        &self,
        id: ClientId,
        owner: impl Into<String>,
    ) -> (Registration, mpsc::Receiver<Arc<Envelope>>) {
        Registration::new(id, owner, self.queue_capacity)
    }

    /// Register a client and wait for the hub to accept it. Returns the
    /// session number to pass to [`HubHandle::unregister`].
    ///
    /// # Errors
    ///
    /// Returns [`HubError::IdCollision`] if the ID is taken, or
    /// [`HubError::Closed`] if the hub has stopped.
    pub async fn register(&self, registration: Registration) -> Result<SessionId, HubError> {
        let (reply, rx) = oneshot::channel();
        self.register
            .send(RegisterRequest {
                registration,
                reply,
            })
            .await
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)?
    }

    /// Remove a client and close its queue. No-op if it is already gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn unregister(&self, id: ClientId, session: SessionId) -> Result<(), HubError> {
        self.unregister
            .send(UnregisterRequest { id, session })
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Submit an envelope for delivery to every client.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn broadcast(&self, envelope: Envelope) -> Result<(), HubError> {
        self.broadcast
            .send(envelope)
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Submit an envelope for delivery to `envelope.target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn direct(&self, envelope: Envelope) -> Result<(), HubError> {
        self.direct
            .send(envelope)
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Fetch current statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, rx) = oneshot::channel();
        self.query
            .send(Query::Stats(reply))
            .await
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)
    }
}

/// The hub actor.
pub struct Hub {
    clients: HashMap<ClientId, Client>,
    next_session: u64,
    register_rx: mpsc::Receiver<RegisterRequest>,
    unregister_rx: mpsc::Receiver<UnregisterRequest>,
    broadcast_rx: mpsc::Receiver<Envelope>,
    direct_rx: mpsc::Receiver<Envelope>,
    query_rx: mpsc::Receiver<Query>,
    stats: HubStats,
}

impl Hub {
    /// Create a hub and its first handle. Nothing runs until [`Hub::run`].
    #[must_use]
    pub fn new(config: HubConfig) -> (Self, HubHandle) {
        info!("Creating hub with config: {:?}", config);

        let capacity = config.channel_capacity.max(1);
        let (register, register_rx) = mpsc::channel(capacity);
        let (unregister, unregister_rx) = mpsc::channel(capacity);
        let (broadcast, broadcast_rx) = mpsc::channel(capacity);
        let (direct, direct_rx) = mpsc::channel(capacity);
        let (query, query_rx) = mpsc::channel(capacity);

        let hub = Self {
            clients: HashMap::new(),
            next_session: 1,
            register_rx,
            unregister_rx,
            broadcast_rx,
            direct_rx,
            query_rx,
            stats: HubStats::default(),
        };
        let handle = HubHandle {
            register,
            unregister,
            broadcast,
            direct,
            query,
            queue_capacity: config.client_queue_capacity,
        };

        (hub, handle)
    }

    /// Create a hub and run it on its own task.
    #[must_use]
    pub fn spawn(config: HubConfig) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(config);
        (handle, tokio::spawn(hub.run()))
    }

    /// Process events one at a time until every handle is dropped.
    ///
    /// On exit the registry is dropped, which closes every client queue.
    pub async fn run(mut self) {
        info!("Hub started");

        loop {
            tokio::select! {
                Some(request) = self.register_rx.recv() => {
                    let result = self.handle_register(request.registration);
                    // The bootstrap may have given up waiting.
                    let _ = request.reply.send(result);
                }
                Some(request) = self.unregister_rx.recv() => {
                    self.handle_unregister(&request.id, request.session);
                }
                Some(envelope) = self.broadcast_rx.recv() => {
                    self.handle_broadcast(Arc::new(envelope));
                }
                Some(envelope) = self.direct_rx.recv() => {
                    self.handle_direct(Arc::new(envelope));
                }
                Some(query) = self.query_rx.recv() => {
                    match query {
                        Query::Stats(reply) => {
                            let _ = reply.send(self.stats());
                        }
                    }
                }
                else => break,
            }
        }

        info!(clients = self.clients.len(), "Hub stopped");
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            clients: self.clients.len(),
            ..self.stats.clone()
        }
    }

    /// IDs of all registered clients, sorted.
    #[cfg(test)]
    fn client_ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.clients.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn handle_register(&mut self, registration: Registration) -> Result<SessionId, HubError> {
        let Registration {
            id,
            owner,
            queue,
            disconnect,
        } = registration;

        match self.clients.entry(id) {
            Entry::Occupied(slot) => {
                warn!(client = %slot.key(), "Rejected registration: ID in use");
                self.stats.rejected += 1;
                Err(HubError::IdCollision(slot.key().clone()))
            }
            Entry::Vacant(slot) => {
                let session = SessionId(self.next_session);
                self.next_session += 1;

                debug!(client = %slot.key(), owner = %owner, "Registered");
                slot.insert(Client {
                    owner,
                    session,
                    queue,
                    disconnect,
                });
                self.stats.registered += 1;
                trace!(clients = self.clients.len(), "Registry size");
                Ok(session)
            }
        }
    }

    fn handle_unregister(&mut self, id: &ClientId, session: SessionId) -> bool {
        let current = self
            .clients
            .get(id)
            .is_some_and(|client| client.session == session);
        if !current {
            trace!(client = %id, "Unregister for absent client");
            return false;
        }

        // Dropping the registration closes the queue; the writer drains and exits.
        self.clients.remove(id);
        self.stats.unregistered += 1;
        debug!(client = %id, clients = self.clients.len(), "Unregistered");
        true
    }

    fn handle_broadcast(&mut self, envelope: Arc<Envelope>) -> usize {
        let before = self.clients.len();
        let mut delivered = 0;

        self.clients.retain(|id, client| {
            let kept = offer(id.as_str(), client, &envelope);
            if kept {
                delivered += 1;
            }
            kept
        });

        let evicted = before - self.clients.len();
        self.stats.delivered += delivered as u64;
        self.stats.evicted += evicted as u64;

        trace!(
            sender = %envelope.sender,
            recipients = delivered,
            evicted = evicted,
            "Broadcast"
        );
        delivered
    }

    fn handle_direct(&mut self, envelope: Arc<Envelope>) -> bool {
        let target = envelope.target.as_deref().unwrap_or_default();

        let Some(client) = self.clients.get(target) else {
            trace!(sender = %envelope.sender, target = %target, "Dropped direct message: no such client");
            self.stats.dropped += 1;
            return false;
        };

        if offer(target, client, &envelope) {
            self.stats.delivered += 1;
            trace!(sender = %envelope.sender, target = %target, "Direct");
            true
        } else {
            self.clients.remove(target);
            self.stats.evicted += 1;
            false
        }
    }
}

/// Try to enqueue without waiting. Returns `false` if the client must be
/// removed, in which case its disconnect signal has already fired.
fn offer(id: &str, client: &Client, envelope: &Arc<Envelope>) -> bool {
    match client.queue.try_send(Arc::clone(envelope)) {
        Ok(()) => return true,
        Err(TrySendError::Full(_)) => {
            warn!(client = %id, owner = %client.owner, "Outbound queue full, disconnecting");
        }
        Err(TrySendError::Closed(_)) => {
            debug!(client = %id, "Writer gone, removing");
        }
    }

    client.disconnect.close();
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn config(queue: usize) -> HubConfig {
        HubConfig {
            client_queue_capacity: queue,
            channel_capacity: 16,
        }
    }

    fn register(hub: &mut Hub, id: &str, capacity: usize) -> (SessionId, mpsc::Receiver<Arc<Envelope>>) {
        let (registration, rx) = Registration::new(ClientId::from(id), "user", capacity);
        let session = hub.handle_register(registration).unwrap();
        (session, rx)
    }

    #[derive(Debug, Clone)]
    enum Op {
        Register(usize),
        Unregister(usize),
        StaleUnregister(usize),
    }

    const POOL: [&str; 4] = ["ws_a", "ws_b", "ws_c", "ws_d"];

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..POOL.len()).prop_map(Op::Register),
            (0..POOL.len()).prop_map(Op::Unregister),
            (0..POOL.len()).prop_map(Op::StaleUnregister),
        ]
    }

    proptest! {
        #[test]
        fn test_registry_matches_register_unregister_history(
            ops in proptest::collection::vec(arb_op(), 0..64)
        ) {
            let (mut hub, _handle) = Hub::new(config(8));
            let mut live: BTreeSet<ClientId> = BTreeSet::new();
            let mut current: HashMap<usize, SessionId> = HashMap::new();
            let mut stale: HashMap<usize, SessionId> = HashMap::new();
            let mut queues = Vec::new();

            for op in ops {
                match op {
                    Op::Register(i) => {
                        let id = ClientId::from(POOL[i]);
                        let (registration, rx) = Registration::new(id.clone(), "user", 8);
                        match hub.handle_register(registration) {
                            Ok(session) => {
                                prop_assert!(live.insert(id));
                                current.insert(i, session);
                                queues.push(rx);
                            }
                            Err(HubError::IdCollision(taken)) => {
                                prop_assert_eq!(taken, id.clone());
                                prop_assert!(live.contains(&id));
                            }
                            Err(e) => prop_assert!(false, "unexpected error: {}", e),
                        }
                    }
                    Op::Unregister(i) => {
                        let id = ClientId::from(POOL[i]);
                        match current.remove(&i) {
                            Some(session) => {
                                prop_assert!(hub.handle_unregister(&id, session));
                                live.remove(&id);
                                stale.insert(i, session);
                            }
                            None => prop_assert!(!hub.handle_unregister(&id, SessionId(0))),
                        }
                    }
                    Op::StaleUnregister(i) => {
                        if let Some(session) = stale.get(&i) {
                            prop_assert!(!hub.handle_unregister(&ClientId::from(POOL[i]), *session));
                        }
                    }
                }

                let actual: BTreeSet<ClientId> = hub.client_ids().into_iter().collect();
                prop_assert_eq!(&actual, &live);
                prop_assert_eq!(hub.stats().clients, live.len());
            }
        }
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let (mut hub, _handle) = Hub::new(config(8));
        let (first, mut first_rx) = register(&mut hub, "ws_dup", 8);

        let (duplicate, mut duplicate_rx) = Registration::new(ClientId::from("ws_dup"), "other", 8);
        assert!(matches!(
            hub.handle_register(duplicate),
            Err(HubError::IdCollision(id)) if id.as_str() == "ws_dup"
        ));

        // The rejected queue is closed, the first still receives.
        assert!(duplicate_rx.try_recv().is_err());
        hub.handle_direct(Arc::new(Envelope::private("ws_dup", "still here")));
        assert_eq!(first_rx.try_recv().unwrap().content, "still here");
        assert_eq!(hub.stats().rejected, 1);
        assert!(hub.handle_unregister(&ClientId::from("ws_dup"), first));
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let (mut hub, _handle) = Hub::new(config(8));
        let (session, mut rx) = register(&mut hub, "ws_a", 8);
        let id = ClientId::from("ws_a");

        assert!(hub.handle_unregister(&id, session));
        assert!(!hub.handle_unregister(&id, session));
        assert_eq!(hub.stats().unregistered, 1);

        // Queue closed: the writer would observe end of stream.
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_stale_session_does_not_remove_newer_registration() {
        let (mut hub, _handle) = Hub::new(config(8));
        let (old_session, _old_rx) = register(&mut hub, "ws_a", 8);
        let id = ClientId::from("ws_a");
        assert!(hub.handle_unregister(&id, old_session));

        let (_new_session, _new_rx) = register(&mut hub, "ws_a", 8);
        assert!(!hub.handle_unregister(&id, old_session));
        assert_eq!(hub.client_ids(), vec![id]);
    }

    #[test]
    fn test_broadcast_one_copy_each() {
        let (mut hub, _handle) = Hub::new(config(8));
        let mut receivers: Vec<_> = ["ws_a", "ws_b", "ws_c"]
            .iter()
            .map(|id| register(&mut hub, id, 8).1)
            .collect();

        let delivered =
            hub.handle_broadcast(Arc::new(Envelope::broadcast("hi").with_sender("ws_a")));
        assert_eq!(delivered, 3);

        for rx in &mut receivers {
            let envelope = rx.try_recv().unwrap();
            assert_eq!(envelope.content, "hi");
            assert_eq!(envelope.sender, "ws_a");
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_broadcast_evicts_full_queue() {
        let (mut hub, _handle) = Hub::new(config(8));
        let (registration, mut slow) = Registration::new(ClientId::from("ws_slow"), "user", 1);
        let slow_disconnect = registration.disconnect_signal();
        hub.handle_register(registration).unwrap();
        let (_, mut fast) = register(&mut hub, "ws_fast", 8);

        hub.handle_broadcast(Arc::new(Envelope::broadcast("first")));
        assert_eq!(fast.try_recv().unwrap().content, "first");

        // Slow queue is now full.
        let delivered = hub.handle_broadcast(Arc::new(Envelope::broadcast("second")));
        assert_eq!(delivered, 1);
        assert_eq!(fast.try_recv().unwrap().content, "second");
        assert_eq!(hub.client_ids(), vec![ClientId::from("ws_fast")]);
        assert_eq!(hub.stats().evicted, 1);
        assert!(slow_disconnect.is_closed());

        // The slow client keeps what it had and then sees its queue closed.
        assert_eq!(slow.try_recv().unwrap().content, "first");
        assert!(matches!(
            slow.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_broadcast_removes_client_whose_writer_exited() {
        let (mut hub, _handle) = Hub::new(config(8));
        let (_, gone) = register(&mut hub, "ws_gone", 8);
        let (_, _live) = register(&mut hub, "ws_live", 8);
        drop(gone);

        assert_eq!(hub.handle_broadcast(Arc::new(Envelope::broadcast("x"))), 1);
        assert_eq!(hub.client_ids(), vec![ClientId::from("ws_live")]);
    }

    #[test]
    fn test_direct_only_to_target() {
        let (mut hub, _handle) = Hub::new(config(8));
        let (_, mut a) = register(&mut hub, "ws_a", 8);
        let (_, mut b) = register(&mut hub, "ws_b", 8);

        assert!(hub.handle_direct(Arc::new(
            Envelope::private("ws_b", "secret").with_sender("ws_a")
        )));
        assert!(a.try_recv().is_err());
        assert_eq!(b.try_recv().unwrap().content, "secret");
    }

    #[test]
    fn test_direct_to_absent_target_dropped() {
        let (mut hub, _handle) = Hub::new(config(8));
        let (_, mut a) = register(&mut hub, "ws_a", 8);

        assert!(!hub.handle_direct(Arc::new(Envelope::private("ws_zz99", "secret"))));
        let mut untargeted = Envelope::private("ws_a", "no target");
        untargeted.target = None;
        assert!(!hub.handle_direct(Arc::new(untargeted)));

        assert!(a.try_recv().is_err());
        assert_eq!(hub.stats().dropped, 2);
        assert_eq!(hub.stats().clients, 1);
    }

    #[test]
    fn test_direct_evicts_full_queue() {
        let (mut hub, _handle) = Hub::new(config(8));
        let (registration, _rx) = Registration::new(ClientId::from("ws_a"), "user", 1);
        let disconnect = registration.disconnect_signal();
        hub.handle_register(registration).unwrap();

        assert!(hub.handle_direct(Arc::new(Envelope::private("ws_a", "1"))));
        assert!(!disconnect.is_closed());
        assert!(!hub.handle_direct(Arc::new(Envelope::private("ws_a", "2"))));
        assert!(hub.client_ids().is_empty());
        assert!(disconnect.is_closed());
    }

    #[test]
    fn test_unregister_does_not_fire_disconnect() {
        let (mut hub, _handle) = Hub::new(config(8));
        let (registration, _rx) = Registration::new(ClientId::from("ws_a"), "user", 8);
        let disconnect = registration.disconnect_signal();
        let session = hub.handle_register(registration).unwrap();

        assert!(hub.handle_unregister(&ClientId::from("ws_a"), session));
        assert!(!disconnect.is_closed());
    }

    #[test]
    fn test_sessions_are_distinct_per_hub() {
        let (mut hub, _handle) = Hub::new(config(8));
        let (first, _first_rx) = register(&mut hub, "ws_a", 8);
        let (second, _second_rx) = register(&mut hub, "ws_b", 8);
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_hub_task_roundtrip() {
        let (handle, task) = Hub::spawn(config(8));

        let (registration, mut rx) = handle.registration(ClientId::from("ws_a"), "alice");
        let session = handle.register(registration).await.unwrap();

        let (duplicate, _dup_rx) = handle.registration(ClientId::from("ws_a"), "mallory");
        assert!(matches!(
            handle.register(duplicate).await,
            Err(HubError::IdCollision(_))
        ));

        handle
            .broadcast(Envelope::broadcast("hi").with_sender("ws_a"))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().content, "hi");

        handle
            .unregister(ClientId::from("ws_a"), session)
            .await
            .unwrap();
        assert!(rx.recv().await.is_none());

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.clients, 0);
        assert_eq!(stats.registered, 1);
        assert_eq!(stats.rejected, 1);

        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_hub_stop_closes_queues() {
        let (handle, task) = Hub::spawn(config(8));
        let (registration, mut rx) = handle.registration(ClientId::from("ws_a"), "alice");
        handle.register(registration).await.unwrap();

        drop(handle);
        task.await.unwrap();
        assert!(rx.recv().await.is_none());
    }
}
