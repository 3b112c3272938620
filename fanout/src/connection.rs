use crate::error::{Error, RegistryErrorKind};
use crate::Payload;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::*;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::{self, error::TryRecvError, Receiver, Sender};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Unique identifier for a connection (server-generated, used in logs only)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Producer side of one live connection.
///
/// The matching [`Outbox`] is owned by the connection's writer loop. Once every
/// clone of this handle is dropped the outbox observes a closed queue, which
/// is how the writer learns it has been evicted or shut down. Deregistration
/// also fires the termination signal so a writer stuck on the transport gives
/// up without waiting for the queue.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    outbound: Sender<Payload>,
    terminated: CancellationToken,
}

impl Connection {
    /// Creates a connection with a bounded outbound queue of `capacity` payloads.
    pub fn new(capacity: usize) -> (Self, Outbox) {
        let (outbound, queue) = mpsc::channel(capacity.max(1));
        let terminated = CancellationToken::new();
        (
            Self {
                id: ConnectionId::new(),
                outbound,
                terminated: terminated.clone(),
            },
            Outbox { queue, terminated },
        )
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Non-blocking enqueue; never waits for the writer to make room.
    pub(crate) fn try_enqueue(
        &self,
        payload: Payload,
    ) -> Result<(), mpsc::error::TrySendError<Payload>> {
        self.outbound.try_send(payload)
    }

    fn terminate(&self) {
        self.terminated.cancel();
    }
}

/// Consumer side of one live connection, drained by its writer loop.
#[derive(Debug)]
pub struct Outbox {
    queue: Receiver<Payload>,
    terminated: CancellationToken,
}

impl Outbox {
    /// Next queued payload, or `None` once the queue is closed and drained.
    pub async fn recv(&mut self) -> Option<Payload> {
        self.queue.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Payload, TryRecvError> {
        self.queue.try_recv()
    }

    /// Resolves once the connection has been deregistered.
    pub fn terminated(&self) -> WaitForCancellationFuture<'_> {
        self.terminated.cancelled()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.is_cancelled()
    }
}

/// Live set of admitted connections.
///
/// The registry holds the only long-lived producer handle of each outbound queue,
/// so removing an entry is what closes that queue. `DashMap::remove` hands the
/// entry to exactly one caller, which keeps teardown single-shot even when the
/// reader and writer loops race to deregister.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Connection>,
    closed: AtomicBool,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a connection; it receives every broadcast from now on.
    pub fn register(&self, connection: Connection) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::registry(RegistryErrorKind::Closed));
        }

        let id = connection.id.clone();
        match self.connections.entry(id.clone()) {
            Entry::Occupied(_) => return Err(Error::registry(RegistryErrorKind::AlreadyRegistered)),
            Entry::Vacant(slot) => {
                slot.insert(connection);
            }
        }

        // Lost a race with close(): undo so the queue still gets closed
        if self.closed.load(Ordering::Acquire) {
            self.deregister(&id);
            return Err(Error::registry(RegistryErrorKind::Closed));
        }
        Ok(())
    }

    /// Remove a connection, closing its outbound queue. Returns whether this
    /// call removed it; removing an absent connection is a no-op.
    pub fn deregister(&self, connection_id: &ConnectionId) -> bool {
        match self.connections.remove(connection_id) {
            Some((id, connection)) => {
                connection.terminate();
                // Dropping the registry's handle closes the queue
                drop(connection);
                trace!("Connection {id} removed from registry");
                true
            }
            None => false,
        }
    }

    /// Copy of the current connections. Shard locks are held only while copying,
    /// never while a caller iterates the result.
    pub fn snapshot(&self) -> Vec<Connection> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Drop every connection and refuse new ones.
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let ids: Vec<ConnectionId> = self
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.iter().filter(|id| self.deregister(id)).count()
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains_key(connection_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use bytes::Bytes;
    use std::sync::Arc;

    #[test]
    fn register_twice_with_same_handle_fails() {
        let registry = ConnectionRegistry::new();
        let (connection, _queue) = Connection::new(4);

        registry.register(connection.clone()).unwrap();
        let err = registry.register(connection).unwrap_err();

        assert_eq!(
            err.error_kind,
            ErrorKind::Registry(RegistryErrorKind::AlreadyRegistered)
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn deregister_twice_removes_once() {
        let registry = ConnectionRegistry::new();
        let (keep, _keep_queue) = Connection::new(4);
        let (drop_me, _drop_queue) = Connection::new(4);
        registry.register(keep).unwrap();
        registry.register(drop_me.clone()).unwrap();

        assert!(registry.deregister(drop_me.id()));
        assert!(!registry.deregister(drop_me.id()));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn deregister_closes_the_outbound_queue() {
        let registry = ConnectionRegistry::new();
        let (connection, mut queue) = Connection::new(4);
        let id = connection.id().clone();
        registry.register(connection).unwrap();

        registry.deregister(&id);

        assert!(queue.recv().await.is_none());
        assert!(queue.is_terminated());
    }

    #[tokio::test]
    async fn concurrent_deregister_is_single_shot() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (connection, _queue) = Connection::new(4);
        let id = connection.id().clone();
        registry.register(connection).unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let id = id.clone();
                tokio::spawn(async move { registry.deregister(&id) })
            })
            .collect();

        let mut removed = 0;
        for task in tasks {
            if task.await.unwrap() {
                removed += 1;
            }
        }
        assert_eq!(removed, 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn close_drops_everything_and_rejects_new_connections() {
        let registry = ConnectionRegistry::new();
        let (a, mut queue_a) = Connection::new(4);
        let (b, mut queue_b) = Connection::new(4);
        registry.register(a).unwrap();
        registry.register(b).unwrap();

        assert_eq!(registry.close(), 2);
        assert!(queue_a.recv().await.is_none());
        assert!(queue_b.recv().await.is_none());

        let (late, _late_queue) = Connection::new(4);
        let err = registry.register(late).unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::Registry(RegistryErrorKind::Closed));
    }

    #[test]
    fn snapshot_is_independent_of_later_mutation() {
        let registry = ConnectionRegistry::new();
        let (a, _queue_a) = Connection::new(1);
        registry.register(a.clone()).unwrap();

        let snapshot = registry.snapshot();
        registry.deregister(a.id());

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].try_enqueue(Bytes::from_static(b"late")).is_ok());
        assert!(!registry.contains(a.id()));
    }
}
