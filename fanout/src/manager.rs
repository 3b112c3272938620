use crate::connection::{Connection, ConnectionId, ConnectionRegistry, Outbox};
use crate::error::Error;
use crate::Payload;
use log::*;
use tokio::sync::mpsc::error::TrySendError;

/// Default number of payloads a connection may have queued before eviction.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Outcome of a single broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections that accepted the payload.
    pub delivered: usize,
    /// Slow consumers whose queue was full and who were dropped.
    pub evicted: usize,
    /// Connections whose writer had already gone away.
    pub closed: usize,
}

/// Fans payloads out to every registered connection.
///
/// Broadcasting never waits on a client: a full queue gets the connection
/// evicted instead, so one wedged client cannot stall the rest.
pub struct Manager {
    registry: ConnectionRegistry,
    queue_capacity: usize,
}

impl Manager {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            queue_capacity,
        }
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Create a connection with this manager's queue capacity and register it.
    /// The returned outbox belongs to the connection's writer loop.
    pub fn open_connection(&self) -> Result<(ConnectionId, Outbox), Error> {
        let (connection, queue) = Connection::new(self.queue_capacity);
        let connection_id = connection.id().clone();
        self.register_connection(connection)?;
        Ok((connection_id, queue))
    }

    pub fn register_connection(&self, connection: Connection) -> Result<(), Error> {
        let connection_id = connection.id().clone();
        self.registry.register(connection)?;
        info!(
            "Registered live connection {connection_id} (active={})",
            self.registry.len()
        );
        Ok(())
    }

    /// Unregister a connection by ID. Safe to call from both pump loops.
    pub fn unregister_connection(&self, connection_id: &ConnectionId) {
        if self.registry.deregister(connection_id) {
            info!(
                "Unregistered live connection {connection_id} (active={})",
                self.registry.len()
            );
        }
    }

    /// Try to enqueue `payload` on every registered connection.
    pub fn broadcast(&self, payload: Payload) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for connection in self.registry.snapshot() {
            match connection.try_enqueue(payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(
                        "Evicting slow live connection {}: outbound queue full",
                        connection.id()
                    );
                    self.registry.deregister(connection.id());
                    report.evicted += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    self.registry.deregister(connection.id());
                    report.closed += 1;
                }
            }
        }

        trace!(
            "Broadcast {} bytes (delivered={}, evicted={}, closed={})",
            payload.len(),
            report.delivered,
            report.evicted,
            report.closed
        );
        report
    }

    /// Close every live connection and refuse new ones. Used on shutdown.
    pub fn close_all(&self) {
        let closed = self.registry.close();
        info!("Closed {closed} live connection(s)");
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_registered(&self, connection_id: &ConnectionId) -> bool {
        self.registry.contains(connection_id)
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
