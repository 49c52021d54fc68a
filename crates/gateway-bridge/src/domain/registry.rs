//! # Connection Registry
//!
//! Process-wide map from gateway identity to its live [`Connection`].
//!
//! ## Invariants
//!
//! - At most one live connection per identity.
//! - Entries are fully constructed `Arc<Connection>` values, published by a
//!   single map insertion; readers never see a partial entry.
//! - Shard locks are held only for the mutation itself, never across I/O or
//!   while notifying observers.

use super::config::DuplicatePolicy;
use super::connection::Connection;
use super::errors::GatewayError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use shared_types::{DownlinkMessage, GatewayIdentity};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

/// Capacity of the observer feed.
const EVENT_CAPACITY: usize = 1024;

/// Registry change notification.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A connection was registered.
    Connected(Arc<Connection>),
    /// A connection left the registry.
    Disconnected {
        gateway: GatewayIdentity,
        connection_id: Uuid,
    },
}

/// Best-effort observer feed of registry changes.
///
/// Slow subscribers lose events instead of blocking registration.
pub struct ConnectionFeed {
    receiver: broadcast::Receiver<ConnectionEvent>,
}

impl ConnectionFeed {
    /// Receive the next event; `None` once the registry is dropped.
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    debug!(lagged = count, "Connection feed lagged, some events dropped");
                }
            }
        }
    }

    /// Receive the next event without waiting.
    pub fn try_recv(&mut self) -> Option<ConnectionEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Wait for the next `Connected` event, skipping disconnects.
    pub async fn next_connected(&mut self) -> Option<Arc<Connection>> {
        loop {
            if let ConnectionEvent::Connected(connection) = self.recv().await? {
                return Some(connection);
            }
        }
    }
}

/// Identity → live connection map.
pub struct ConnectionRegistry {
    connections: DashMap<GatewayIdentity, Arc<Connection>>,
    policy: DuplicatePolicy,
    events: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionRegistry {
    pub fn new(policy: DuplicatePolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            connections: DashMap::new(),
            policy,
            events,
        }
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Install a connection under its gateway identity.
    ///
    /// An entry whose connection is already closed never blocks a new one.
    pub fn register(&self, connection: Arc<Connection>) -> Result<(), GatewayError> {
        let gateway = connection.gateway().clone();
        let replaced = match self.connections.entry(gateway.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&connection));
                None
            }
            Entry::Occupied(mut entry) => {
                if !entry.get().is_closed() && self.policy == DuplicatePolicy::Reject {
                    return Err(GatewayError::AlreadyConnected(gateway));
                }
                Some(entry.insert(Arc::clone(&connection)))
            }
        };

        if let Some(old) = replaced {
            if old.close() {
                info!(
                    gateway = %gateway,
                    connection_id = %old.id(),
                    "Evicted previous session"
                );
            }
            self.notify(ConnectionEvent::Disconnected {
                gateway: gateway.clone(),
                connection_id: old.id(),
            });
        }

        debug!(gateway = %gateway, connection_id = %connection.id(), "Connection registered");
        self.notify(ConnectionEvent::Connected(connection));
        Ok(())
    }

    /// Live connection for an identity.
    pub fn lookup(&self, gateway: &GatewayIdentity) -> Option<Arc<Connection>> {
        self.connections
            .get(gateway)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Remove and close the entry for an identity. Idempotent.
    pub fn unregister(&self, gateway: &GatewayIdentity) -> Option<Arc<Connection>> {
        let (_, connection) = self.connections.remove(gateway)?;
        connection.close();
        self.notify(ConnectionEvent::Disconnected {
            gateway: gateway.clone(),
            connection_id: connection.id(),
        });
        Some(connection)
    }

    /// Remove the entry only if it still belongs to `connection`.
    pub fn remove_if_current(&self, connection: &Connection) -> bool {
        let removed = self
            .connections
            .remove_if(connection.gateway(), |_, current| {
                current.id() == connection.id()
            })
            .is_some();
        if removed {
            self.notify(ConnectionEvent::Disconnected {
                gateway: connection.gateway().clone(),
                connection_id: connection.id(),
            });
        }
        removed
    }

    /// Route a downlink to the live session of `gateway`.
    pub async fn send_down(
        &self,
        gateway: &GatewayIdentity,
        message: DownlinkMessage,
    ) -> Result<(), GatewayError> {
        let connection = self
            .lookup(gateway)
            .ok_or_else(|| GatewayError::NotConnected(gateway.clone()))?;
        connection.send_down(message).await
    }

    pub fn contains(&self, gateway: &GatewayIdentity) -> bool {
        self.connections.contains_key(gateway)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Identities with a registered connection.
    pub fn gateways(&self) -> Vec<GatewayIdentity> {
        self.connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Subscribe to registry changes.
    pub fn subscribe(&self) -> ConnectionFeed {
        ConnectionFeed {
            receiver: self.events.subscribe(),
        }
    }

    fn notify(&self, event: ConnectionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(DuplicatePolicy::default())
    }
}
