//! Registry of active chat connections
//!
//! Maps each registered connection to the username frame it sent on connect
//! and the queue feeding its writer task. The username frame is stored raw so
//! it can be prefixed to every broadcast without re-encoding.
//!
//! The registry only does bookkeeping. Sockets and tasks belong to the
//! dispatcher, which keeps this table in step with its watch set.

use shared::Frame;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Opaque per-connection handle, assigned at accept time
pub type ConnectionId = u64;

/// Bytes queued for a connection's writer task
pub type Outbound = Arc<[u8]>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),

    #[error("connection {0} is not registered")]
    NotFound(ConnectionId),
}

/// A registered client
#[derive(Debug)]
pub struct Client {
    /// Connection handle
    pub id: ConnectionId,
    /// Peer address, for logging
    pub addr: SocketAddr,
    /// Username frame exactly as the client sent it
    pub username: Frame,
    /// Queue drained by the connection's writer task
    pub outbound: mpsc::Sender<Outbound>,
}

impl Client {
    pub fn new(
        id: ConnectionId,
        addr: SocketAddr,
        username: Frame,
        outbound: mpsc::Sender<Outbound>,
    ) -> Self {
        Self {
            id,
            addr,
            username,
            outbound,
        }
    }

    pub fn name(&self) -> String {
        self.username.text()
    }
}

/// Active connections keyed by handle
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    clients: HashMap<ConnectionId, Client>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a client, refusing to overwrite an existing entry
    pub fn register(&mut self, client: Client) -> Result<(), RegistryError> {
        if self.clients.contains_key(&client.id) {
            return Err(RegistryError::DuplicateConnection(client.id));
        }
        self.clients.insert(client.id, client);
        Ok(())
    }

    /// Removes a client and returns its entry
    ///
    /// Removing an unknown handle is an error rather than a no-op: the
    /// dispatcher removes each connection exactly once.
    pub fn unregister(&mut self, id: ConnectionId) -> Result<Client, RegistryError> {
        self.clients.remove(&id).ok_or(RegistryError::NotFound(id))
    }

    pub fn lookup(&self, id: ConnectionId) -> Result<&Client, RegistryError> {
        self.clients.get(&id).ok_or(RegistryError::NotFound(id))
    }

    /// Every registered client except `exclude`, in no particular order
    pub fn broadcast_targets(&self, exclude: ConnectionId) -> impl Iterator<Item = &Client> + '_ {
        self.clients.values().filter(move |client| client.id != exclude)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.clients.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.clients.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::FrameCodec;

    fn test_addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn test_client(id: ConnectionId, name: &str) -> (Client, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        let username = FrameCodec::default().encode(name.as_bytes()).unwrap();
        (Client::new(id, test_addr(9000 + id as u16), username, tx), rx)
    }

    #[test]
    fn test_registry_creation() {
        let registry = ConnectionRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ConnectionRegistry::new();
        let (client, _rx) = test_client(1, "alice");

        registry.register(client).unwrap();

        let found = registry.lookup(1).unwrap();
        assert_eq!(found.name(), "alice");
        assert_eq!(found.username.header(), b"5         ");
        assert!(registry.contains(1));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_duplicate() {
        let mut registry = ConnectionRegistry::new();
        let (first, _rx1) = test_client(1, "alice");
        let (second, _rx2) = test_client(1, "mallory");

        registry.register(first).unwrap();
        assert_eq!(
            registry.register(second),
            Err(RegistryError::DuplicateConnection(1))
        );
        assert_eq!(registry.lookup(1).unwrap().name(), "alice");
    }

    #[test]
    fn test_unregister() {
        let mut registry = ConnectionRegistry::new();
        let (client, _rx) = test_client(3, "carol");
        registry.register(client).unwrap();

        let removed = registry.unregister(3).unwrap();
        assert_eq!(removed.name(), "carol");
        assert!(registry.is_empty());

        assert!(matches!(
            registry.unregister(3),
            Err(RegistryError::NotFound(3))
        ));
    }

    #[test]
    fn test_lookup_missing() {
        let registry = ConnectionRegistry::new();
        assert!(matches!(registry.lookup(42), Err(RegistryError::NotFound(42))));
    }

    #[test]
    fn test_broadcast_targets_exclude_sender() {
        let mut registry = ConnectionRegistry::new();
        let mut receivers = Vec::new();
        for (id, name) in [(1, "alice"), (2, "bob"), (3, "carol")] {
            let (client, rx) = test_client(id, name);
            registry.register(client).unwrap();
            receivers.push(rx);
        }

        let mut targets: Vec<ConnectionId> = registry.broadcast_targets(2).map(|c| c.id).collect();
        targets.sort_unstable();
        assert_eq!(targets, vec![1, 3]);

        let mut ids: Vec<ConnectionId> = registry.ids().collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_broadcast_targets_single_client() {
        let mut registry = ConnectionRegistry::new();
        let (client, _rx) = test_client(1, "alice");
        registry.register(client).unwrap();

        assert_eq!(registry.broadcast_targets(1).count(), 0);
        assert_eq!(registry.broadcast_targets(99).count(), 1);
    }
}
