//! Connection manager for tracking sockets and delivering outbound frames.
//!
//! Outbound frames go through one broadcast channel tagged with the target
//! connection id; each connection's writer task filters for its own id.

use super::{client::ClientConnection, ConnectionId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info};

#[derive(Debug)]
pub struct ConnectionManager {
    connections: Arc<RwLock<HashMap<ConnectionId, ClientConnection>>>,

    /// Ids start at 1 and are never reused
    next_id: Arc<AtomicUsize>,

    sender: broadcast::Sender<(ConnectionId, Arc<str>)>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(4096);
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicUsize::new(1)),
            sender,
        }
    }

    /// Registers a new connection and returns its id.
    pub async fn add_connection(&self, remote_addr: SocketAddr) -> ConnectionId {
        let connection_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut connections = self.connections.write().await;
        connections.insert(connection_id, ClientConnection::new(remote_addr));
        info!("🔗 Connection {} from {}", connection_id, remote_addr);
        connection_id
    }

    pub async fn remove_connection(&self, connection_id: ConnectionId) {
        let mut connections = self.connections.write().await;
        if let Some(connection) = connections.remove(&connection_id) {
            info!(
                "❌ Connection {} from {} disconnected after {} messages in {:?}",
                connection_id,
                connection.remote_addr,
                connection.messages_received,
                connection.connected_at.elapsed().unwrap_or_default()
            );
        }
    }

    pub async fn record_message(&self, connection_id: ConnectionId) {
        if let Some(connection) = self.connections.write().await.get_mut(&connection_id) {
            connection.messages_received += 1;
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Queues one frame for one connection.
    pub fn send_to_connection(&self, connection_id: ConnectionId, message: Arc<str>) {
        // No receivers simply means nobody is connected.
        if self.sender.receiver_count() == 0 {
            return;
        }
        if let Err(e) = self.sender.send((connection_id, message)) {
            error!("Failed to queue message for connection {}: {}", connection_id, e);
        }
    }

    /// Queues the same frame for several connections.
    pub fn send_to_many(&self, targets: &[ConnectionId], message: Arc<str>) {
        for &connection_id in targets {
            self.send_to_connection(connection_id, message.clone());
        }
        debug!("📡 Queued message for {} connections", targets.len());
    }

    /// Receiver for outbound frames; writers filter on their own id.
    pub fn subscribe(&self) -> broadcast::Receiver<(ConnectionId, Arc<str>)> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ids_are_unique_and_counted() {
        let manager = ConnectionManager::new();
        let addr: SocketAddr = "127.0.0.1:9000".parse().expect("addr");
        let a = manager.add_connection(addr).await;
        let b = manager.add_connection(addr).await;
        assert_ne!(a, b);
        assert_eq!(manager.connection_count().await, 2);

        manager.record_message(b).await;
        manager.remove_connection(a).await;
        manager.remove_connection(a).await;
        assert_eq!(manager.connection_count().await, 1);

        let c = manager.add_connection(addr).await;
        assert!(c > b);
    }

    #[tokio::test]
    async fn frames_are_tagged_with_their_target() {
        let manager = ConnectionManager::new();
        let mut receiver = manager.subscribe();
        manager.send_to_many(&[3, 5], Arc::from("{\"event\":\"pong\"}"));

        let (first, text) = receiver.recv().await.expect("first");
        assert_eq!(first, 3);
        assert_eq!(&*text, "{\"event\":\"pong\"}");
        let (second, _) = receiver.recv().await.expect("second");
        assert_eq!(second, 5);
    }
}
