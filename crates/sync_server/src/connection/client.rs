//! Per-socket bookkeeping.

use std::net::SocketAddr;
use std::time::SystemTime;

/// One accepted WebSocket connection.
///
/// Session membership is not stored here: the registry in the engine owns
/// that mapping and survives reconnects.
#[derive(Debug)]
pub struct ClientConnection {
    /// The remote network address of the client
    pub remote_addr: SocketAddr,

    /// When this connection was established
    pub connected_at: SystemTime,

    /// Messages received so far
    pub messages_received: u64,
}

impl ClientConnection {
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr,
            connected_at: SystemTime::now(),
            messages_received: 0,
        }
    }
}
