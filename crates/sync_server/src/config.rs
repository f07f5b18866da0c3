//! Server configuration types and defaults.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use sync_core::SyncConfig;

/// Configuration for the sync server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The socket address to bind the server to
    pub bind_address: SocketAddr,

    /// Maximum number of concurrent connections allowed
    pub max_connections: usize,

    /// Security configuration settings
    pub security: SecurityConfig,

    /// Engine tuning (ticker interval, grace windows, tolerances)
    pub sync: SyncConfig,
}

/// Limits applied to every inbound frame before it is decoded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    /// Enable per-connection action rate limiting
    pub enable_rate_limiting: bool,

    /// Sustained movement/attack messages allowed per second and connection
    pub max_actions_per_second: u32,

    /// Burst allowance on top of the sustained rate
    pub action_burst: u32,

    /// Maximum message size in bytes
    pub max_message_size: usize,

    /// Maximum allowed nesting depth for JSON messages
    pub max_json_depth: usize,

    /// Maximum allowed string length in JSON
    pub max_string_length: usize,

    /// Maximum allowed array/object size
    pub max_collection_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_connections: 1000,
            security: SecurityConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_rate_limiting: true,
            // Clients send movement at up to 20 Hz.
            max_actions_per_second: 30,
            action_burst: 10,
            max_message_size: 16 * 1024,
            max_json_depth: 6,
            max_string_length: 256,
            max_collection_size: 64,
        }
    }
}
