//! Factory helpers for building servers with the bundled collaborators.

use crate::{config::ServerConfig, server::SyncServer};
use std::sync::Arc;
use sync_core::{MemoryPositionStore, StaticCatalog};

/// Creates a server with default configuration, the built-in scene
/// catalog and an in-memory position store.
///
/// Must be called from within a tokio runtime.
pub fn create_server() -> SyncServer {
    create_server_with_config(ServerConfig::default())
}

/// Same as [`create_server`] with custom configuration.
///
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() {
/// use sync_server::{create_server_with_config, ServerConfig};
///
/// let config = ServerConfig {
///     bind_address: "0.0.0.0:9000".parse().expect("address"),
///     max_connections: 200,
///     ..Default::default()
/// };
/// let server = create_server_with_config(config);
/// # }
/// ```
pub fn create_server_with_config(config: ServerConfig) -> SyncServer {
    SyncServer::new(
        config,
        Arc::new(StaticCatalog::builtin()),
        Arc::new(MemoryPositionStore::new()),
    )
}
