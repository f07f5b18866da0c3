//! # Sync Server
//!
//! WebSocket transport for the session-sync engine in [`sync_core`].
//!
//! ## Message Flow
//!
//! 1. Client sends a text frame with an `{event, data}` envelope
//! 2. The frame is validated (size, nesting, string and collection limits)
//! 3. It is decoded into a typed [`sync_core::ClientEvent`]
//! 4. Movement and attacks pass a per-connection token bucket
//! 5. The [`SyncService`] applies the event to the one `SessionManager`
//! 6. Queued outbound events are serialized once and written to their targets
//!
//! A single ticker (50 ms by default) flushes batched deltas and polls the
//! countdown and reconnect-grace timers. Positions are written by a
//! background persistence worker and never awaited on the hot path.
//!
//! ## Error Handling
//!
//! [`ServerError`] covers transport failures. Rejected client requests are
//! [`sync_core::SyncError`]s, logged by category inside the engine; only a
//! bind failure at startup is fatal.

pub use config::{SecurityConfig, ServerConfig};
pub use error::ServerError;
pub use server::SyncServer;
pub use service::SyncService;
pub use utils::{create_server, create_server_with_config};

pub mod config;
pub mod error;
pub mod security;
pub mod server;
pub mod service;
pub mod utils;

mod connection;
mod messaging;
mod tests;

pub use connection::ConnectionManager;
