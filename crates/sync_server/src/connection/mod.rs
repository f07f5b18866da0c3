//! Connection tracking and outbound delivery.

pub mod client;
pub mod manager;

pub use manager::ConnectionManager;
pub use sync_core::ConnectionId;
