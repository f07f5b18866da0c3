//! Listener, ticker and per-connection handling.

pub mod core;
pub mod handlers;

pub use core::SyncServer;
