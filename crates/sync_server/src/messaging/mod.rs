//! Inbound message handling.

pub mod router;

pub use router::route_client_message;
