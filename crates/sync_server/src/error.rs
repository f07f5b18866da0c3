//! Transport-level error types.

/// Errors raised by the server itself, as opposed to rejected client
/// requests, which are [`sync_core::SyncError`]s.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding, handshake and socket failures
    #[error("Network error: {0}")]
    Network(String),

    /// Serialization failures and other internal problems
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sync_core::SyncError> for ServerError {
    fn from(error: sync_core::SyncError) -> Self {
        ServerError::Internal(error.to_string())
    }
}
