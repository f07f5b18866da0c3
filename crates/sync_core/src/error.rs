//! Error types for the sync engine.
//!
//! Every failure a handler can hit is a [`SyncError`]. None of them is fatal:
//! the transport uses [`SyncError::kind`] to decide how loudly to log and
//! whether the requesting client gets an `error` event back.

use crate::types::{CharacterId, ConnectionId, SessionCode};

/// Failure categories, used to pick log level and client visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid movement; silently reverted, logged at debug.
    Validation,
    /// Unknown session, member or target; ignored, logged at warn.
    NotFound,
    /// Session full; the requester receives an `error` event.
    Capacity,
    /// Action spam; dropped silently.
    RateLimit,
    /// Storage write/read failed; logged, retried on the next throttle window.
    Persistence,
    /// Malformed payload; dropped and logged.
    Protocol,
    /// A lobby request that is well formed but not allowed right now
    /// (not host, not everyone ready, already started).
    Rejected,
}

/// Enumeration of sync engine errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error("Session {0} not found")]
    SessionNotFound(SessionCode),

    #[error("Connection {0} is not part of any session")]
    ConnectionNotInSession(ConnectionId),

    #[error("Character {character} is not a member of session {code}")]
    MemberNotFound { code: SessionCode, character: CharacterId },

    #[error("Target {0} not found")]
    TargetNotFound(String),

    #[error("Session {0} is full")]
    SessionFull(SessionCode),

    #[error("Session {0} has already started")]
    AlreadyStarted(SessionCode),

    #[error("Session {0} has not started yet")]
    NotStarted(SessionCode),

    #[error("Only the host can start the game")]
    NotHost,

    #[error("Not all players are ready")]
    NotAllReady,

    #[error("Connection {0} is already in a session")]
    AlreadyInSession(ConnectionId),

    #[error("Target {target} is out of range ({distance:.2} > {reach:.2})")]
    OutOfRange { target: String, distance: f32, reach: f32 },

    #[error("Rejected movement: {0}")]
    Validation(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::SessionNotFound(_)
            | SyncError::ConnectionNotInSession(_)
            | SyncError::MemberNotFound { .. }
            | SyncError::TargetNotFound(_) => ErrorKind::NotFound,
            SyncError::SessionFull(_) => ErrorKind::Capacity,
            SyncError::AlreadyStarted(_)
            | SyncError::NotStarted(_)
            | SyncError::NotHost
            | SyncError::NotAllReady
            | SyncError::AlreadyInSession(_)
            | SyncError::OutOfRange { .. } => ErrorKind::Rejected,
            SyncError::Validation(_) => ErrorKind::Validation,
            SyncError::RateLimited => ErrorKind::RateLimit,
            SyncError::Persistence(_) => ErrorKind::Persistence,
            SyncError::Protocol(_) => ErrorKind::Protocol,
        }
    }

    /// Whether the requesting client should be told about this failure.
    ///
    /// Only lobby problems are user visible; movement rejections surface as
    /// the corrected state in the next batch.
    pub fn is_client_visible(&self) -> bool {
        match self {
            SyncError::SessionNotFound(_) => true,
            SyncError::OutOfRange { .. } => false,
            other => matches!(other.kind(), ErrorKind::Capacity | ErrorKind::Rejected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_and_lobby_rejections_reach_the_client() {
        assert!(SyncError::SessionFull(SessionCode::new("ABCDEF")).is_client_visible());
        assert!(SyncError::NotHost.is_client_visible());
        assert!(SyncError::SessionNotFound(SessionCode::new("ABCDEF")).is_client_visible());
    }

    #[test]
    fn gameplay_failures_stay_silent() {
        assert!(!SyncError::Validation("out of bounds".into()).is_client_visible());
        assert!(!SyncError::RateLimited.is_client_visible());
        assert!(!SyncError::TargetNotFound("goblin_1".into()).is_client_visible());
        assert!(!SyncError::OutOfRange { target: "goblin_1".into(), distance: 9.0, reach: 3.0 }
            .is_client_visible());
    }
}
