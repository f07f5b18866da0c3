//! Input validation and per-connection action limiting.

use crate::config::SecurityConfig;
use crate::connection::ConnectionId;
use serde::{Deserialize, Serialize};
use sync_core::SyncError;

pub mod input_validation;
pub mod rate_limiter;

/// Front door for every inbound frame.
#[derive(Debug)]
pub struct SecurityManager {
    config: SecurityConfig,
    rate_limiter: rate_limiter::RateLimiter,
}

impl SecurityManager {
    pub fn new(config: SecurityConfig) -> Self {
        let rate_limiter = rate_limiter::RateLimiter::new(config.max_actions_per_second, config.action_burst);
        Self { config, rate_limiter }
    }

    /// Structural validation; returns the event name on success.
    pub fn validate_message(&self, message: &[u8]) -> Result<String, SecurityError> {
        input_validation::validate_json_message(message, &self.config)
    }

    /// Spends one action token for `connection_id`.
    pub async fn check_action(&self, connection_id: ConnectionId) -> Result<(), SecurityError> {
        if self.config.enable_rate_limiting && !self.rate_limiter.check_rate_limit(connection_id).await {
            return Err(SecurityError::RateLimitExceeded(connection_id));
        }
        Ok(())
    }

    pub async fn on_disconnect(&self, connection_id: ConnectionId) {
        self.rate_limiter.forget(connection_id).await;
    }

    pub fn get_stats(&self) -> SecurityStats {
        SecurityStats {
            rate_limited_requests: self.rate_limiter.blocked_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityStats {
    pub rate_limited_requests: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Rate limit exceeded for connection {0}")]
    RateLimitExceeded(ConnectionId),

    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    #[error("Malicious content detected")]
    MaliciousContent,
}

/// Rejected frames join the engine's taxonomy: spent buckets are
/// [`SyncError::RateLimited`], everything else is a protocol error.
impl From<SecurityError> for SyncError {
    fn from(error: SecurityError) -> Self {
        match error {
            SecurityError::RateLimitExceeded(_) => SyncError::RateLimited,
            other => SyncError::Protocol(other.to_string()),
        }
    }
}
