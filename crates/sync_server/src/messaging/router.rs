//! Routing of raw client frames into the engine.

use crate::{connection::ConnectionId, error::ServerError, security::SecurityManager, service::SyncService};
use sync_core::{ClientEvent, SyncError};
use tracing::{trace, warn};

/// Validates, decodes and applies one text frame.
///
/// # Message Flow
///
/// 1. Structural validation (size, depth, string and collection limits)
/// 2. Typed decoding of the `{event, data}` envelope
/// 3. Action rate limiting for movement and attacks
/// 4. Dispatch through the [`SyncService`]
///
/// Engine-level failures are logged and answered inside the engine; only
/// malformed frames surface as an `Err` here.
pub async fn route_client_message(
    text: &str,
    connection_id: ConnectionId,
    service: &SyncService,
    security: &SecurityManager,
) -> Result<(), ServerError> {
    let event_name = security.validate_message(text.as_bytes()).map_err(|e| {
        let error = SyncError::from(e);
        warn!("⚠️ Rejected frame from connection {}: {}", connection_id, error);
        ServerError::Network(error.to_string())
    })?;

    let event = ClientEvent::decode(text).map_err(|e| {
        warn!("⚠️ Malformed '{}' from connection {}: {}", event_name, connection_id, e);
        ServerError::Network(e.to_string())
    })?;

    if event.is_rate_limited() {
        if let Err(e) = security.check_action(connection_id).await {
            let error = SyncError::from(e);
            trace!("{} from connection {} dropped: {}", event_name, connection_id, error);
            return Ok(());
        }
    }

    if service.handle_event(connection_id, event).await.is_err() {
        trace!("'{}' from connection {} was not applied", event_name, connection_id);
    }
    Ok(())
}
