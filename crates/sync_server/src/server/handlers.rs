//! Per-connection task: handshake, read loop, write loop, cleanup.

use crate::{
    connection::ConnectionManager, error::ServerError, messaging::route_client_message, security::SecurityManager,
    service::SyncService,
};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, trace, warn};

/// Handles a single client connection from handshake to cleanup.
///
/// Two tasks run until either finishes:
///
/// * **Incoming**: text frames are routed into the engine in arrival order
/// * **Outgoing**: frames queued for this connection id are written out
///
/// When the socket goes away the engine is told, which starts the
/// reconnect grace window for members of running games.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    connection_manager: Arc<ConnectionManager>,
    service: Arc<SyncService>,
    security: Arc<SecurityManager>,
) -> Result<(), ServerError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| ServerError::Network(format!("WebSocket handshake failed: {e}")))?;

    let (ws_sender, mut ws_receiver) = ws_stream.split();
    let ws_sender = Arc::new(tokio::sync::Mutex::new(ws_sender));
    let mut message_receiver = connection_manager.subscribe();
    let connection_id = connection_manager.add_connection(addr).await;

    let ws_sender_incoming = ws_sender.clone();
    let ws_sender_outgoing = ws_sender;

    let incoming_task = {
        let connection_manager = connection_manager.clone();
        let service = service.clone();
        let security = security.clone();

        async move {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        connection_manager.record_message(connection_id).await;
                        if let Err(e) = route_client_message(&text, connection_id, &service, &security).await {
                            trace!("❌ Message routing error: {}", e);
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("🔌 Client {} requested close", connection_id);
                        break;
                    }
                    Ok(Message::Ping(data)) => {
                        let mut ws_sender = ws_sender_incoming.lock().await;
                        if let Err(e) = ws_sender.send(Message::Pong(data)).await {
                            debug!("Failed to answer ping from {}: {}", connection_id, e);
                        }
                    }
                    Err(e) => {
                        error!("WebSocket error for connection {}: {}", connection_id, e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    };

    let outgoing_task = async move {
        loop {
            match message_receiver.recv().await {
                Ok((target, message)) if target == connection_id => {
                    let mut ws_sender = ws_sender_outgoing.lock().await;
                    if let Err(e) = ws_sender.send(Message::Text(message.to_string().into())).await {
                        error!("Failed to send message: {}", e);
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("⚠️ Connection {} fell behind, {} frames skipped", connection_id, skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    tokio::select! {
        _ = incoming_task => {},
        _ = outgoing_task => {},
    }

    service.disconnect(connection_id).await;
    security.on_disconnect(connection_id).await;
    connection_manager.remove_connection(connection_id).await;
    Ok(())
}
