//! Core sync server implementation.
//!
//! `SyncServer` owns the listener, the ticker and the persistence worker,
//! and hands every accepted socket to [`handle_connection`].

use crate::{
    config::ServerConfig, connection::ConnectionManager, error::ServerError, security::SecurityManager,
    server::handlers::handle_connection, service::SyncService,
};
use std::sync::Arc;
use sync_core::{spawn_persistence_worker, PositionStore, SceneCatalog, SessionManager, ShutdownState};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// The sync server.
///
/// # Architecture
///
/// * **Connection Management**: WebSocket lifecycle and outbound delivery
/// * **Security**: frame validation and action rate limiting
/// * **Sync Service**: the single serialized owner of session state
/// * **Ticker**: one global interval driving batch flushes and timers
/// * **Persistence Worker**: background writes to the position store
#[derive(Debug)]
pub struct SyncServer {
    config: ServerConfig,
    connection_manager: Arc<ConnectionManager>,
    service: Arc<SyncService>,
    security: Arc<SecurityManager>,
    shutdown_sender: broadcast::Sender<()>,
    persistence_task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncServer {
    /// Builds the server and spawns its persistence worker, so it must be
    /// called from within a tokio runtime.
    pub fn new(config: ServerConfig, catalog: Arc<dyn SceneCatalog>, store: Arc<dyn PositionStore>) -> Self {
        let connection_manager = Arc::new(ConnectionManager::new());
        let (persistence, persistence_task) = spawn_persistence_worker(store.clone());
        let manager = SessionManager::new(config.sync.clone(), catalog, persistence);
        let service = Arc::new(SyncService::new(manager, store, connection_manager.clone()));
        let security = Arc::new(SecurityManager::new(config.security.clone()));
        let (shutdown_sender, _) = broadcast::channel(1);

        Self {
            config,
            connection_manager,
            service,
            security,
            shutdown_sender,
            persistence_task: Mutex::new(Some(persistence_task)),
        }
    }

    /// Runs until `shutdown_state` is initiated or [`shutdown`](Self::shutdown)
    /// is called, then performs the final flush.
    pub async fn start_with_shutdown_state(&self, shutdown_state: ShutdownState) -> Result<(), ServerError> {
        self.start_internal(Some(shutdown_state)).await
    }

    pub async fn start(&self) -> Result<(), ServerError> {
        self.start_internal(None).await
    }

    async fn start_internal(&self, shutdown_state: Option<ShutdownState>) -> Result<(), ServerError> {
        info!("🚀 Starting sync server on {}", self.config.bind_address);

        let listener = TcpListener::bind(self.config.bind_address)
            .await
            .map_err(|e| ServerError::Network(format!("Failed to bind {}: {e}", self.config.bind_address)))?;

        let ticker = self.start_ticker(shutdown_state.clone());
        info!("🕒 Ticker started with interval: {}ms", self.config.sync.tick_interval_ms);

        let mut shutdown_receiver = self.shutdown_sender.subscribe();
        let accept_loop = async {
            loop {
                let (stream, addr) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                };

                if shutdown_state.as_ref().is_some_and(ShutdownState::is_shutdown_initiated) {
                    debug!("Refusing {} during shutdown", addr);
                    continue;
                }
                if self.connection_manager.connection_count().await >= self.config.max_connections {
                    warn!("🚫 Connection limit reached, refusing {}", addr);
                    continue;
                }

                let connection_manager = self.connection_manager.clone();
                let service = self.service.clone();
                let security = self.security.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, addr, connection_manager, service, security).await {
                        error!("Connection error: {:?}", e);
                    }
                });
            }
        };

        let shutdown_watch = async {
            match &shutdown_state {
                Some(state) => {
                    let mut poll = interval(self.config.sync.tick_interval());
                    while !state.is_shutdown_initiated() {
                        poll.tick().await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = accept_loop => {}
            _ = shutdown_watch => info!("🛑 Accept loop stopping - shutdown initiated"),
            _ = shutdown_receiver.recv() => info!("Internal shutdown signal received"),
        }

        ticker.abort();
        self.flush().await;
        if let Some(state) = &shutdown_state {
            state.complete_shutdown();
        }
        info!("Server stopped");
        Ok(())
    }

    /// Spawns the global ticker. One tick flushes batches and polls every
    /// countdown and grace timer.
    fn start_ticker(&self, shutdown_state: Option<ShutdownState>) -> JoinHandle<()> {
        let service = self.service.clone();
        let period = self.config.sync.tick_interval();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if shutdown_state.as_ref().is_some_and(ShutdownState::is_shutdown_initiated) {
                    info!("🕒 Ticker stopping - shutdown initiated");
                    break;
                }
                service.tick(Instant::now()).await;
            }
        })
    }

    /// Final flush: pending batches go out, positions are queued behind a
    /// stop command and the persistence worker is awaited.
    async fn flush(&self) {
        info!("🧹 Flushing pending state...");
        let saved = self.service.shutdown().await;
        debug!("{} positions queued for persistence", saved);

        if let Some(task) = self.persistence_task.lock().await.take() {
            // A slow store must not hold the process hostage.
            if tokio::time::timeout(std::time::Duration::from_secs(2), task).await.is_err() {
                debug!("Persistence worker still draining at shutdown");
            }
        }
        info!("✅ Server cleanup completed");
    }

    pub async fn shutdown(&self) -> Result<(), ServerError> {
        info!("🛑 Shutting down server...");
        let _ = self.shutdown_sender.send(());
        Ok(())
    }

    pub fn service(&self) -> Arc<SyncService> {
        self.service.clone()
    }

    pub fn connection_manager(&self) -> Arc<ConnectionManager> {
        self.connection_manager.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
