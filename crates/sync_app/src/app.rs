//! Application lifecycle: configuration, server startup, monitoring and
//! graceful shutdown.

use crate::{cli::CliArgs, config::AppConfig, logging::display_banner, signals::drain_on_signal};
use std::sync::Arc;
use sync_core::{MemoryPositionStore, ShutdownState};
use sync_server::SyncServer;
use tracing::{error, info, warn};

pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
    server: Arc<SyncServer>,
}

impl Application {
    /// Loads the configuration, applies CLI overrides, validates the result
    /// and builds the server.
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(bind_address) = args.bind_address {
            config.server.bind_address = bind_address;
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }
        if let Some(catalog_path) = args.catalog_path {
            config.catalog.path = Some(catalog_path.to_string_lossy().to_string());
        }

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        display_banner();

        let catalog = config.load_catalog()?;
        let server_config = config.to_server_config()?;
        let server = SyncServer::new(server_config, catalog, Arc::new(MemoryPositionStore::new()));

        Ok(Self {
            config,
            server: Arc::new(server),
        })
    }

    /// Runs the server until a termination signal arrives, then drains it.
    /// A second signal exits immediately.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting Horizon Sync Server");
        self.log_configuration_summary();

        let shutdown_state = ShutdownState::new();

        let server_handle = {
            let server = self.server.clone();
            let shutdown_state = shutdown_state.clone();
            tokio::spawn(async move {
                match server.start_with_shutdown_state(shutdown_state).await {
                    Ok(()) => info!("✅ Server completed successfully"),
                    Err(e) => {
                        error!("❌ Server error: {:?}", e);
                        std::process::exit(1);
                    }
                }
            })
        };

        let monitoring_handle = {
            let server = self.server.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
                interval.tick().await;
                loop {
                    interval.tick().await;
                    let connections = server.connection_manager().connection_count().await;
                    let sessions = server.service().inspect(|m| m.registry().len()).await;
                    info!("📊 System Health - {} connections | {} sessions", connections, sessions);
                }
            })
        };

        info!("🎮 Ready to accept connections on {}", self.config.server.bind_address);
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        drain_on_signal(&shutdown_state).await?;
        monitoring_handle.abort();

        info!("⏳ Waiting for the server to flush pending state...");
        match tokio::time::timeout(tokio::time::Duration::from_secs(8), server_handle).await {
            Ok(_) => info!("✅ Server task completed gracefully"),
            Err(_) => warn!("⏰ Server task did not complete within timeout"),
        }

        let sessions = self.server.service().inspect(|m| m.registry().len()).await;
        info!("📊 Final Statistics: {} sessions still registered", sessions);
        info!("✅ Horizon Sync Server shutdown complete");
        Ok(())
    }

    fn log_configuration_summary(&self) {
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", self.config.server.bind_address);
        info!("  👥 Max connections: {}", self.config.server.max_connections);
        info!("  🕒 Tick interval: {}ms", self.config.sync.tick_interval_ms);
        info!(
            "  🗺️ Catalog: {}",
            self.config.catalog.path.as_deref().unwrap_or("built-in")
        );
    }
}
