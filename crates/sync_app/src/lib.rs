//! # Horizon Sync Server Application
//!
//! Binary entry point wiring configuration, logging and signals around
//! [`sync_server::SyncServer`].
//!
//! ```bash
//! sync_app --config config.toml --bind 0.0.0.0:8080 --catalog scenes.json
//! ```

pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod signals;

pub use app::Application;
pub use cli::CliArgs;
pub use config::AppConfig;

pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Logging needs the file's settings; failures surface again in Application::new.
    let mut logging = AppConfig::load_from_file(&args.config_path)
        .await
        .map(|config| config.logging)
        .unwrap_or_default();
    if let Some(level) = &args.log_level {
        logging.level = level.clone();
    }
    logging::setup_logging(&logging, args.json_logs)?;

    let app = Application::new(args).await?;
    app.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn application_builds_from_generated_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let args = CliArgs {
            config_path: dir.path().join("config.toml"),
            bind_address: Some("127.0.0.1:0".to_string()),
            log_level: Some("debug".to_string()),
            json_logs: false,
            catalog_path: None,
        };

        let app = Application::new(args).await;
        assert!(app.is_ok());
        assert!(dir.path().join("config.toml").exists());
    }

    #[tokio::test]
    async fn invalid_overrides_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let args = CliArgs {
            config_path: dir.path().join("config.toml"),
            bind_address: Some("not-an-address".to_string()),
            log_level: None,
            json_logs: false,
            catalog_path: None,
        };
        assert!(Application::new(args).await.is_err());

        let args = CliArgs {
            config_path: dir.path().join("config.toml"),
            bind_address: None,
            log_level: None,
            json_logs: false,
            catalog_path: Some(PathBuf::from("/nonexistent/scenes.json")),
        };
        assert!(Application::new(args).await.is_err());
    }
}
