//! Configuration file handling.
//!
//! The TOML file mirrors [`sync_server::ServerConfig`] plus logging and
//! catalog settings. Every section except `[server]` may be omitted.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sync_core::{CatalogError, SceneCatalog, StaticCatalog, SyncConfig};
use sync_server::{SecurityConfig, ServerConfig};
use tracing::info;

fn default_max_connections() -> usize {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub server: ServerSettings,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub catalog: CatalogSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSettings {
    /// Network address to bind the server to (e.g., "127.0.0.1:8080")
    pub bind_address: String,
    /// Maximum number of concurrent client connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CatalogSettings {
    /// JSON scene catalog; the built-in catalog is used when unset
    pub path: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind_address: "127.0.0.1:8080".to_string(),
                max_connections: default_max_connections(),
            },
            sync: SyncConfig::default(),
            security: SecurityConfig::default(),
            logging: LoggingSettings::default(),
            catalog: CatalogSettings::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file, creating it with defaults when
    /// it does not exist.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    pub fn to_server_config(&self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        Ok(ServerConfig {
            bind_address: self.server.bind_address.parse()?,
            max_connections: self.server.max_connections,
            security: self.security.clone(),
            sync: self.sync.clone(),
        })
    }

    /// The configured scene catalog, or the built-in one.
    pub fn load_catalog(&self) -> Result<Arc<dyn SceneCatalog>, CatalogError> {
        match &self.catalog.path {
            Some(path) => Ok(Arc::new(StaticCatalog::load(PathBuf::from(path))?)),
            None => Ok(Arc::new(StaticCatalog::builtin())),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!("Invalid bind address: {}", &self.server.bind_address));
        }

        if self.server.max_connections == 0 {
            return Err("server.max_connections must be greater than 0".to_string());
        }

        self.sync.validate()?;

        if self.security.max_message_size == 0 {
            return Err("security.max_message_size must be greater than 0".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        if self.catalog.path.as_deref().is_some_and(str::is_empty) {
            return Err("catalog.path cannot be empty".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");

        let config = AppConfig::load_from_file(&path).await.expect("load");
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());

        let reloaded = AppConfig::load_from_file(&path).await.expect("reload");
        assert_eq!(reloaded, config);
    }

    #[tokio::test]
    async fn partial_sections_fall_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        let content = r#"
[server]
bind_address = "0.0.0.0:9100"

[sync]
countdown_ms = 3000
collide_with_enemies = true

[logging]
level = "debug"
"#;
        tokio::fs::write(&path, content).await.expect("write");

        let config = AppConfig::load_from_file(&path).await.expect("load");
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.sync.countdown_ms, 3000);
        assert!(config.sync.collide_with_enemies);
        assert_eq!(config.sync.disconnect_grace_ms, 15_000);
        assert_eq!(config.security, SecurityConfig::default());
        assert!(config.validate().is_ok());

        let server = config.to_server_config().expect("server config");
        assert_eq!(server.bind_address.port(), 9100);
        assert_eq!(server.sync.countdown_ms, 3000);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        assert!(config.validate().is_ok());

        config.server.bind_address = "invalid".to_string();
        assert!(config.validate().is_err());
        config.server.bind_address = "127.0.0.1:8080".to_string();

        config.sync.cell_size = 0.0;
        assert!(config.validate().is_err());
        config.sync.cell_size = 25.0;

        config.sync.max_members = 5;
        assert!(config.validate().is_err());
        config.sync.max_members = 4;

        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn catalog_defaults_to_builtin() {
        let config = AppConfig::default();
        let catalog = config.load_catalog().expect("catalog");
        assert!(catalog.scene_config("forest_clearing").is_some());

        let missing = AppConfig {
            catalog: CatalogSettings {
                path: Some("/nonexistent/scenes.json".to_string()),
            },
            ..AppConfig::default()
        };
        assert!(missing.load_catalog().is_err());
    }
}
