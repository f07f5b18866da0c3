//! Command-line interface handling.

use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

/// Command line arguments; every option overrides the configuration file.
#[derive(Debug, Clone, PartialEq)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for bind address
    pub bind_address: Option<String>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Optional JSON scene catalog replacing the built-in one
    pub catalog_path: Option<PathBuf>,
}

impl CliArgs {
    pub fn command() -> Command {
        Command::new("Horizon Sync Server")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Authoritative session sync server for small co-op games")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("config.toml"),
            )
            .arg(
                Arg::new("bind")
                    .short('b')
                    .long("bind")
                    .value_name("ADDRESS")
                    .help("Bind address (e.g., 127.0.0.1:8080)"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(clap::ArgAction::SetTrue),
            )
            .arg(
                Arg::new("catalog")
                    .long("catalog")
                    .value_name("FILE")
                    .help("JSON scene catalog (defaults to the built-in catalog)"),
            )
    }

    pub fn parse() -> Self {
        Self::from_matches(&Self::command().get_matches())
    }

    pub fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config.toml")),
            bind_address: matches.get_one::<String>("bind").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            catalog_path: matches.get_one::<String>("catalog").map(PathBuf::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        let matches = CliArgs::command()
            .try_get_matches_from(args)
            .expect("valid arguments");
        CliArgs::from_matches(&matches)
    }

    #[test]
    fn defaults() {
        let args = parse(&["sync_app"]);
        assert_eq!(args.config_path, PathBuf::from("config.toml"));
        assert_eq!(args.bind_address, None);
        assert!(!args.json_logs);
        assert_eq!(args.catalog_path, None);
    }

    #[test]
    fn overrides() {
        let args = parse(&[
            "sync_app",
            "-c",
            "prod.toml",
            "--bind",
            "0.0.0.0:9000",
            "-l",
            "debug",
            "--json-logs",
            "--catalog",
            "scenes.json",
        ]);
        assert_eq!(args.config_path, PathBuf::from("prod.toml"));
        assert_eq!(args.bind_address.as_deref(), Some("0.0.0.0:9000"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
        assert_eq!(args.catalog_path, Some(PathBuf::from("scenes.json")));
    }
}
