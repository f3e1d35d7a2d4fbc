//! Command-line argument parsing

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the demo game server.
///
/// Every option overrides the matching value from the configuration file.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Tick-driven TCP game server", long_about = None)]
pub struct CliArgs {
    /// Configuration file path
    ///
    /// If the file doesn't exist, a default configuration will be created.
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Bind address (e.g., 127.0.0.1:60000)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Output logs in JSON format
    #[arg(long)]
    pub json_logs: bool,

    /// Number of worker threads
    #[arg(short, long)]
    pub workers: Option<usize>,
}

impl CliArgs {
    /// Applies the overrides on top of a loaded configuration.
    pub fn apply(&self, config: &mut crate::config::AppConfig) {
        if let Some(bind) = &self.bind {
            config.server.bind_address = bind.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.json_logs {
            config.logging.json_format = true;
        }
        if let Some(workers) = self.workers {
            config.server.worker_threads = workers;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_cli_defaults() {
        let args = CliArgs::parse_from(["game_server"]);
        assert_eq!(args.config, PathBuf::from("config.toml"));
        assert!(args.bind.is_none());
        assert!(args.log_level.is_none());
        assert!(!args.json_logs);
        assert!(args.workers.is_none());
    }

    #[test]
    fn test_overrides_are_applied() {
        let args = CliArgs::parse_from([
            "game_server",
            "--bind",
            "0.0.0.0:9000",
            "--log-level",
            "debug",
            "--json-logs",
            "--workers",
            "2",
        ]);
        let mut config = AppConfig::default();
        args.apply(&mut config);

        assert_eq!(config.server.bind_address, "0.0.0.0:9000");
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
        assert_eq!(config.server.worker_threads, 2);
    }
}
