//! Configuration management for the demo game server.
//!
//! Loads the TOML configuration, validates it and converts it into the
//! networking layer's [`ServerConfig`].

use anyhow::{Context, Result};
use game_net::{ServerConfig, ServiceConfig, TickMode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

fn default_tick_interval() -> u64 {
    50 // 20 ticks per second
}

fn default_worker_threads() -> usize {
    num_cpus::get()
}

fn default_max_connections() -> usize {
    1000
}

fn default_max_frame_size() -> usize {
    game_net::config::DEFAULT_MAX_FRAME_SIZE
}

fn default_true() -> bool {
    true
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
}

/// Network and tick settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to bind the server to (e.g., "127.0.0.1:60000")
    pub bind_address: String,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Maximum number of concurrent client sessions
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Server tick interval in milliseconds (0 ticks back to back)
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Messages dispatched per tick (0 means all pending)
    #[serde(default)]
    pub max_messages_per_tick: usize,
    #[serde(default = "default_true")]
    pub measure_tick_rate: bool,
    /// Largest accepted frame in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind_address: "127.0.0.1:60000".to_string(),
                worker_threads: default_worker_threads(),
                max_connections: default_max_connections(),
                tick_interval_ms: default_tick_interval(),
                max_messages_per_tick: 0,
                measure_tick_rate: true,
                max_frame_size: default_max_frame_size(),
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration to `path`
    /// and returns it.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            std::fs::write(path, toml_content)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Checks addresses, limits and the log level.
    pub fn validate(&self) -> Result<(), String> {
        if self
            .server
            .bind_address
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(format!(
                "Invalid bind address: {}",
                &self.server.bind_address
            ));
        }

        if self.server.worker_threads == 0 {
            return Err("worker_threads must be at least 1".to_string());
        }
        if self.server.max_connections == 0 {
            return Err("max_connections must be at least 1".to_string());
        }
        if self.server.max_frame_size < game_net::MessageHeader::SIZE {
            return Err(format!(
                "max_frame_size must be at least {} bytes",
                game_net::MessageHeader::SIZE
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }

    pub fn to_server_config(&self) -> Result<ServerConfig> {
        let bind_address = self
            .server
            .bind_address
            .parse()
            .with_context(|| format!("invalid bind address {}", self.server.bind_address))?;

        Ok(ServerConfig {
            bind_address,
            service: ServiceConfig {
                worker_threads: self.server.worker_threads,
                max_connections: self.server.max_connections,
                max_messages_per_tick: self.server.max_messages_per_tick,
                tick_mode: TickMode::Auto {
                    interval: Duration::from_millis(self.server.tick_interval_ms),
                },
                measure_tick_rate: self.server.measure_tick_rate,
                max_frame_size: self.server.max_frame_size,
                ..ServiceConfig::default()
            },
        })
    }
}
