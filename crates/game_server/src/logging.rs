//! Logging system setup and configuration
//!
//! Initializes the global `tracing` subscriber. `RUST_LOG` takes precedence
//! over the configured level.

use anyhow::{anyhow, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingSettings;

/// Installs the global subscriber, human-readable or JSON.
///
/// Fails if a global subscriber is already installed.
pub fn setup_logging(config: &LoggingSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_thread_names(true),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_names(true),
            )
            .try_init()
    };
    installed.map_err(|e| anyhow!("failed to install logger: {e}"))?;

    info!("🔧 Logging initialized with level: {}", config.level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_setup_fails() {
        let settings = LoggingSettings {
            level: "debug".to_string(),
            json_format: false,
        };
        // Whichever call comes first in this process wins the global slot.
        let _ = setup_logging(&settings);
        assert!(setup_logging(&settings).is_err());
    }
}
