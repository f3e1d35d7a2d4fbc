use anyhow::{anyhow, Context, Result};
use clap::Parser;
use game_net::Server;
use game_server::cli::CliArgs;
use game_server::logging::setup_logging;
use game_server::signals::wait_for_shutdown_signal;
use game_server::{AppConfig, GameServerHandler};
use tracing::info;

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let mut config = AppConfig::load_from_file(&args.config)?;
    args.apply(&mut config);
    config
        .validate()
        .map_err(|e| anyhow!("Configuration validation failed: {e}"))?;

    setup_logging(&config.logging)?;

    let server = Server::start(config.to_server_config()?, GameServerHandler::new())
        .context("failed to start server")?;

    info!("📋 Configuration Summary:");
    info!("  🌐 Listening on: {}", server.local_addr());
    info!("  🧵 Worker threads: {}", config.server.worker_threads);
    info!("  👥 Max connections: {}", config.server.max_connections);
    info!("  ⏱️ Tick interval: {}ms", config.server.tick_interval_ms);
    info!("🛑 Press Ctrl+C to gracefully shutdown");

    // Park the main thread until Ctrl+C or SIGTERM.
    server.service().block_on(wait_for_shutdown_signal())?;

    info!("🛑 Shutdown signal received, closing sessions...");
    server.stop();
    info!("✅ Game server shutdown complete");
    Ok(())
}
