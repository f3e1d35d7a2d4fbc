use anyhow::Result;
use clap::Parser;
use game_client::app::{run_pings, PingClientHandler, PingStats};
use game_net::{Client, ClientConfig, ServiceConfig, TickMode};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Ping client for the demo game server", long_about = None)]
struct Args {
    /// Server host name or address
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = 60000)]
    port: u16,

    /// Number of pings to send
    #[arg(short = 'n', long, default_value_t = 5)]
    pings: usize,

    /// Delay between pings in milliseconds
    #[arg(short, long, default_value_t = 1000)]
    interval_ms: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_target(false)
        .init();

    info!("Connecting to {}:{}", args.host, args.port);
    let config = ClientConfig {
        host: args.host,
        port: args.port,
        service: ServiceConfig {
            worker_threads: 2,
            tick_mode: TickMode::Manual,
            measure_tick_rate: false,
            ..ServiceConfig::default()
        },
    };

    let stats = Arc::new(PingStats::default());
    let client = Client::connect(config, PingClientHandler::new(stats.clone()))?;

    let answered = run_pings(
        &client,
        &stats,
        args.pings,
        Duration::from_millis(args.interval_ms),
    )?;
    if let Some(average) = stats.average_round_trip() {
        info!(
            "📊 {} ping(s) answered, average {:.3}ms",
            answered,
            average.as_secs_f64() * 1000.0
        );
    }

    client.stop();
    Ok(())
}
