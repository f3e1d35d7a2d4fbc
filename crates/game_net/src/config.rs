//! Service configuration types and defaults.

use std::net::SocketAddr;
use std::time::Duration;

/// Default tick interval, 20 ticks per second.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Default upper bound on a single frame, header included.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1_048_576;

/// How the inbound queue gets drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickMode {
    /// The worker pool ticks on its own every `interval`. A zero interval
    /// ticks back to back, yielding to other tasks in between.
    Auto { interval: Duration },
    /// Nothing ticks until the application calls [`Service::tick`].
    ///
    /// [`Service::tick`]: crate::Service::tick
    Manual,
}

impl Default for TickMode {
    fn default() -> Self {
        TickMode::Auto {
            interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

/// Settings shared by server and client services.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Number of worker threads in the pool
    pub worker_threads: usize,

    /// Maximum number of registered sessions
    pub max_connections: usize,

    /// Messages dispatched per tick; 0 means everything pending
    pub max_messages_per_tick: usize,

    pub tick_mode: TickMode,

    /// Whether to sample ticks per second and report them
    pub measure_tick_rate: bool,

    /// Largest accepted frame in bytes, header included
    pub max_frame_size: usize,

    /// Whether to disable Nagle's algorithm on new sockets
    pub nodelay: bool,

    /// Listen backlog passed to the server socket
    pub listen_backlog: i32,

    /// How long stopping waits for sessions and workers
    pub shutdown_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
            max_connections: 1000,
            max_messages_per_tick: 0,
            tick_mode: TickMode::default(),
            measure_tick_rate: true,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            nodelay: true,
            listen_backlog: 1024,
            shutdown_timeout: Duration::from_secs(3),
        }
    }
}

/// Configuration for a listening [`Server`](crate::Server).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The socket address to bind the listener to
    pub bind_address: SocketAddr,
    pub service: ServiceConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 60000)),
            service: ServiceConfig::default(),
        }
    }
}

/// Configuration for a connecting [`Client`](crate::Client).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Host name or address to resolve
    pub host: String,
    pub port: u16,
    pub service: ServiceConfig,
}

impl ClientConfig {
    /// The `host:port` string handed to the resolver.
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 60000,
            service: ServiceConfig::default(),
        }
    }
}
