//! Ping client for the demo game server.

pub mod app;

pub use app::{PingClientHandler, PingStats};
