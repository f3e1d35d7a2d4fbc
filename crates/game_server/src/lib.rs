//! Demo game server built on `game_net`.
//!
//! The binary loads a TOML configuration, installs logging, starts a
//! [`game_net::Server`] with [`GameServerHandler`] and runs until SIGINT or
//! SIGTERM. The library half is shared with the demo client and the tests.

pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod protocol;
pub mod signals;

pub use app::GameServerHandler;
pub use config::AppConfig;
pub use protocol::GameMessage;
