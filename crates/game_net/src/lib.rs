//! # game_net
//!
//! Asynchronous TCP messaging for small game servers and their clients.
//!
//! ## Core Features
//!
//! - **Framed messages**: an 8-byte header (`id`, total `size`) followed by a
//!   payload packed as a stack of plain-old-data values
//! - **Ordered sends**: per-session FIFO transmission with at most one write
//!   in flight
//! - **Tick-driven dispatch**: received messages queue up and are handed to
//!   the application in batches, from one logical thread at a time
//! - **Session registry**: admission gate, unique ids, broadcast with
//!   exclusion, exactly-once unregister notification
//!
//! ## Quick Start
//!
//! ```no_run
//! use game_net::{Message, Server, ServerConfig, Service, ServiceHandler, Session};
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! impl ServiceHandler for Echo {
//!     fn on_message_received(
//!         &self,
//!         service: &Service,
//!         session: Option<&Arc<Session>>,
//!         message: Message,
//!     ) {
//!         if let Some(session) = session {
//!             let _ = service.send_to(session, message);
//!         }
//!     }
//! }
//!
//! let server = Server::start(ServerConfig::default(), Echo)?;
//! println!("listening on {}", server.local_addr());
//! # Ok::<(), game_net::NetError>(())
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod inbound;
pub mod message;
pub mod pool;
pub mod registry;
pub mod server;
pub mod service;
pub mod session;

pub use client::Client;
pub use config::{ClientConfig, ServerConfig, ServiceConfig, TickMode};
pub use error::{NetError, Result};
pub use handler::ServiceHandler;
pub use message::{Message, MessageHeader, MessageId};
pub use server::Server;
pub use service::Service;
pub use session::{Owner, Session, SessionId, SessionState};
