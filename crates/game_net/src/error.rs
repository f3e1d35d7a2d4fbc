//! Error types for the networking layer.
//!
//! Transport failures inside a running session never surface here: they are
//! handled by the completion that observed them and turned into a close.
//! `NetError` is what callers of the public API see when a request cannot be
//! carried out at all.

use crate::session::SessionId;
use std::net::SocketAddr;

/// Errors returned by the networking layer.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Underlying socket or runtime I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The client could not resolve its configured host/service pair.
    #[error("failed to resolve {target}: {source}")]
    Resolve {
        /// The `host:service` string that was looked up.
        target: String,
        /// The resolver error.
        source: std::io::Error,
    },

    /// None of the resolved endpoints accepted a connection.
    #[error("failed to connect to {target}")]
    Connect {
        /// The `host:service` string that was tried.
        target: String,
    },

    /// The server could not bind or listen on its address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address the listener was configured for.
        addr: SocketAddr,
        /// The socket error.
        source: std::io::Error,
    },

    /// An outbound frame is larger than the configured maximum.
    #[error("frame size {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Total frame size in bytes.
        size: usize,
        /// Configured maximum frame size.
        max: usize,
    },

    /// An inbound header carried a size that cannot describe a frame.
    #[error("invalid frame size {size}")]
    InvalidFrame {
        /// The size field read from the wire.
        size: u32,
    },

    /// A pop asked for more bytes than the payload holds.
    #[error("payload underflow: requested {requested} bytes, {available} available")]
    PayloadUnderflow {
        /// Bytes the caller tried to pop.
        requested: usize,
        /// Bytes left in the payload.
        available: usize,
    },

    /// The session is closing or closed and accepts no more work.
    #[error("session {0} is closed")]
    SessionClosed(SessionId),

    /// The application (or the connection limit) refused the session.
    #[error("session rejected")]
    Rejected,

    /// The worker pool could not be built or is unusable.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// The service has been stopped.
    #[error("service stopped")]
    Stopped,
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, NetError>;
