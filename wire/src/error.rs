//! Error types for the wire layer.

use thiserror::Error;

/// Errors that can occur on a gossipnet link.
#[derive(Error, Debug)]
pub enum WireError {
    /// Transport-level I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The frame body was not valid JSON (or not a JSON object).
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The frame decoded to an object whose `type` we do not know.
    /// Recoverable — the caller logs and skips the frame.
    #[error("unknown message type: {0:?}")]
    UnknownType(String),

    /// Frame exceeds the maximum allowed size.
    #[error("frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The peer closed the connection mid-frame.
    #[error("connection closed mid-frame")]
    TruncatedFrame,

    /// The per-link outbound queue is over its byte budget.
    #[error("send queue full ({queued} bytes queued, budget {budget})")]
    SendQueueFull {
        /// Bytes currently queued.
        queued: usize,
        /// Configured budget.
        budget: usize,
    },

    /// The link's writer task is gone; the connection is dead.
    #[error("link closed")]
    LinkClosed,

    /// Outbound connect failed after all retries.
    #[error("connect to {addr} failed after {attempts} attempts: {last}")]
    ConnectFailed {
        /// Target address.
        addr: String,
        /// How many dials were made.
        attempts: u32,
        /// The last I/O error observed.
        last: String,
    },

    /// The seed configuration file is missing or unreadable.
    #[error("config error: {0}")]
    Config(String),
}

/// Convenience result type for wire operations.
pub type Result<T> = std::result::Result<T, WireError>;
