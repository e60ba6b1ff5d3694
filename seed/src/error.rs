//! Error types for the seed runtime.

use thiserror::Error;

/// Errors that can occur while running a seed node.
#[derive(Error, Debug)]
pub enum SeedError {
    /// Wire-layer failure (bind, framing, link).
    #[error("wire error: {0}")]
    Wire(#[from] gossipnet_wire::WireError),

    /// This seed's identity does not resolve to a bindable address.
    #[error("cannot bind {0}: {1}")]
    Bind(String, String),
}

/// Convenience result type for seed operations.
pub type Result<T> = std::result::Result<T, SeedError>;
