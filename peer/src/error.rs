//! Error types for the peer runtime.

use {gossipnet_wire::NodeId, thiserror::Error};

/// Errors that can occur while running a peer node.
#[derive(Error, Debug)]
pub enum PeerError {
    /// Wire-layer failure (bind, framing, link).
    #[error("wire error: {0}")]
    Wire(#[from] gossipnet_wire::WireError),

    /// A seed answered the registration with `REGISTER_NACK`.
    #[error("registration rejected by seed {0}")]
    Rejected(NodeId),

    /// No configured seed accepted a TCP connection.
    #[error("no seeds reachable at startup")]
    NoSeedsReachable,

    /// Seeds were reachable but none acknowledged the registration in
    /// time.
    #[error("no seed acknowledged registration")]
    RegistrationTimeout,
}

/// Convenience result type for peer operations.
pub type Result<T> = std::result::Result<T, PeerError>;
