//! Peer node runtime for the gossipnet overlay.
//!
//! A peer registers with the seeds, builds a preferential-attachment
//! neighborhood from their union peer list, gossips application messages
//! with digest-based deduplication, and cooperates with its neighbors to
//! detect and report failed peers through the two-tier suspicion
//! pipeline (neighbor quorum first, seed consensus second).

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod gossip;
pub mod node;
pub mod overlay;
pub mod probe;

pub use {
    config::PeerConfig,
    error::{PeerError, Result},
    node::PeerNode,
};
