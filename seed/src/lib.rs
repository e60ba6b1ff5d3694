//! Seed node runtime for the gossipnet overlay.
//!
//! A seed listens on one TCP port, keeps a full-mesh link to every other
//! configured seed, and drives the [`gossipnet_membership`] engine from a
//! single router task: every decoded frame and every reaper tick feeds
//! the engine, and the engine's outputs are fanned back out onto the
//! mesh, the candidate's connection, or every registered peer.

pub mod config;
pub mod error;
pub mod node;

pub use {
    config::SeedConfig,
    error::{Result, SeedError},
    node::SeedNode,
};
