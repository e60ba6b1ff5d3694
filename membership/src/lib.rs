//! Seed membership consensus for the gossipnet overlay.
//!
//! Seeds collectively maintain the authoritative peer list (PL) by
//! majority vote: a registration is proposed by whichever seed a
//! candidate contacts, a death is proposed by whichever seed accumulates
//! enough independent dead reports, and either commits once
//! `⌊n/2⌋ + 1` of the `n` configured seeds have voted yes before the
//! proposal deadline.
//!
//! The engine here is deterministic: given the same sequence of messages
//! and clock readings it always produces the same state transitions and
//! output messages. All I/O and networking is handled externally by the
//! seed runtime; this crate is pure state-machine logic.

pub mod engine;
pub mod roster;
pub mod types;

pub use {
    engine::{MembershipConfig, MembershipEngine},
    roster::SeedRoster,
    types::{EngineOutput, Outbound, PeerList},
};
