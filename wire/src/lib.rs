//! Wire protocol and connection plumbing for the gossipnet overlay.
//!
//! Every link in the network — seed↔seed, peer↔seed, peer↔peer — speaks
//! the same framed protocol:
//!
//! ```text
//! [4 bytes: payload length (u32-be)] [N bytes: UTF-8 JSON object]
//! ```
//!
//! The JSON object always carries a `"type"` field naming one of the
//! [`WireMessage`] variants. Unknown types are tolerated (logged and
//! skipped) so that mixed-version clusters keep talking; malformed frames
//! count toward a per-link violation budget after which the link is
//! dropped.
//!
//! ## Crate modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`identity`] | `NodeId` — the `(host, port)` key used everywhere |
//! | [`message`]  | Tagged wire enum, JSON ser/de, framing helpers |
//! | [`framing`]  | Async length-prefixed frame reader/writer |
//! | [`link`]     | Per-connection reader/writer tasks, bounded send queue |
//! | [`dial`]     | Outbound connect with retry, reuse-addr listener bind |
//! | [`config`]   | `config.csv` seed directory loader |
//! | [`logger`]   | Per-node tee logger (stdout + `outputfile_*.txt`) |
//! | [`error`]    | Crate-wide error enum |

pub mod config;
pub mod dial;
pub mod error;
pub mod framing;
pub mod identity;
pub mod link;
pub mod logger;
pub mod message;

pub use {
    error::{Result, WireError},
    identity::NodeId,
    link::{Inbound, Link, LinkConfig, LinkEvent, LinkHandle, LinkId},
    message::WireMessage,
};
