//! Message types and JSON serialization for every gossipnet link.
//!
//! [`WireMessage`] is the closed tagged variant all links speak: the JSON
//! object's `type` field discriminates, and the remaining fields are the
//! variant payload. Dispatch on the receiving side is a single `match`;
//! frames whose `type` is not recognised decode to
//! [`WireError::UnknownType`] so callers can log and skip them without
//! dropping the link.

use {
    crate::{
        error::{Result, WireError},
        identity::NodeId,
    },
    serde::{Deserialize, Serialize},
};

/// Top-level wire message.
///
/// Every frame on every link carries exactly one of these variants,
/// length-prefixed and JSON-encoded with a SCREAMING_SNAKE_CASE `type`
/// tag (`RegisterRequest` ⇒ `"REGISTER_REQUEST"`, and so on).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WireMessage {
    /// Candidate peer asks a seed to join the network.
    RegisterRequest {
        /// The candidate's identity.
        peer: NodeId,
    },

    /// Seed→seed: the proposer asks for votes on admitting `peer`.
    RegisterProposal {
        /// The candidate under vote.
        peer: NodeId,
        /// The seed that received the `REGISTER_REQUEST`.
        proposer: NodeId,
    },

    /// Seed→seed: a vote on a registration proposal.
    RegisterVote {
        /// The candidate under vote.
        peer: NodeId,
        /// Yes or no.
        vote: bool,
        /// The voting seed.
        voter: NodeId,
    },

    /// Seed→seed: the proposer reached quorum; apply the admission.
    /// Idempotent — replaying it is a no-op.
    RegisterCommit {
        /// The admitted peer.
        peer: NodeId,
    },

    /// Seed→candidate: registration succeeded. Carries the committed
    /// peer list so the candidate can bootstrap its overlay.
    RegisterAck {
        /// Snapshot of the seed's committed PL.
        peers: Vec<NodeId>,
    },

    /// Seed→candidate: registration failed (no quorum before deadline).
    RegisterNack,

    /// Peer→seed: ask for the committed peer list.
    PlRequest,

    /// Seed→peer: the committed peer list.
    PlResponse {
        /// Snapshot of the seed's committed PL.
        peers: Vec<NodeId>,
    },

    /// Peer→seed: the reporter's neighborhood agreed `victim` is dead.
    DeadReport {
        /// The peer believed dead.
        victim: NodeId,
        /// The reporting peer.
        reporter: NodeId,
    },

    /// Seed→seed: the proposer asks for votes on evicting `victim`.
    DeadProposal {
        /// The peer under eviction vote.
        victim: NodeId,
        /// The seed that accumulated enough dead reports.
        proposer: NodeId,
    },

    /// Seed→seed: a vote on a death proposal.
    DeadVote {
        /// The peer under eviction vote.
        victim: NodeId,
        /// Yes or no.
        vote: bool,
        /// The voting seed.
        voter: NodeId,
    },

    /// Seed→{seeds, peers}: eviction committed. Idempotent.
    DeadConfirmed {
        /// The evicted peer.
        victim: NodeId,
    },

    /// Seed→seed mesh link identification, sent once by the dialing side.
    SeedHello {
        /// The dialing seed's identity.
        seed: NodeId,
    },

    /// Peer→peer neighbor handshake, sent once by the dialing side.
    Hello {
        /// The dialing peer's identity.
        peer: NodeId,
    },

    /// Application gossip. `payload` is the literal string
    /// `"<float ts>:<origin host>:<int seq>"`, not nested JSON.
    Gossip {
        /// The opaque gossip payload.
        payload: String,
    },

    /// Liveness probe on an established neighbor link.
    Ping {
        /// The pinging peer.
        from: NodeId,
    },

    /// Reply to a [`WireMessage::Ping`].
    Pong {
        /// The replying peer.
        from: NodeId,
    },

    /// Peer→peer: asks the receiver to independently probe `suspect`.
    SuspectRequest {
        /// The neighbor under suspicion.
        suspect: NodeId,
        /// The suspecting peer.
        requester: NodeId,
    },

    /// Reply to a [`WireMessage::SuspectRequest`] with the probe verdict.
    SuspectResponse {
        /// The neighbor that was probed.
        suspect: NodeId,
        /// Whether the responder found it alive.
        alive: bool,
        /// The probing peer.
        responder: NodeId,
    },
}

/// Tags this implementation understands, used to tell a frame with an
/// unknown `type` (skip, keep link) from one that is structurally broken
/// (counts toward the violation budget).
const KNOWN_TYPES: &[&str] = &[
    "REGISTER_REQUEST",
    "REGISTER_PROPOSAL",
    "REGISTER_VOTE",
    "REGISTER_COMMIT",
    "REGISTER_ACK",
    "REGISTER_NACK",
    "PL_REQUEST",
    "PL_RESPONSE",
    "DEAD_REPORT",
    "DEAD_PROPOSAL",
    "DEAD_VOTE",
    "DEAD_CONFIRMED",
    "SEED_HELLO",
    "HELLO",
    "GOSSIP",
    "PING",
    "PONG",
    "SUSPECT_REQUEST",
    "SUSPECT_RESPONSE",
];

impl WireMessage {
    /// Serialize to a JSON body (no length prefix).
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| WireError::Malformed(e.to_string()))
    }

    /// Serialize with the 4-byte big-endian length prefix, enforcing the
    /// frame-size limit.
    pub fn to_frame(&self, max_len: usize) -> Result<Vec<u8>> {
        let body = self.to_json()?;
        if body.len() > max_len {
            return Err(WireError::FrameTooLarge {
                size: body.len(),
                max: max_len,
            });
        }
        let mut frame = Vec::with_capacity(4 + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decode a frame body.
    ///
    /// Distinguishes three outcomes: a known message, an object whose
    /// `type` is unknown ([`WireError::UnknownType`], recoverable), and
    /// anything else ([`WireError::Malformed`], a protocol violation).
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| WireError::Malformed(e.to_string()))?;
        let tag = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned);
        match serde_json::from_value(value) {
            Ok(msg) => Ok(msg),
            Err(e) => match tag {
                Some(tag) if !KNOWN_TYPES.contains(&tag.as_str()) => {
                    Err(WireError::UnknownType(tag))
                }
                _ => Err(WireError::Malformed(e.to_string())),
            },
        }
    }

    /// Human-readable tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RegisterRequest { .. } => "REGISTER_REQUEST",
            Self::RegisterProposal { .. } => "REGISTER_PROPOSAL",
            Self::RegisterVote { .. } => "REGISTER_VOTE",
            Self::RegisterCommit { .. } => "REGISTER_COMMIT",
            Self::RegisterAck { .. } => "REGISTER_ACK",
            Self::RegisterNack => "REGISTER_NACK",
            Self::PlRequest => "PL_REQUEST",
            Self::PlResponse { .. } => "PL_RESPONSE",
            Self::DeadReport { .. } => "DEAD_REPORT",
            Self::DeadProposal { .. } => "DEAD_PROPOSAL",
            Self::DeadVote { .. } => "DEAD_VOTE",
            Self::DeadConfirmed { .. } => "DEAD_CONFIRMED",
            Self::SeedHello { .. } => "SEED_HELLO",
            Self::Hello { .. } => "HELLO",
            Self::Gossip { .. } => "GOSSIP",
            Self::Ping { .. } => "PING",
            Self::Pong { .. } => "PONG",
            Self::SuspectRequest { .. } => "SUSPECT_REQUEST",
            Self::SuspectResponse { .. } => "SUSPECT_RESPONSE",
        }
    }
}
