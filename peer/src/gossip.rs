//! The gossip engine's state: origination counter and the Message List.
//!
//! The ML is the set of SHA-256 digests of every distinct payload this
//! peer has ever seen; it is what makes forwarding idempotent. Bounded
//! only by process lifetime.

use {
    sha2::{Digest, Sha256},
    std::{
        collections::HashSet,
        time::{SystemTime, UNIX_EPOCH},
    },
};

/// Hex SHA-256 of a gossip payload.
pub fn digest(payload: &str) -> String {
    let hash = Sha256::digest(payload.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in hash {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Message List plus the origination counter.
#[derive(Debug)]
pub struct GossipState {
    ml: HashSet<String>,
    counter: u32,
    max: u32,
}

impl GossipState {
    /// Empty state with the origination cap.
    pub fn new(max: u32) -> Self {
        Self {
            ml: HashSet::new(),
            counter: 0,
            max,
        }
    }

    /// Record a payload. Returns true when it was unseen (log it,
    /// forward it) and false when it is a duplicate (drop silently).
    pub fn observe(&mut self, payload: &str) -> bool {
        self.ml.insert(digest(payload))
    }

    /// Number of distinct payloads seen.
    pub fn seen(&self) -> usize {
        self.ml.len()
    }

    /// Messages originated so far.
    pub fn originated(&self) -> u32 {
        self.counter
    }

    /// Build the next origination payload `"<ts>:<host>:<seq>"` (seq is
    /// the pre-increment counter), pin its digest, and bump the counter.
    /// Returns `None` once the cap is reached.
    pub fn next_payload(&mut self, host: &str) -> Option<String> {
        if self.counter >= self.max {
            return None;
        }
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let payload = format!("{ts:.6}:{host}:{}", self.counter);
        self.counter += 1;
        self.ml.insert(digest(&payload));
        Some(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_dedupes() {
        let mut state = GossipState::new(10);
        assert!(state.observe("1700000000.000001:127.0.0.1:0"));
        assert!(!state.observe("1700000000.000001:127.0.0.1:0"));
        assert!(state.observe("1700000000.000001:127.0.0.1:1"));
        assert_eq!(state.seen(), 2);
    }

    #[test]
    fn test_origination_cap() {
        let mut state = GossipState::new(3);
        for expected_seq in 0..3 {
            let payload = state.next_payload("10.1.1.1").unwrap();
            let seq: u32 = payload.rsplit(':').next().unwrap().parse().unwrap();
            assert_eq!(seq, expected_seq);
        }
        assert!(state.next_payload("10.1.1.1").is_none());
        assert_eq!(state.originated(), 3);
    }

    #[test]
    fn test_originated_payload_already_in_ml() {
        let mut state = GossipState::new(1);
        let payload = state.next_payload("10.1.1.1").unwrap();
        // A reflected copy must be treated as a duplicate.
        assert!(!state.observe(&payload));
    }

    #[test]
    fn test_payload_shape() {
        let mut state = GossipState::new(1);
        let payload = state.next_payload("192.168.0.9").unwrap();
        let parts: Vec<&str> = payload.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].parse::<f64>().is_ok());
        assert!(parts[0].contains('.'), "timestamp keeps sub-second digits");
        assert_eq!(parts[1], "192.168.0.9");
        assert_eq!(parts[2], "0");
    }

    #[test]
    fn test_digest_is_hex_sha256() {
        let d = digest("abc");
        assert_eq!(d.len(), 64);
        // Well-known vector.
        assert_eq!(
            d,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
