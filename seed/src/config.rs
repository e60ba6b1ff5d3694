//! Configuration for the seed runtime.

use {
    gossipnet_membership::MembershipConfig,
    gossipnet_wire::LinkConfig,
    std::time::Duration,
};

/// Tunables for a seed node.
#[derive(Debug, Clone)]
pub struct SeedConfig {
    /// Consensus deadlines (proposal timeout, dead-report window).
    pub membership: MembershipConfig,
    /// Per-link framing and queueing limits.
    pub link: LinkConfig,
    /// Cadence of the pending-proposal reaper.
    pub reaper_interval: Duration,
    /// Dial attempts per mesh (re)connect round.
    pub dial_attempts: u32,
    /// Backoff between dial attempts.
    pub dial_backoff: Duration,
    /// Pause between mesh maintenance rounds.
    pub mesh_interval: Duration,
    /// Router inbound channel depth.
    pub inbound_buffer: usize,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            membership: MembershipConfig::default(),
            link: LinkConfig::default(),
            reaper_interval: Duration::from_millis(250),
            dial_attempts: 5,
            dial_backoff: Duration::from_secs(1),
            mesh_interval: Duration::from_secs(3),
            inbound_buffer: 1_024,
        }
    }
}

impl SeedConfig {
    /// Short timeouts for hermetic tests on loopback.
    pub fn dev_default() -> Self {
        Self {
            membership: MembershipConfig::dev_default(),
            link: LinkConfig::default(),
            reaper_interval: Duration::from_millis(50),
            dial_attempts: 3,
            dial_backoff: Duration::from_millis(100),
            mesh_interval: Duration::from_millis(200),
            inbound_buffer: 256,
        }
    }
}
