//! Configuration for the peer runtime.

use {gossipnet_wire::LinkConfig, std::time::Duration};

/// Tunables for a peer node.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Per-link framing and queueing limits.
    pub link: LinkConfig,

    /// Cadence of gossip origination.
    pub gossip_interval: Duration,
    /// Messages this peer will originate over its lifetime.
    pub max_gossip: u32,

    /// Cadence of the liveness sweep.
    pub ping_interval: Duration,
    /// How long a `PONG` may take before the TCP signal counts as failed.
    pub pong_timeout: Duration,
    /// Budget for one ICMP echo.
    pub icmp_timeout: Duration,
    /// Whether to run OS ICMP probes at all. Off in the dev profile so
    /// the suite stays hermetic (loopback ICMP needs a `ping` binary and
    /// often raw-socket privileges).
    pub icmp_enabled: bool,
    /// Consecutive failed liveness cycles before local suspicion.
    pub liveness_window: usize,

    /// How long a suspicion responder gets to answer.
    pub suspect_response_timeout: Duration,
    /// Initiator-side deadline on the whole suspicion round.
    pub suspect_deadline: Duration,
    /// How long to wait for `DEAD_CONFIRMED` before purging locally.
    pub confirm_timeout: Duration,
    /// Cadence of `DEAD_REPORT` retries while unconfirmed.
    pub report_retry_interval: Duration,

    /// Below this many neighbors the peer re-runs attachment.
    pub min_neighbors: usize,
    /// Deadline for collecting `PL_RESPONSE`s during re-attachment.
    pub refresh_timeout: Duration,

    /// Pareto shape for the neighbor-count draw.
    pub pareto_alpha: f64,
    /// Pareto scale (minimum draw) for the neighbor-count draw.
    pub pareto_xmin: f64,

    /// Dial attempts per outbound connect.
    pub dial_attempts: u32,
    /// Backoff between dial attempts.
    pub dial_backoff: Duration,
    /// Per-seed wait for a registration ACK/NACK.
    pub register_timeout: Duration,

    /// Cadence of the deadline reaper.
    pub reaper_interval: Duration,
    /// Router inbound channel depth.
    pub inbound_buffer: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            gossip_interval: Duration::from_secs(5),
            max_gossip: 10,
            ping_interval: Duration::from_secs(13),
            pong_timeout: Duration::from_secs(4),
            icmp_timeout: Duration::from_secs(2),
            icmp_enabled: true,
            liveness_window: 3,
            suspect_response_timeout: Duration::from_secs(3),
            suspect_deadline: Duration::from_secs(4),
            confirm_timeout: Duration::from_secs(10),
            report_retry_interval: Duration::from_secs(5),
            min_neighbors: 1,
            refresh_timeout: Duration::from_secs(2),
            pareto_alpha: 1.5,
            pareto_xmin: 2.0,
            dial_attempts: 5,
            dial_backoff: Duration::from_secs(1),
            register_timeout: Duration::from_secs(10),
            reaper_interval: Duration::from_millis(500),
            inbound_buffer: 1_024,
        }
    }
}

impl PeerConfig {
    /// Millisecond-scale timings and no ICMP, for hermetic tests on
    /// loopback.
    pub fn dev_default() -> Self {
        Self {
            link: LinkConfig::default(),
            gossip_interval: Duration::from_millis(200),
            max_gossip: 10,
            ping_interval: Duration::from_secs(2),
            pong_timeout: Duration::from_millis(500),
            icmp_timeout: Duration::from_millis(200),
            icmp_enabled: false,
            liveness_window: 3,
            suspect_response_timeout: Duration::from_millis(500),
            suspect_deadline: Duration::from_millis(800),
            confirm_timeout: Duration::from_secs(3),
            report_retry_interval: Duration::from_millis(500),
            min_neighbors: 1,
            refresh_timeout: Duration::from_millis(500),
            pareto_alpha: 1.5,
            pareto_xmin: 2.0,
            dial_attempts: 3,
            dial_backoff: Duration::from_millis(100),
            register_timeout: Duration::from_secs(3),
            reaper_interval: Duration::from_millis(50),
            inbound_buffer: 256,
        }
    }
}
