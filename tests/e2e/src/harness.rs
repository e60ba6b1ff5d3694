//! Shared cluster harness for the end-to-end tests.
//!
//! Spins up seeds and peers as in-process tasks on loopback, reserves
//! real ports up front (so `config.csv`-style rosters can be built
//! before anything listens), and provides a raw framed-TCP client for
//! observing and poking the cluster from outside.

use {
    gossipnet_peer::{PeerConfig, PeerNode, Result as PeerResult},
    gossipnet_seed::{SeedConfig, SeedNode},
    gossipnet_wire::{framing, NodeId, WireMessage},
    std::time::Duration,
    tokio::{
        net::TcpStream,
        sync::watch,
        task::JoinHandle,
        time::{sleep, timeout, Instant},
    },
};

pub const FRAME_MAX: usize = 65_536;

/// Reserve `n` distinct loopback ports by binding and dropping
/// listeners. The window between drop and re-bind is small, and the
/// nodes bind with `SO_REUSEADDR`.
pub fn reserve_ports(n: usize) -> Vec<u16> {
    let listeners: Vec<std::net::TcpListener> = (0..n)
        .map(|_| std::net::TcpListener::bind("127.0.0.1:0").expect("reserve port"))
        .collect();
    listeners
        .iter()
        .map(|l| l.local_addr().expect("local addr").port())
        .collect()
}

pub fn node(port: u16) -> NodeId {
    NodeId::new("127.0.0.1", port)
}

/// A running in-process cluster of seeds, plus any peers spawned later.
pub struct Cluster {
    pub seeds: Vec<NodeId>,
    shutdown_tx: watch::Sender<bool>,
    pub shutdown_rx: watch::Receiver<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Cluster {
    /// Start `n` seeds sharing one roster and wait for the mesh to form.
    pub async fn start_seeds(n: usize) -> Self {
        Self::start_seeds_partial(n, n).await
    }

    /// Configure a roster of `configured` seeds but only start the first
    /// `started` of them (partition scenarios).
    pub async fn start_seeds_partial(configured: usize, started: usize) -> Self {
        let ports = reserve_ports(configured);
        let seeds: Vec<NodeId> = ports.iter().map(|p| node(*p)).collect();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut tasks = Vec::new();
        for seed in seeds.iter().take(started) {
            let node = SeedNode::new(seed.clone(), seeds.clone(), SeedConfig::dev_default());
            let rx = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = node.run(rx).await {
                    panic!("seed exited with error: {e}");
                }
            }));
        }
        // Let listeners bind and the mesh links form.
        sleep(Duration::from_millis(700)).await;

        Self {
            seeds,
            shutdown_tx,
            shutdown_rx,
            tasks,
        }
    }

    /// Spawn a peer tied to the cluster-wide shutdown flag.
    pub fn spawn_peer(&mut self, identity: NodeId) -> JoinHandle<PeerResult<()>> {
        let node = PeerNode::new(identity, self.seeds.clone(), PeerConfig::dev_default());
        let rx = self.shutdown_rx.clone();
        tokio::spawn(node.run(rx))
    }

    /// Spawn a peer with its own kill switch (for crash scenarios).
    pub fn spawn_peer_killable(
        &mut self,
        identity: NodeId,
    ) -> (watch::Sender<bool>, JoinHandle<PeerResult<()>>) {
        let node = PeerNode::new(identity, self.seeds.clone(), PeerConfig::dev_default());
        let (kill_tx, kill_rx) = watch::channel(false);
        (kill_tx, tokio::spawn(node.run(kill_rx)))
    }

    /// Ask one seed for its committed PL over a fresh raw connection.
    pub async fn query_pl(&self, seed: &NodeId) -> Option<Vec<NodeId>> {
        let mut client = Client::connect(seed).await.ok()?;
        client.send(&WireMessage::PlRequest).await.ok()?;
        match client.recv(Duration::from_secs(2)).await {
            Ok(WireMessage::PlResponse { peers }) => Some(peers),
            _ => None,
        }
    }

    /// Poll every *started* seed until each returns exactly `expected`
    /// (order-insensitive) or the deadline passes.
    pub async fn wait_for_pl(&self, started: usize, expected: &[NodeId], deadline: Duration) {
        let mut want: Vec<NodeId> = expected.to_vec();
        want.sort();
        let until = Instant::now() + deadline;
        loop {
            let mut all_match = true;
            for seed in self.seeds.iter().take(started) {
                let mut got = self.query_pl(seed).await.unwrap_or_default();
                got.sort();
                if got != want {
                    all_match = false;
                    break;
                }
            }
            if all_match {
                return;
            }
            assert!(
                Instant::now() < until,
                "seeds did not converge on {want:?} in time"
            );
            sleep(Duration::from_millis(100)).await;
        }
    }

    /// Flip the cluster-wide shutdown flag and give tasks a moment to
    /// drain.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            let _ = timeout(Duration::from_secs(2), task).await;
        }
    }
}

/// Raw framed-JSON client used by the tests to impersonate a node.
pub struct Client {
    stream: TcpStream,
}

impl Client {
    pub async fn connect(target: &NodeId) -> std::io::Result<Self> {
        let stream = TcpStream::connect((target.host.as_str(), target.port)).await?;
        Ok(Self { stream })
    }

    pub async fn send(&mut self, msg: &WireMessage) -> gossipnet_wire::Result<()> {
        let frame = msg.to_frame(FRAME_MAX)?;
        framing::write_all(&mut self.stream, &frame).await
    }

    /// Receive the next frame within `wait`.
    pub async fn recv(&mut self, wait: Duration) -> Result<WireMessage, String> {
        let frame = timeout(wait, framing::read_frame(&mut self.stream, FRAME_MAX))
            .await
            .map_err(|_| "timed out".to_owned())?
            .map_err(|e| e.to_string())?;
        match frame {
            Some(body) => WireMessage::from_json(&body).map_err(|e| e.to_string()),
            None => Err("connection closed".to_owned()),
        }
    }

    /// Assert that nothing arrives within `quiet`.
    pub async fn expect_silence(&mut self, quiet: Duration) {
        if let Ok(msg) = self.recv(quiet).await {
            panic!("expected silence, received {}", msg.kind());
        }
    }
}
