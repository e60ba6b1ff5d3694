//! The seed runtime: listener, seed mesh, router, reaper.
//!
//! All consensus decisions live in [`MembershipEngine`]; this module only
//! moves frames. The router task serializes every engine interaction
//! (inbound frames and reaper ticks) and fans engine outputs back out.
//! Lock order is engine before links, and neither is held across an
//! await point.

use {
    crate::{config::SeedConfig, error::Result},
    gossipnet_membership::{EngineOutput, MembershipEngine, Outbound, SeedRoster},
    gossipnet_wire::{
        dial, Inbound, Link, LinkEvent, LinkHandle, LinkId, NodeId, WireMessage,
    },
    log::{debug, info, warn},
    parking_lot::Mutex,
    std::{
        collections::{HashMap, HashSet},
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
        time::Instant,
    },
    tokio::sync::{mpsc, watch},
};

/// Live connections, keyed three ways: by link id (every connection), by
/// seed identity (mesh links), and by peer identity (connections a
/// `REGISTER_REQUEST` arrived on, used for ACKs and `DEAD_CONFIRMED`
/// fan-out).
#[derive(Default)]
struct Links {
    conns: HashMap<LinkId, LinkHandle>,
    seed_links: HashMap<NodeId, LinkHandle>,
    link_seed: HashMap<LinkId, NodeId>,
    peer_links: HashMap<NodeId, LinkId>,
    link_peer: HashMap<LinkId, NodeId>,
    /// Mesh targets with a dial in flight (prevents duplicate dials).
    dialing: HashSet<NodeId>,
}

struct Shared {
    identity: NodeId,
    config: SeedConfig,
    engine: Mutex<MembershipEngine>,
    links: Mutex<Links>,
    next_link: AtomicU64,
    inbound_tx: mpsc::Sender<Inbound>,
}

impl Shared {
    fn next_link_id(&self) -> LinkId {
        self.next_link.fetch_add(1, Ordering::Relaxed)
    }
}

/// A seed node, ready to run.
pub struct SeedNode {
    identity: NodeId,
    roster: SeedRoster,
    config: SeedConfig,
}

impl SeedNode {
    /// Build a seed for `identity` over the configured seed list.
    pub fn new(identity: NodeId, seeds: Vec<NodeId>, config: SeedConfig) -> Self {
        let roster = SeedRoster::new(seeds);
        if !roster.contains(&identity) {
            warn!("seed {identity} is not in the configured seed list");
        }
        Self {
            identity,
            roster,
            config,
        }
    }

    /// Bind, join the mesh, and serve until `shutdown` flips.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let listener = dial::bind_reuse(&self.identity.host, self.identity.port).await?;
        info!(
            "seed listening on {} (roster {} seeds, quorum {})",
            self.identity,
            self.roster.len(),
            self.roster.quorum()
        );

        let (inbound_tx, mut inbound_rx) = mpsc::channel(self.config.inbound_buffer);
        let shared = Arc::new(Shared {
            engine: Mutex::new(MembershipEngine::new(
                self.identity.clone(),
                self.roster.clone(),
                self.config.membership.clone(),
            )),
            links: Mutex::new(Links::default()),
            next_link: AtomicU64::new(1),
            inbound_tx,
            identity: self.identity.clone(),
            config: self.config.clone(),
        });

        tokio::spawn(accept_loop(
            listener,
            Arc::clone(&shared),
            shutdown.clone(),
        ));
        tokio::spawn(mesh_loop(
            Arc::clone(&shared),
            self.roster.clone(),
            shutdown.clone(),
        ));

        let mut reaper = tokio::time::interval(self.config.reaper_interval);
        let mut shutdown_rx = shutdown;
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = reaper.tick() => {
                    let output = shared.engine.lock().expire(Instant::now());
                    dispatch(&shared, output);
                }
                inbound = inbound_rx.recv() => match inbound {
                    Some(inbound) => handle_inbound(&shared, inbound),
                    None => break,
                },
            }
        }

        info!("SHUTDOWN");
        let links = shared.links.lock();
        for handle in links.conns.values() {
            handle.close();
        }
        Ok(())
    }
}

async fn accept_loop(
    listener: tokio::net::TcpListener,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let id = shared.next_link_id();
                    debug!("accepted connection from {addr} (link {id})");
                    let handle = Link::spawn(
                        stream,
                        id,
                        shared.inbound_tx.clone(),
                        shared.config.link.clone(),
                        shutdown.clone(),
                    );
                    shared.links.lock().conns.insert(id, handle);
                }
                Err(e) => {
                    warn!("accept error: {e}");
                }
            },
        }
    }
}

/// Periodically (re)establishes the mesh links this seed is responsible
/// for: each seed pair holds one TCP link, dialed by the lower identity.
async fn mesh_loop(shared: Arc<Shared>, roster: SeedRoster, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(shared.config.mesh_interval);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                for target in roster.dial_targets(&shared.identity) {
                    let needs_dial = {
                        let mut links = shared.links.lock();
                        if links.seed_links.contains_key(&target)
                            || links.dialing.contains(&target)
                        {
                            false
                        } else {
                            links.dialing.insert(target.clone());
                            true
                        }
                    };
                    if needs_dial {
                        tokio::spawn(dial_seed(
                            Arc::clone(&shared),
                            target,
                            shutdown.clone(),
                        ));
                    }
                }
            }
        }
    }
}

async fn dial_seed(shared: Arc<Shared>, target: NodeId, shutdown: watch::Receiver<bool>) {
    let result = async {
        let addr = dial::resolve(&target.host, target.port).await?;
        dial::connect_with_retry(
            addr,
            shared.config.dial_attempts,
            shared.config.dial_backoff,
        )
        .await
    }
    .await;

    match result {
        Ok(stream) => {
            let id = shared.next_link_id();
            let handle = Link::spawn(
                stream,
                id,
                shared.inbound_tx.clone(),
                shared.config.link.clone(),
                shutdown,
            );
            let hello = WireMessage::SeedHello {
                seed: shared.identity.clone(),
            };
            if let Err(e) = handle.send(&hello) {
                warn!("mesh hello to {target} failed: {e}");
                handle.close();
                shared.links.lock().dialing.remove(&target);
                return;
            }
            info!("mesh link to seed {target} established");
            let mut links = shared.links.lock();
            links.conns.insert(id, handle.clone());
            if let Some(old) = links.seed_links.insert(target.clone(), handle) {
                old.close();
            }
            links.link_seed.insert(id, target.clone());
            links.dialing.remove(&target);
        }
        Err(e) => {
            debug!("mesh dial to {target} failed: {e}");
            shared.links.lock().dialing.remove(&target);
        }
    }
}

fn handle_inbound(shared: &Arc<Shared>, inbound: Inbound) {
    let Inbound { link, addr, event } = inbound;
    match event {
        LinkEvent::Closed => {
            let mut links = shared.links.lock();
            links.conns.remove(&link);
            if let Some(seed) = links.link_seed.remove(&link) {
                let stale = links
                    .seed_links
                    .get(&seed)
                    .is_some_and(|h| h.id() == link);
                if stale {
                    links.seed_links.remove(&seed);
                    warn!("mesh link to seed {seed} lost");
                }
            }
            if let Some(peer) = links.link_peer.remove(&link) {
                let stale = links.peer_links.get(&peer) == Some(&link);
                if stale {
                    links.peer_links.remove(&peer);
                    debug!("peer connection from {peer} closed");
                }
            }
        }
        LinkEvent::Violation => {
            debug!("protocol violation on link {link} ({addr})");
        }
        LinkEvent::Message(msg) => handle_message(shared, link, msg),
    }
}

fn handle_message(shared: &Arc<Shared>, link: LinkId, msg: WireMessage) {
    let now = Instant::now();
    let output = match msg {
        WireMessage::SeedHello { seed } => {
            register_seed_link(shared, link, seed);
            return;
        }
        WireMessage::RegisterRequest { peer } => {
            map_peer_link(shared, link, peer.clone());
            shared.engine.lock().on_register_request(peer, now)
        }
        WireMessage::RegisterProposal { peer, proposer } => shared
            .engine
            .lock()
            .on_register_proposal(peer, proposer, now),
        WireMessage::RegisterVote { peer, vote, voter } => {
            shared.engine.lock().on_register_vote(peer, vote, voter)
        }
        WireMessage::RegisterCommit { peer } => shared.engine.lock().on_register_commit(peer),
        WireMessage::PlRequest => {
            let peers = shared.engine.lock().peers();
            info!("PL_REQUEST on link {link} ({} peers)", peers.len());
            let links = shared.links.lock();
            if let Some(handle) = links.conns.get(&link) {
                if let Err(e) = handle.send(&WireMessage::PlResponse { peers }) {
                    debug!("PL_RESPONSE on link {link} failed: {e}");
                }
            }
            return;
        }
        WireMessage::DeadReport { victim, reporter } => {
            shared.engine.lock().on_dead_report(victim, reporter, now)
        }
        WireMessage::DeadProposal { victim, proposer } => {
            shared.engine.lock().on_dead_proposal(victim, proposer, now)
        }
        WireMessage::DeadVote { victim, vote, voter } => {
            shared.engine.lock().on_dead_vote(victim, vote, voter)
        }
        WireMessage::DeadConfirmed { victim } => shared.engine.lock().on_dead_confirmed(victim),
        other => {
            debug!("ignoring {} frame at seed", other.kind());
            return;
        }
    };
    dispatch(shared, output);
}

fn register_seed_link(shared: &Arc<Shared>, link: LinkId, seed: NodeId) {
    let mut links = shared.links.lock();
    let Some(handle) = links.conns.get(&link).cloned() else {
        return;
    };
    info!("seed {seed} connected (inbound mesh link)");
    if let Some(old) = links.seed_links.insert(seed.clone(), handle) {
        if old.id() != link {
            old.close();
        }
    }
    links.link_seed.insert(link, seed);
}

fn map_peer_link(shared: &Arc<Shared>, link: LinkId, peer: NodeId) {
    let mut links = shared.links.lock();
    if !links.conns.contains_key(&link) {
        return;
    }
    links.peer_links.insert(peer.clone(), link);
    links.link_peer.insert(link, peer);
}

fn dispatch(shared: &Arc<Shared>, output: EngineOutput) {
    if output.outbound.is_empty() {
        return;
    }
    let links = shared.links.lock();
    for out in output.outbound {
        match out {
            Outbound::Seeds(msg) => {
                for (seed, handle) in &links.seed_links {
                    if let Err(e) = handle.send(&msg) {
                        debug!("broadcast {} to {seed} failed: {e}", msg.kind());
                    }
                }
            }
            Outbound::Seed(seed, msg) => match links.seed_links.get(&seed) {
                Some(handle) => {
                    if let Err(e) = handle.send(&msg) {
                        debug!("{} to {seed} failed: {e}", msg.kind());
                    }
                }
                None => debug!("no mesh link to {seed} for {}", msg.kind()),
            },
            Outbound::Candidate(peer, msg) => {
                let handle = links
                    .peer_links
                    .get(&peer)
                    .and_then(|id| links.conns.get(id));
                match handle {
                    Some(handle) => {
                        if let Err(e) = handle.send(&msg) {
                            debug!("{} to candidate {peer} failed: {e}", msg.kind());
                        }
                    }
                    None => debug!("candidate {peer} has no live connection"),
                }
            }
            Outbound::Peers(msg) => {
                for (peer, id) in &links.peer_links {
                    if let Some(handle) = links.conns.get(id) {
                        if let Err(e) = handle.send(&msg) {
                            debug!("fan-out {} to {peer} failed: {e}", msg.kind());
                        }
                    }
                }
            }
        }
    }
}
