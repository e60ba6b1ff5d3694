//! The peer runtime: overlay manager, gossip engine, liveness sweep,
//! suspicion pipeline, purge handling.
//!
//! Task layout: one accept loop, one reader/writer pair per link (wire
//! layer), a gossip origination ticker, a liveness sweep ticker, and the
//! router (the `run` loop) which also drives the deadline reaper. Shared
//! state is split into per-concern locks (connections, neighbors, gossip
//! state, suspicion state); locks are never held across an await and
//! sends never block, so lock scopes stay small.

use {
    crate::{
        bootstrap,
        config::PeerConfig,
        error::Result,
        gossip::GossipState,
        overlay, probe,
    },
    gossipnet_wire::{
        dial, Inbound, Link, LinkEvent, LinkHandle, LinkId, NodeId, WireError, WireMessage,
    },
    log::{debug, info, warn},
    parking_lot::Mutex,
    std::{
        collections::{HashMap, HashSet, VecDeque},
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
        time::{Instant, SystemTime, UNIX_EPOCH},
    },
    tokio::{
        net::TcpStream,
        sync::{mpsc, watch},
    },
};

// ── Shared state ────────────────────────────────────────────────────────────

/// What a connection is for, learned at dial time or on the first
/// identifying frame.
#[derive(Debug, Clone)]
enum LinkOwner {
    /// Accepted, not yet identified by a `HELLO`.
    Pending,
    /// A link to a seed (kept for `DEAD_CONFIRMED` and PL refreshes).
    Seed(NodeId),
    /// A neighbor link.
    Neighbor(NodeId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Health {
    Healthy,
    /// Pings halted while the suspicion round runs.
    Suspect,
}

struct Neighbor {
    handle: LinkHandle,
    /// Which side dialed this connection; duplicate links keep the one
    /// initiated by the lower identity.
    initiator: NodeId,
    last_seen: Instant,
    last_pong: Option<Instant>,
    /// Sliding window of recent liveness-cycle outcomes.
    window: VecDeque<bool>,
    health: Health,
}

struct Suspicion {
    deadline: Instant,
    /// How many neighbors were asked; the tally closes early once all
    /// have answered.
    asked: usize,
    /// Responder → alive.
    responses: HashMap<NodeId, bool>,
    /// The suspicion came from a broken pipe (the link is already gone),
    /// so an alive verdict means re-dial rather than resume pings.
    broken: bool,
}

struct Reported {
    since: Instant,
    last_retry: Instant,
    purged_local: bool,
}

#[derive(Default)]
struct SuspicionState {
    table: HashMap<NodeId, Suspicion>,
    /// Victims we have `DEAD_REPORT`ed, awaiting `DEAD_CONFIRMED`.
    reported: HashMap<NodeId, Reported>,
    purged: HashSet<NodeId>,
}

struct PlRefresh {
    expected: usize,
    responses: Vec<Vec<NodeId>>,
    deadline: Instant,
}

struct Shared {
    identity: NodeId,
    config: PeerConfig,
    conns: Mutex<HashMap<LinkId, (LinkHandle, LinkOwner)>>,
    seeds: Mutex<HashMap<NodeId, LinkHandle>>,
    neighbors: Mutex<HashMap<NodeId, Neighbor>>,
    gossip: Mutex<GossipState>,
    suspicion: Mutex<SuspicionState>,
    pl_refresh: Mutex<Option<PlRefresh>>,
    next_link: AtomicU64,
    inbound_tx: mpsc::Sender<Inbound>,
    shutdown: watch::Receiver<bool>,
}

impl Shared {
    fn add_link(&self, stream: TcpStream, owner: LinkOwner) -> (LinkId, LinkHandle) {
        let id = self.next_link.fetch_add(1, Ordering::Relaxed);
        let handle = Link::spawn(
            stream,
            id,
            self.inbound_tx.clone(),
            self.config.link.clone(),
            self.shutdown.clone(),
        );
        self.conns.lock().insert(id, (handle.clone(), owner));
        (id, handle)
    }

    fn neighbor_handles_except(&self, skip: Option<&NodeId>) -> Vec<(NodeId, LinkHandle)> {
        self.neighbors
            .lock()
            .iter()
            .filter(|(id, _)| Some(*id) != skip)
            .map(|(id, n)| (id.clone(), n.handle.clone()))
            .collect()
    }
}

// ── The node ────────────────────────────────────────────────────────────────

/// A peer node, ready to run.
pub struct PeerNode {
    identity: NodeId,
    seeds: Vec<NodeId>,
    config: PeerConfig,
}

impl PeerNode {
    /// Build a peer for `identity` with the configured seed list.
    pub fn new(identity: NodeId, seeds: Vec<NodeId>, config: PeerConfig) -> Self {
        Self {
            identity,
            seeds,
            config,
        }
    }

    /// Serve until `shutdown` flips. Registration happens first; a
    /// rejection or an unreachable seed set surfaces as an error before
    /// any background task starts.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        // The listener comes up before registration so neighbors that
        // learn about us from the seeds can connect straight away.
        let listener = dial::bind_reuse(&self.identity.host, self.identity.port).await?;
        info!("peer listening on {}", self.identity);

        let boot = bootstrap::run(&self.identity, &self.seeds, &self.config).await?;

        let (inbound_tx, mut inbound_rx) = mpsc::channel(self.config.inbound_buffer);
        let shared = Arc::new(Shared {
            identity: self.identity.clone(),
            config: self.config.clone(),
            conns: Mutex::new(HashMap::new()),
            seeds: Mutex::new(HashMap::new()),
            neighbors: Mutex::new(HashMap::new()),
            gossip: Mutex::new(GossipState::new(self.config.max_gossip)),
            suspicion: Mutex::new(SuspicionState::default()),
            pl_refresh: Mutex::new(None),
            next_link: AtomicU64::new(1),
            inbound_tx,
            shutdown: shutdown.clone(),
        });

        for (seed, stream) in boot.seed_streams {
            let (_, handle) = shared.add_link(stream, LinkOwner::Seed(seed.clone()));
            shared.seeds.lock().insert(seed, handle);
        }

        tokio::spawn(accept_loop(listener, Arc::clone(&shared)));

        // Preferential attachment against the bootstrap union.
        let mut rng = overlay::rng_for(&self.identity);
        let k = overlay::neighbor_count(
            &mut rng,
            self.config.pareto_alpha,
            self.config.pareto_xmin,
            boot.union.len(),
        );
        let chosen = overlay::select_neighbors(&boot.union, k, &mut rng);
        info!(
            "selected {} of {} candidate neighbor(s)",
            chosen.len(),
            boot.union.len()
        );
        for target in chosen {
            tokio::spawn(connect_neighbor(Arc::clone(&shared), target));
        }

        tokio::spawn(gossip_loop(Arc::clone(&shared)));
        tokio::spawn(liveness_loop(Arc::clone(&shared)));

        let mut reaper = tokio::time::interval(self.config.reaper_interval);
        let mut shutdown_rx = shutdown;
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = reaper.tick() => reap(&shared),
                inbound = inbound_rx.recv() => match inbound {
                    Some(inbound) => handle_inbound(&shared, inbound),
                    None => break,
                },
            }
        }

        info!("SHUTDOWN");
        for (handle, _) in shared.conns.lock().values() {
            handle.close();
        }
        Ok(())
    }
}

// ── Connection management ───────────────────────────────────────────────────

async fn accept_loop(listener: tokio::net::TcpListener, shared: Arc<Shared>) {
    let mut shutdown = shared.shutdown.clone();
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!("accepted connection from {addr}");
                    shared.add_link(stream, LinkOwner::Pending);
                }
                Err(e) => warn!("accept error: {e}"),
            },
        }
    }
}

async fn connect_neighbor(shared: Arc<Shared>, target: NodeId) {
    if shared.suspicion.lock().purged.contains(&target) {
        debug!("not dialing purged peer {target}");
        return;
    }
    if shared.neighbors.lock().contains_key(&target) {
        return;
    }

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
            let (_, handle) = shared.add_link(stream, LinkOwner::Neighbor(target.clone()));
            let hello = WireMessage::Hello {
                peer: shared.identity.clone(),
            };
            if handle.send(&hello).is_err() {
                handle.close();
                return;
            }
            info!("connected to neighbor {target}");
            // We initiated this connection.
            let me = shared.identity.clone();
            add_neighbor(&shared, target, handle, me);
        }
        Err(e) => {
            warn!("could not connect to neighbor {target}: {e}");
            start_suspicion(&shared, target, true);
        }
    }
}

/// Install a neighbor link, resolving a duplicate (simultaneous dials in
/// both directions) by keeping the connection initiated by the lower
/// identity. A same-initiator duplicate is a reconnect and replaces the
/// stale link.
fn add_neighbor(shared: &Arc<Shared>, peer: NodeId, handle: LinkHandle, initiator: NodeId) {
    let now = Instant::now();
    let fresh = Neighbor {
        handle,
        initiator,
        last_seen: now,
        last_pong: None,
        window: VecDeque::new(),
        health: Health::Healthy,
    };

    let mut neighbors = shared.neighbors.lock();
    let keep_fresh = match neighbors.get(&peer) {
        None => true,
        Some(existing) => {
            fresh.initiator == existing.initiator || fresh.initiator < existing.initiator
        }
    };
    if keep_fresh {
        if let Some(old) = neighbors.insert(peer, fresh) {
            debug!("replaced duplicate link, closing the old one");
            old.handle.close();
        }
    } else {
        debug!("dropping duplicate link to {peer} (higher initiator)");
        fresh.handle.close();
    }
}

async fn reconnect_seed(shared: Arc<Shared>, seed: NodeId) {
    loop {
        if *shared.shutdown.borrow() {
            return;
        }
        let result = async {
            let addr = dial::resolve(&seed.host, seed.port).await?;
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
                let (_, handle) = shared.add_link(stream, LinkOwner::Seed(seed.clone()));
                // Idempotent re-registration so the seed maps this
                // connection back to our identity.
                let _ = handle.send(&WireMessage::RegisterRequest {
                    peer: shared.identity.clone(),
                });
                shared.seeds.lock().insert(seed.clone(), handle);
                info!("seed link {seed} restored");
                return;
            }
            Err(e) => {
                debug!("seed {seed} still unreachable: {e}");
                tokio::time::sleep(shared.config.dial_backoff * 3).await;
            }
        }
    }
}

// ── Router ──────────────────────────────────────────────────────────────────

fn handle_inbound(shared: &Arc<Shared>, inbound: Inbound) {
    let Inbound { link, addr, event } = inbound;
    match event {
        LinkEvent::Closed => on_closed(shared, link),
        LinkEvent::Violation => debug!("protocol violation on link {link} ({addr})"),
        LinkEvent::Message(msg) => handle_message(shared, link, msg),
    }
}

fn handle_message(shared: &Arc<Shared>, link: LinkId, msg: WireMessage) {
    match msg {
        WireMessage::Hello { peer } => on_hello(shared, link, peer),
        WireMessage::Gossip { payload } => on_gossip(shared, link, payload),
        WireMessage::Ping { from } => {
            if let Some(n) = shared.neighbors.lock().get_mut(&from) {
                n.last_seen = Instant::now();
            }
            let reply = WireMessage::Pong {
                from: shared.identity.clone(),
            };
            if let Some((handle, _)) = shared.conns.lock().get(&link) {
                if let Err(e) = handle.send(&reply) {
                    debug!("PONG on link {link} failed: {e}");
                }
            }
        }
        WireMessage::Pong { from } => {
            let now = Instant::now();
            if let Some(n) = shared.neighbors.lock().get_mut(&from) {
                n.last_pong = Some(now);
                n.last_seen = now;
            }
        }
        WireMessage::SuspectRequest { suspect, requester } => {
            debug!("SUSPECT_REQUEST for {suspect} from {requester}");
            let handle = shared
                .conns
                .lock()
                .get(&link)
                .map(|(handle, _)| handle.clone());
            if let Some(handle) = handle {
                tokio::spawn(respond_to_suspicion(Arc::clone(shared), suspect, handle));
            }
        }
        WireMessage::SuspectResponse {
            suspect,
            alive,
            responder,
        } => on_suspect_response(shared, suspect, alive, responder),
        WireMessage::DeadConfirmed { victim } => purge(shared, victim),
        WireMessage::PlResponse { peers } => on_pl_response(shared, peers),
        WireMessage::RegisterAck { .. } | WireMessage::RegisterNack => {
            // Late answer on a restored seed link; registration is
            // already settled.
            debug!("ignoring late registration answer");
        }
        other => debug!("ignoring {} frame at peer", other.kind()),
    }
}

fn on_closed(shared: &Arc<Shared>, link: LinkId) {
    let owner = shared.conns.lock().remove(&link).map(|(_, owner)| owner);
    match owner {
        Some(LinkOwner::Seed(seed)) => {
            let mut seeds = shared.seeds.lock();
            let stale = seeds.get(&seed).is_some_and(|h| h.id() == link);
            if stale {
                seeds.remove(&seed);
                drop(seeds);
                warn!("seed link {seed} lost, reopening in background");
                tokio::spawn(reconnect_seed(Arc::clone(shared), seed));
            }
        }
        Some(LinkOwner::Neighbor(peer)) => {
            let was_current = {
                let mut neighbors = shared.neighbors.lock();
                match neighbors.get(&peer) {
                    Some(n) if n.handle.id() == link => {
                        neighbors.remove(&peer);
                        true
                    }
                    _ => false,
                }
            };
            if was_current {
                info!("lost connection to neighbor {peer}");
                start_suspicion(shared, peer, true);
            }
        }
        Some(LinkOwner::Pending) | None => {}
    }
}

fn on_hello(shared: &Arc<Shared>, link: LinkId, peer: NodeId) {
    // A purged identity reappearing means the dead peer restarted and
    // re-registered; reconnection is the new liveness epoch.
    {
        let mut susp = shared.suspicion.lock();
        if susp.purged.remove(&peer) {
            info!("purged peer {peer} reconnected after restart");
        }
    }
    let handle = {
        let mut conns = shared.conns.lock();
        match conns.get_mut(&link) {
            Some(entry) => {
                entry.1 = LinkOwner::Neighbor(peer.clone());
                entry.0.clone()
            }
            None => return,
        }
    };
    info!("inbound HELLO from {peer}");
    // The remote side initiated this connection.
    add_neighbor(shared, peer.clone(), handle, peer);
}

fn on_gossip(shared: &Arc<Shared>, link: LinkId, payload: String) {
    let sender = {
        let conns = shared.conns.lock();
        match conns.get(&link).map(|(_, owner)| owner) {
            Some(LinkOwner::Neighbor(peer)) => Some(peer.clone()),
            _ => None,
        }
    };
    if let Some(sender) = &sender {
        if let Some(n) = shared.neighbors.lock().get_mut(sender) {
            n.last_seen = Instant::now();
        }
    }

    if !shared.gossip.lock().observe(&payload) {
        // Duplicate: dropped silently.
        return;
    }
    let from = sender
        .as_ref()
        .map(NodeId::to_string)
        .unwrap_or_else(|| "?".to_owned());
    info!("GOSSIP received (first time): {payload:?} from {from}");

    let msg = WireMessage::Gossip { payload };
    for (id, handle) in shared.neighbor_handles_except(sender.as_ref()) {
        if let Err(e) = handle.send(&msg) {
            debug!("gossip forward to {id} failed: {e}");
            if matches!(e, WireError::SendQueueFull { .. }) {
                start_suspicion(shared, id, false);
            }
        }
    }
}

fn on_pl_response(shared: &Arc<Shared>, peers: Vec<NodeId>) {
    let complete = {
        let mut refresh = shared.pl_refresh.lock();
        let done = match refresh.as_mut() {
            None => false,
            Some(r) => {
                r.responses.push(peers);
                r.responses.len() >= r.expected
            }
        };
        if done {
            refresh.take().map(|r| r.responses)
        } else {
            None
        }
    };
    if let Some(responses) = complete {
        finish_refresh(shared, responses);
    }
}

// ── Gossip origination ──────────────────────────────────────────────────────

async fn gossip_loop(shared: Arc<Shared>) {
    let mut shutdown = shared.shutdown.clone();
    // The first tick waits a full period so the neighborhood settles
    // before origination starts.
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + shared.config.gossip_interval,
        shared.config.gossip_interval,
    );
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
            _ = ticker.tick() => {
                let payload = shared
                    .gossip
                    .lock()
                    .next_payload(&shared.identity.host);
                let Some(payload) = payload else {
                    // Origination cap reached for this process lifetime.
                    return;
                };
                info!("gossip originated: {payload}");
                let msg = WireMessage::Gossip { payload };
                for (id, handle) in shared.neighbor_handles_except(None) {
                    if let Err(e) = handle.send(&msg) {
                        debug!("gossip send to {id} failed: {e}");
                        if matches!(e, WireError::SendQueueFull { .. }) {
                            start_suspicion(&shared, id, false);
                        }
                    }
                }
            }
        }
    }
}

// ── Liveness ────────────────────────────────────────────────────────────────

async fn liveness_loop(shared: Arc<Shared>) {
    let mut shutdown = shared.shutdown.clone();
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + shared.config.ping_interval,
        shared.config.ping_interval,
    );
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
            _ = ticker.tick() => liveness_sweep(&shared).await,
        }
    }
}

/// One ping cycle: TCP `PING` plus (optionally) one ICMP echo per
/// healthy neighbor, a `pong_timeout` wait, then window evaluation.
async fn liveness_sweep(shared: &Arc<Shared>) {
    let sweep_start = Instant::now();
    let targets: Vec<(NodeId, LinkHandle)> = shared
        .neighbors
        .lock()
        .iter()
        .filter(|(_, n)| n.health == Health::Healthy)
        .map(|(id, n)| (id.clone(), n.handle.clone()))
        .collect();
    if targets.is_empty() {
        return;
    }

    let ping = WireMessage::Ping {
        from: shared.identity.clone(),
    };
    let mut send_failed: HashSet<NodeId> = HashSet::new();
    for (id, handle) in &targets {
        if handle.send(&ping).is_err() {
            send_failed.insert(id.clone());
        }
    }

    // ICMP probes run while we wait for PONGs; one in-flight probe per
    // target, and the 2 s ICMP budget fits inside the 4 s PONG window.
    let icmp_results: Arc<Mutex<HashMap<NodeId, bool>>> = Arc::new(Mutex::new(HashMap::new()));
    if shared.config.icmp_enabled {
        for (id, _) in &targets {
            let id = id.clone();
            let results = Arc::clone(&icmp_results);
            let timeout = shared.config.icmp_timeout;
            tokio::spawn(async move {
                let ok = probe::icmp_probe(&id.host, timeout).await;
                results.lock().insert(id, ok);
            });
        }
    }

    tokio::time::sleep(shared.config.pong_timeout).await;

    let icmp = icmp_results.lock().clone();
    let mut suspects = Vec::new();
    {
        let mut neighbors = shared.neighbors.lock();
        for (id, _) in &targets {
            let Some(n) = neighbors.get_mut(id) else {
                continue;
            };
            if n.health != Health::Healthy {
                continue;
            }
            let tcp_ok = !send_failed.contains(id)
                && n.last_pong.is_some_and(|at| at >= sweep_start);
            let icmp_ok = if shared.config.icmp_enabled {
                icmp.get(id).copied().unwrap_or(false)
            } else {
                true
            };
            let ok = tcp_ok && icmp_ok;
            if n.window.len() == shared.config.liveness_window {
                n.window.pop_front();
            }
            n.window.push_back(ok);
            let three_strikes = n.window.len() == shared.config.liveness_window
                && n.window.iter().all(|o| !o);
            if three_strikes {
                suspects.push(id.clone());
            }
        }
    }
    for suspect in suspects {
        start_suspicion(shared, suspect, false);
    }
}

// ── Suspicion ───────────────────────────────────────────────────────────────

/// Peer-level dead quorum: the initiator's own observation counts as a
/// dead response; `⌈respondents/2⌉ + 1` dead verdicts are required, with
/// a minimum of two respondents (so at least one other neighbor must
/// answer).
fn dead_quorum_met(responses: &HashMap<NodeId, bool>) -> bool {
    let respondents = responses.len() + 1;
    if respondents < 2 {
        return false;
    }
    let dead = 1 + responses.values().filter(|alive| !**alive).count();
    let quorum = respondents.div_ceil(2) + 1;
    dead >= quorum
}

fn start_suspicion(shared: &Arc<Shared>, victim: NodeId, broken: bool) {
    let targets = shared.neighbor_handles_except(Some(&victim));
    {
        let mut susp = shared.suspicion.lock();
        if susp.purged.contains(&victim)
            || susp.reported.contains_key(&victim)
            || susp.table.contains_key(&victim)
        {
            return;
        }
        susp.table.insert(
            victim.clone(),
            Suspicion {
                deadline: Instant::now() + shared.config.suspect_deadline,
                asked: targets.len(),
                responses: HashMap::new(),
                broken,
            },
        );
    }
    // Pings halt while the round runs.
    if let Some(n) = shared.neighbors.lock().get_mut(&victim) {
        n.health = Health::Suspect;
    }
    info!("SUSPECT_INITIATED {victim} (asking {} neighbor(s))", targets.len());

    let request = WireMessage::SuspectRequest {
        suspect: victim,
        requester: shared.identity.clone(),
    };
    for (id, handle) in targets {
        if let Err(e) = handle.send(&request) {
            debug!("suspect request to {id} failed: {e}");
        }
    }
}

async fn respond_to_suspicion(shared: Arc<Shared>, suspect: NodeId, requester: LinkHandle) {
    let alive = match dial::resolve(&suspect.host, suspect.port).await {
        Ok(addr) => {
            probe::suspicion_probe(
                addr,
                shared.config.icmp_enabled,
                shared.config.icmp_timeout,
                shared.config.suspect_response_timeout,
            )
            .await
        }
        Err(_) => false,
    };
    debug!("probe of suspect {suspect}: alive={alive}");
    let response = WireMessage::SuspectResponse {
        suspect,
        alive,
        responder: shared.identity.clone(),
    };
    if let Err(e) = requester.send(&response) {
        debug!("suspect response failed: {e}");
    }
}

fn on_suspect_response(shared: &Arc<Shared>, suspect: NodeId, alive: bool, responder: NodeId) {
    debug!("SUSPECT_RESPONSE for {suspect} from {responder}: alive={alive}");
    let verdict = {
        let mut susp = shared.suspicion.lock();
        let Some(entry) = susp.table.get_mut(&suspect) else {
            return;
        };
        entry.responses.insert(responder, alive);
        if entry.responses.len() >= entry.asked {
            Some(dead_quorum_met(&entry.responses))
        } else {
            None
        }
    };
    if let Some(dead) = verdict {
        settle_suspicion(shared, suspect, dead);
    }
}

/// Close a suspicion round with its verdict: report on dead-quorum,
/// restore the neighbor otherwise.
fn settle_suspicion(shared: &Arc<Shared>, victim: NodeId, dead: bool) {
    let entry = shared.suspicion.lock().table.remove(&victim);
    let Some(entry) = entry else {
        return;
    };
    if dead {
        report_dead(shared, victim);
        return;
    }

    info!("suspicion of {victim} refuted, resuming pings");
    if entry.broken {
        // The link is gone but the peer is alive; restore it.
        tokio::spawn(connect_neighbor(Arc::clone(shared), victim));
    } else if let Some(n) = shared.neighbors.lock().get_mut(&victim) {
        n.health = Health::Healthy;
        n.window.clear();
    }
}

fn report_dead(shared: &Arc<Shared>, victim: NodeId) {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    info!(
        "DEAD_REPORT Dead Node:{}:{}:{ts:.6}:{}",
        victim.host, victim.port, shared.identity.host
    );

    let msg = WireMessage::DeadReport {
        victim: victim.clone(),
        reporter: shared.identity.clone(),
    };
    for (seed, handle) in shared.seeds.lock().iter() {
        if let Err(e) = handle.send(&msg) {
            debug!("dead report to seed {seed} failed: {e}");
        }
    }

    let now = Instant::now();
    shared.suspicion.lock().reported.insert(
        victim.clone(),
        Reported {
            since: now,
            last_retry: now,
            purged_local: false,
        },
    );
    if let Some(n) = shared.neighbors.lock().remove(&victim) {
        n.handle.close();
    }
}

// ── Purge & re-attachment ───────────────────────────────────────────────────

fn purge(shared: &Arc<Shared>, victim: NodeId) {
    {
        let mut susp = shared.suspicion.lock();
        susp.table.remove(&victim);
        susp.reported.remove(&victim);
        if !susp.purged.insert(victim.clone()) {
            return; // already purged
        }
    }
    if let Some(n) = shared.neighbors.lock().remove(&victim) {
        n.handle.close();
    }
    info!("DEAD_CONFIRMED {victim} — purged");
    maybe_reattach(shared);
}

/// Purge without a seed confirmation (the `T_seed_timeout` path); the
/// `reported` entry survives so the `DEAD_REPORT` keeps retrying.
fn purge_locally(shared: &Arc<Shared>, victim: NodeId) {
    shared.suspicion.lock().purged.insert(victim.clone());
    if let Some(n) = shared.neighbors.lock().remove(&victim) {
        n.handle.close();
    }
    warn!("no DEAD_CONFIRMED for {victim} in time, purging locally");
    maybe_reattach(shared);
}

fn maybe_reattach(shared: &Arc<Shared>) {
    let count = shared.neighbors.lock().len();
    if count >= shared.config.min_neighbors {
        return;
    }
    let mut refresh = shared.pl_refresh.lock();
    if refresh.is_some() {
        return;
    }
    let seeds = shared.seeds.lock();
    if seeds.is_empty() {
        return;
    }
    *refresh = Some(PlRefresh {
        expected: seeds.len(),
        responses: Vec::new(),
        deadline: Instant::now() + shared.config.refresh_timeout,
    });
    info!("neighbor count {count} below minimum, refreshing union peer list");
    for (seed, handle) in seeds.iter() {
        if let Err(e) = handle.send(&WireMessage::PlRequest) {
            debug!("PL refresh request to {seed} failed: {e}");
        }
    }
}

/// Re-run preferential attachment against a fresh union list.
fn finish_refresh(shared: &Arc<Shared>, responses: Vec<Vec<NodeId>>) {
    let mut counts: HashMap<NodeId, usize> = HashMap::new();
    for list in responses {
        for peer in list {
            if peer != shared.identity {
                *counts.entry(peer).or_insert(0) += 1;
            }
        }
    }
    {
        let susp = shared.suspicion.lock();
        counts.retain(|peer, _| !susp.purged.contains(peer));
    }
    {
        let neighbors = shared.neighbors.lock();
        counts.retain(|peer, _| !neighbors.contains_key(peer));
    }
    let mut union: Vec<(NodeId, usize)> = counts.into_iter().collect();
    union.sort_by(|a, b| a.0.cmp(&b.0));
    if union.is_empty() {
        debug!("refresh found no new attachment candidates");
        return;
    }

    let mut rng = overlay::rng_for(&shared.identity);
    let k = overlay::neighbor_count(
        &mut rng,
        shared.config.pareto_alpha,
        shared.config.pareto_xmin,
        union.len(),
    );
    let chosen = overlay::select_neighbors(&union, k, &mut rng);
    info!("re-attaching to {} neighbor(s)", chosen.len());
    for target in chosen {
        tokio::spawn(connect_neighbor(Arc::clone(shared), target));
    }
}

// ── Deadline reaper ─────────────────────────────────────────────────────────

fn reap(shared: &Arc<Shared>) {
    let now = Instant::now();

    // Suspicion rounds past their deadline settle on whatever answers
    // arrived.
    let expired: Vec<(NodeId, bool)> = {
        let susp = shared.suspicion.lock();
        susp.table
            .iter()
            .filter(|(_, e)| now >= e.deadline)
            .map(|(victim, e)| (victim.clone(), dead_quorum_met(&e.responses)))
            .collect()
    };
    for (victim, dead) in expired {
        debug!("suspicion round for {victim} hit its deadline");
        settle_suspicion(shared, victim, dead);
    }

    // Unconfirmed dead reports: local purge after the seed timeout, and
    // periodic retries either way.
    let mut to_purge = Vec::new();
    let mut to_retry = Vec::new();
    {
        let mut susp = shared.suspicion.lock();
        for (victim, rep) in susp.reported.iter_mut() {
            if !rep.purged_local
                && now.duration_since(rep.since) >= shared.config.confirm_timeout
            {
                rep.purged_local = true;
                to_purge.push(victim.clone());
            }
            if now.duration_since(rep.last_retry) >= shared.config.report_retry_interval {
                rep.last_retry = now;
                to_retry.push(victim.clone());
            }
        }
    }
    for victim in to_purge {
        purge_locally(shared, victim);
    }
    for victim in to_retry {
        let msg = WireMessage::DeadReport {
            victim,
            reporter: shared.identity.clone(),
        };
        for handle in shared.seeds.lock().values() {
            let _ = handle.send(&msg);
        }
    }

    // A PL refresh that never completed finishes with what it has.
    let stale = {
        let mut refresh = shared.pl_refresh.lock();
        let expired = refresh.as_ref().is_some_and(|r| now >= r.deadline);
        if expired {
            refresh.take().map(|r| r.responses)
        } else {
            None
        }
    };
    if let Some(responses) = stale {
        finish_refresh(shared, responses);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(port: u16) -> NodeId {
        NodeId::new("127.0.0.1", port)
    }

    fn responses(entries: &[(u16, bool)]) -> HashMap<NodeId, bool> {
        entries.iter().map(|(p, a)| (peer(*p), *a)).collect()
    }

    #[test]
    fn test_dead_quorum_needs_a_second_respondent() {
        // Only the initiator's own observation: not enough.
        assert!(!dead_quorum_met(&responses(&[])));
    }

    #[test]
    fn test_dead_quorum_two_respondents() {
        // Initiator + one dead verdict: 2/2 dead, quorum 2.
        assert!(dead_quorum_met(&responses(&[(6003, false)])));
        // Initiator + one alive verdict: 1/2 dead, quorum 2.
        assert!(!dead_quorum_met(&responses(&[(6003, true)])));
    }

    #[test]
    fn test_dead_quorum_three_respondents() {
        // r=3 → quorum ⌈3/2⌉+1 = 3: a single alive verdict saves the
        // suspect.
        assert!(!dead_quorum_met(&responses(&[(6003, false), (6004, true)])));
        assert!(dead_quorum_met(&responses(&[(6003, false), (6004, false)])));
    }

    #[test]
    fn test_dead_quorum_five_respondents() {
        // r=5 → quorum 4: initiator + three dead verdicts.
        assert!(dead_quorum_met(&responses(&[
            (6003, false),
            (6004, false),
            (6005, false),
            (6006, true),
        ])));
        assert!(!dead_quorum_met(&responses(&[
            (6003, false),
            (6004, false),
            (6005, true),
            (6006, true),
        ])));
    }
}
