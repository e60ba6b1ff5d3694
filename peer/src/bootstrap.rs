//! Registration and union-peer-list collection.
//!
//! Strictly serial per seed, and the sockets stay synchronous until
//! every request/response exchange is done — only then are they handed
//! to the link layer's background read loops. That ordering is what
//! keeps bootstrap free of read races.

use {
    crate::{
        config::PeerConfig,
        error::{PeerError, Result},
    },
    gossipnet_wire::{dial, framing, NodeId, WireMessage},
    log::{info, warn},
    std::{
        collections::HashMap,
        time::{Duration, Instant},
    },
    tokio::net::TcpStream,
};

/// What bootstrap produced: one live socket per responsive seed, and the
/// union peer list with per-candidate occurrence counts (the degree
/// estimate for preferential attachment).
pub struct Bootstrap {
    /// Seed sockets, ready to hand to the link layer.
    pub seed_streams: Vec<(NodeId, TcpStream)>,
    /// Union list (self excluded), sorted by identity for deterministic
    /// sampling.
    pub union: Vec<(NodeId, usize)>,
}

/// Register with every configured seed and collect the union peer list.
///
/// Succeeds once at least one seed ACKs. The first `REGISTER_NACK`
/// aborts the whole bootstrap (the caller exits with code 2).
pub async fn run(identity: &NodeId, seeds: &[NodeId], config: &PeerConfig) -> Result<Bootstrap> {
    let mut streams: Vec<(NodeId, TcpStream)> = Vec::new();
    let mut reachable = 0usize;
    let mut acked = false;

    for seed in seeds {
        let addr = match dial::resolve(&seed.host, seed.port).await {
            Ok(addr) => addr,
            Err(e) => {
                warn!("seed {seed} does not resolve: {e}");
                continue;
            }
        };
        let mut stream =
            match dial::connect_with_retry(addr, config.dial_attempts, config.dial_backoff).await
            {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("cannot reach seed {seed}: {e}");
                    continue;
                }
            };
        reachable += 1;

        info!("REGISTER_REQUEST to seed {seed}");
        let request = WireMessage::RegisterRequest {
            peer: identity.clone(),
        };
        if send(&mut stream, &request, config).await.is_err() {
            warn!("registration send to {seed} failed");
            continue;
        }

        match wait_for(&mut stream, config, config.register_timeout, |msg| {
            matches!(
                msg,
                WireMessage::RegisterAck { .. } | WireMessage::RegisterNack
            )
        })
        .await
        {
            Ok(WireMessage::RegisterAck { peers }) => {
                info!("registered with seed {seed} ({} peers known)", peers.len());
                acked = true;
                streams.push((seed.clone(), stream));
            }
            Ok(_) => {
                warn!("registration rejected by seed {seed}");
                return Err(PeerError::Rejected(seed.clone()));
            }
            Err(e) => {
                warn!("no registration answer from seed {seed}: {e}");
            }
        }
    }

    if reachable == 0 {
        return Err(PeerError::NoSeedsReachable);
    }
    if !acked || streams.is_empty() {
        return Err(PeerError::RegistrationTimeout);
    }

    // Union PL: one PL_REQUEST per registered seed; occurrences across
    // the returned lists are the degree proxy.
    let mut counts: HashMap<NodeId, usize> = HashMap::new();
    for (seed, stream) in &mut streams {
        if send(stream, &WireMessage::PlRequest, config).await.is_err() {
            warn!("PL_REQUEST to {seed} failed");
            continue;
        }
        match wait_for(stream, config, config.register_timeout, |msg| {
            matches!(msg, WireMessage::PlResponse { .. })
        })
        .await
        {
            Ok(WireMessage::PlResponse { peers }) => {
                for peer in peers {
                    if peer != *identity {
                        *counts.entry(peer).or_insert(0) += 1;
                    }
                }
            }
            Ok(_) => {}
            Err(e) => warn!("no PL from seed {seed}: {e}"),
        }
    }

    let mut union: Vec<(NodeId, usize)> = counts.into_iter().collect();
    union.sort_by(|a, b| a.0.cmp(&b.0));
    info!("union peer list has {} entries", union.len());

    Ok(Bootstrap {
        seed_streams: streams,
        union,
    })
}

async fn send(stream: &mut TcpStream, msg: &WireMessage, config: &PeerConfig) -> Result<()> {
    let frame = msg.to_frame(config.link.max_frame_len)?;
    framing::write_all(stream, &frame).await?;
    Ok(())
}

/// Read frames until one matches `want` or the deadline passes. Frames
/// that do not match (or do not decode) are skipped — during bootstrap
/// the only expected traffic is the awaited response.
async fn wait_for<F>(
    stream: &mut TcpStream,
    config: &PeerConfig,
    timeout: Duration,
    want: F,
) -> Result<WireMessage>
where
    F: Fn(&WireMessage) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(PeerError::RegistrationTimeout);
        }
        let frame = tokio::time::timeout(
            remaining,
            framing::read_frame(stream, config.link.max_frame_len),
        )
        .await
        .map_err(|_| PeerError::RegistrationTimeout)?;
        match frame {
            Ok(Some(body)) => match WireMessage::from_json(&body) {
                Ok(msg) if want(&msg) => return Ok(msg),
                Ok(other) => {
                    warn!("unexpected {} during bootstrap, skipping", other.kind());
                }
                Err(e) => {
                    warn!("undecodable frame during bootstrap: {e}");
                }
            },
            Ok(None) => return Err(PeerError::RegistrationTimeout),
            Err(e) => return Err(e.into()),
        }
    }
}
