//! Gossip forwarding and deduplication across a small overlay.

use {
    crate::harness::{node, reserve_ports, Client, Cluster},
    gossipnet_wire::{NodeId, WireMessage},
    std::time::Duration,
    tokio::time::{sleep, Instant},
};

/// Wait (with retries) until a raw client can reach `target` and
/// complete a `HELLO` handshake.
async fn join_as_neighbor(target: &NodeId, me: &NodeId) -> Client {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match Client::connect(target).await {
            Ok(mut client) => {
                client
                    .send(&WireMessage::Hello { peer: me.clone() })
                    .await
                    .expect("hello");
                return client;
            }
            Err(_) if Instant::now() < deadline => sleep(Duration::from_millis(50)).await,
            Err(e) => panic!("cannot reach {target}: {e}"),
        }
    }
}

/// Drain frames from `client` for `window`, recording how many times
/// `payload` appeared as gossip. Answers liveness pings so the remote
/// peer keeps treating us as a healthy neighbor.
async fn count_copies(client: &mut Client, me: &NodeId, payload: &str, window: Duration) -> usize {
    let deadline = Instant::now() + window;
    let mut copies = 0;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return copies;
        }
        match client.recv(remaining).await {
            Ok(WireMessage::Gossip { payload: got }) if got == payload => copies += 1,
            Ok(WireMessage::Ping { .. }) => {
                let _ = client.send(&WireMessage::Pong { from: me.clone() }).await;
            }
            Ok(_) => continue, // unrelated gossip
            Err(_) => return copies,
        }
    }
}

/// Raw client joins two real peers as a neighbor of both, injects one
/// payload at P1, and verifies it comes back exactly once — forwarded
/// P1→P2→client, never P1→client (the sender is excluded) and never
/// twice (the ML dedupes replays).
#[tokio::test(flavor = "multi_thread")]
async fn test_forwarding_excludes_sender_and_dedupes() {
    let mut cluster = Cluster::start_seeds(3).await;

    let p1 = node(reserve_ports(1)[0]);
    let _t1 = cluster.spawn_peer(p1.clone());
    cluster
        .wait_for_pl(3, &[p1.clone()], Duration::from_secs(10))
        .await;

    let p2 = node(reserve_ports(1)[0]);
    let _t2 = cluster.spawn_peer(p2.clone());
    cluster
        .wait_for_pl(3, &[p1.clone(), p2.clone()], Duration::from_secs(10))
        .await;
    // P2's bootstrap picked P1; give the HELLO a moment to land.
    sleep(Duration::from_millis(500)).await;

    let me = node(reserve_ports(1)[0]);
    let mut to_p1 = join_as_neighbor(&p1, &me).await;
    let mut to_p2 = join_as_neighbor(&p2, &me).await;
    sleep(Duration::from_millis(300)).await;

    let payload = "1700000000.123456:10.9.9.9:0".to_owned();
    to_p1
        .send(&WireMessage::Gossip {
            payload: payload.clone(),
        })
        .await
        .expect("inject gossip");

    // Exactly one copy via P2 (P1 → P2 → us), none straight back from
    // P1 (the inbound edge is excluded from forwarding).
    let via_p2 = count_copies(&mut to_p2, &me, &payload, Duration::from_secs(3)).await;
    assert_eq!(via_p2, 1, "expected exactly one forwarded copy via p2");
    let via_p1 = count_copies(&mut to_p1, &me, &payload, Duration::from_millis(700)).await;
    assert_eq!(via_p1, 0, "payload bounced back to its sender");

    // A replay is a silent drop everywhere.
    to_p1
        .send(&WireMessage::Gossip {
            payload: payload.clone(),
        })
        .await
        .expect("replay gossip");
    let after_replay = count_copies(&mut to_p2, &me, &payload, Duration::from_secs(1)).await;
    assert_eq!(after_replay, 0, "duplicate was forwarded");

    cluster.shutdown().await;
}

/// A peer originates on its own clock; a neighbor sees well-formed
/// payloads with strictly increasing sequence numbers, and origination
/// stops at the cap.
#[tokio::test(flavor = "multi_thread")]
async fn test_origination_reaches_neighbors() {
    let mut cluster = Cluster::start_seeds(3).await;

    let p1 = node(reserve_ports(1)[0]);
    let _t1 = cluster.spawn_peer(p1.clone());

    // Join before the first origination tick so we see the stream from
    // the start (the dev profile originates every 200 ms, 10 total).
    let me = node(reserve_ports(1)[0]);
    let mut client = join_as_neighbor(&p1, &me).await;

    let mut seqs = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        match client.recv(Duration::from_secs(1)).await {
            Ok(WireMessage::Gossip { payload }) => {
                let parts: Vec<&str> = payload.split(':').collect();
                assert_eq!(parts.len(), 3, "payload shape: {payload}");
                assert!(parts[0].parse::<f64>().is_ok(), "timestamp: {payload}");
                assert_eq!(parts[1], "127.0.0.1");
                seqs.push(parts[2].parse::<u32>().expect("seq"));
            }
            Ok(WireMessage::Ping { .. }) => {
                let _ = client.send(&WireMessage::Pong { from: me.clone() }).await;
            }
            Ok(_) => continue,
            Err(_) => {
                if !seqs.is_empty() {
                    break; // stream went quiet after the cap
                }
            }
        }
    }

    assert!(seqs.len() >= 3, "too few originations observed: {seqs:?}");
    assert!(seqs.len() <= 10, "origination cap exceeded: {seqs:?}");
    assert!(
        seqs.windows(2).all(|w| w[1] > w[0]),
        "sequences not increasing: {seqs:?}"
    );

    cluster.shutdown().await;
}
