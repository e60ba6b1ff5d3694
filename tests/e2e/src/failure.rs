//! The full failure pipeline: broken pipe → neighbor suspicion quorum →
//! dead reports → seed vote → `DEAD_CONFIRMED` → purge.

use {
    crate::harness::{node, reserve_ports, Cluster},
    std::time::Duration,
    tokio::time::sleep,
};

/// Scenario: three seeds, three fully-registered peers, P3 crashes.
/// P1 and P2 both observe the broken pipe, confirm each other's
/// suspicion (the victim's port refuses connections), report to every
/// seed, and the seeds vote P3 out. Final PL on all seeds: {P1, P2}.
#[tokio::test(flavor = "multi_thread")]
async fn test_crashed_peer_is_evicted() {
    let mut cluster = Cluster::start_seeds(3).await;

    // Register sequentially so each bootstrap sees the earlier peers.
    // With the Pareto floor at 2, P2 attaches to P1 and P3 attaches to
    // both — a triangle.
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

    let p3 = node(reserve_ports(1)[0]);
    let (p3_kill, p3_task) = cluster.spawn_peer_killable(p3.clone());
    cluster
        .wait_for_pl(
            3,
            &[p1.clone(), p2.clone(), p3.clone()],
            Duration::from_secs(10),
        )
        .await;
    // Let the overlay links settle before pulling the plug.
    sleep(Duration::from_millis(800)).await;

    // Crash P3: its listener and every socket close.
    let _ = p3_kill.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(2), p3_task).await;

    // Broken pipes at P1/P2 kick suspicion; both confirm dead and
    // report; seeds need two distinct reporters, then commit by
    // majority.
    cluster
        .wait_for_pl(3, &[p1, p2], Duration::from_secs(20))
        .await;

    cluster.shutdown().await;
}

/// A registered-but-gone peer must not linger when only one report
/// arrives: the seeds wait for a second distinct reporter inside the
/// report window before proposing. Indirectly covered above; here we
/// assert the PL is still intact when a single raw `DEAD_REPORT` is
/// injected for a live peer.
#[tokio::test(flavor = "multi_thread")]
async fn test_single_report_does_not_evict() {
    use {crate::harness::Client, gossipnet_wire::WireMessage};

    let mut cluster = Cluster::start_seeds(3).await;

    let p1 = node(reserve_ports(1)[0]);
    let _t1 = cluster.spawn_peer(p1.clone());
    cluster
        .wait_for_pl(3, &[p1.clone()], Duration::from_secs(10))
        .await;

    // One forged report from a single reporter.
    let reporter = node(reserve_ports(1)[0]);
    for seed in cluster.seeds.clone() {
        let mut client = Client::connect(&seed).await.expect("connect seed");
        client
            .send(&WireMessage::DeadReport {
                victim: p1.clone(),
                reporter: reporter.clone(),
            })
            .await
            .expect("send report");
    }

    sleep(Duration::from_secs(2)).await;
    for seed in &cluster.seeds {
        let pl = cluster.query_pl(seed).await.expect("query");
        assert_eq!(pl, vec![p1.clone()], "single report must not evict");
    }

    cluster.shutdown().await;
}
