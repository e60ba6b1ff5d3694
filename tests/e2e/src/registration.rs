//! Registration scenarios: sequential, concurrent, and partitioned
//! rosters around the quorum boundary.

use {
    crate::harness::{node, reserve_ports, Cluster},
    gossipnet_peer::PeerError,
    std::time::Duration,
};

#[tokio::test(flavor = "multi_thread")]
async fn test_sequential_registration() {
    let mut cluster = Cluster::start_seeds(3).await;

    let p1 = node(reserve_ports(1)[0]);
    let _p1_task = cluster.spawn_peer(p1.clone());
    cluster
        .wait_for_pl(3, &[p1.clone()], Duration::from_secs(10))
        .await;

    let p2 = node(reserve_ports(1)[0]);
    let _p2_task = cluster.spawn_peer(p2.clone());
    cluster
        .wait_for_pl(3, &[p1, p2], Duration::from_secs(10))
        .await;

    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_registration() {
    let mut cluster = Cluster::start_seeds(3).await;

    let ports = reserve_ports(2);
    let p1 = node(ports[0]);
    let p2 = node(ports[1]);
    // Both at once; distinct candidates never conflict, so both commit.
    let _t1 = cluster.spawn_peer(p1.clone());
    let _t2 = cluster.spawn_peer(p2.clone());

    cluster
        .wait_for_pl(3, &[p1, p2], Duration::from_secs(10))
        .await;
    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_two_of_three_seeds_is_quorum() {
    // n=3 configured, 2 running: 2 yes votes meet ⌊3/2⌋+1.
    let mut cluster = Cluster::start_seeds_partial(3, 2).await;

    let p1 = node(reserve_ports(1)[0]);
    let _task = cluster.spawn_peer(p1.clone());
    cluster
        .wait_for_pl(2, &[p1], Duration::from_secs(10))
        .await;
    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_two_of_five_seeds_rejects() {
    // n=5 configured, 2 running: 2 yes votes < quorum 3, the proposal
    // times out, and the candidate is NACKed.
    let mut cluster = Cluster::start_seeds_partial(5, 2).await;

    let p1 = node(reserve_ports(1)[0]);
    let task = cluster.spawn_peer(p1);
    let result = tokio::time::timeout(Duration::from_secs(15), task)
        .await
        .expect("peer did not settle")
        .expect("peer task panicked");
    assert!(
        matches!(result, Err(PeerError::Rejected(_))),
        "expected rejection, got {result:?}"
    );
    cluster.shutdown().await;
}
