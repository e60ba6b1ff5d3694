//! Liveness probes used by the ping sweep and the suspicion responders.
//!
//! Two independent signals: a one-shot OS ICMP echo (spawned `ping`
//! child process, at most one in flight per target) and a TCP connect
//! probe from the wire layer.

use {
    gossipnet_wire::dial,
    log::debug,
    std::{net::SocketAddr, process::Stdio, time::Duration},
    tokio::process::Command,
};

/// One ICMP echo to `host`, bounded by `timeout`. Returns false on a
/// non-zero exit, a timeout, or a spawn failure (no `ping` binary).
pub async fn icmp_probe(host: &str, timeout: Duration) -> bool {
    let wait_secs = timeout.as_secs().max(1);
    let child = Command::new("ping")
        .arg("-c")
        .arg("1")
        .arg("-W")
        .arg(wait_secs.to_string())
        .arg(host)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();

    match tokio::time::timeout(timeout + Duration::from_secs(1), child).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(e)) => {
            debug!("icmp probe of {host} could not spawn: {e}");
            false
        }
        Err(_) => {
            debug!("icmp probe of {host} timed out");
            false
        }
    }
}

/// Combined suspicion probe: ICMP (when enabled) and a TCP connect, both
/// of which must pass for the target to count as alive.
pub async fn suspicion_probe(
    addr: SocketAddr,
    icmp_enabled: bool,
    icmp_timeout: Duration,
    tcp_timeout: Duration,
) -> bool {
    let tcp_alive = dial::tcp_probe(addr, tcp_timeout).await;
    if !tcp_alive {
        return false;
    }
    if icmp_enabled {
        return icmp_probe(&addr.ip().to_string(), icmp_timeout).await;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_suspicion_probe_tcp_only() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let probe = suspicion_probe(addr, false, Duration::from_millis(100), Duration::from_secs(1));
        let (_, alive) = tokio::join!(listener.accept(), probe);
        assert!(alive);

        drop(listener);
        assert!(
            !suspicion_probe(addr, false, Duration::from_millis(100), Duration::from_millis(500))
                .await
        );
    }
}
