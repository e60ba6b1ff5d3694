//! Outbound connects and listener binding.
//!
//! Connects retry with a linear 1 s backoff (transient refusals are the
//! norm while a cluster is starting up); listeners bind with address
//! reuse so a node can restart inside the OS TIME_WAIT window.

use {
    crate::error::{Result, WireError},
    log::debug,
    std::net::SocketAddr,
    tokio::{
        net::{lookup_host, TcpListener, TcpSocket, TcpStream},
        time::{sleep, Duration},
    },
};

/// Default dial attempts before giving up.
pub const DIAL_ATTEMPTS: u32 = 5;
/// Backoff between dial attempts.
pub const DIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Resolve `host:port` to the first usable socket address.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let mut addrs = lookup_host((host, port)).await?;
    addrs
        .next()
        .ok_or_else(|| WireError::Config(format!("{host}:{port} did not resolve")))
}

/// Bind a listener with `SO_REUSEADDR` set.
pub async fn bind_reuse(host: &str, port: u16) -> Result<TcpListener> {
    let addr = resolve(host, port).await?;
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(1024)?)
}

/// Dial `addr`, retrying `attempts` times with `backoff` between tries.
pub async fn connect_with_retry(
    addr: SocketAddr,
    attempts: u32,
    backoff: Duration,
) -> Result<TcpStream> {
    let mut last = String::new();
    for attempt in 1..=attempts {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("dial {addr} attempt {attempt}/{attempts} failed: {e}");
                last = e.to_string();
            }
        }
        if attempt < attempts {
            sleep(backoff).await;
        }
    }
    Err(WireError::ConnectFailed {
        addr: addr.to_string(),
        attempts,
        last,
    })
}

/// One-shot TCP reachability probe (connect-then-close) with a deadline.
/// Used by the suspicion path as the non-ICMP liveness signal.
pub async fn tcp_probe(addr: SocketAddr, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_reuse_and_dial() {
        let listener = bind_reuse("127.0.0.1", 0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dial = connect_with_retry(addr, 1, Duration::from_millis(10));
        let (accepted, dialed) = tokio::join!(listener.accept(), dial);
        assert!(accepted.is_ok());
        assert!(dialed.is_ok());
    }

    #[tokio::test]
    async fn test_connect_retry_exhaustion() {
        // Bind then drop to get a port with (very likely) nothing on it.
        let listener = bind_reuse("127.0.0.1", 0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = connect_with_retry(addr, 2, Duration::from_millis(10)).await;
        assert!(matches!(err, Err(WireError::ConnectFailed { attempts: 2, .. })));
    }

    #[tokio::test]
    async fn test_tcp_probe() {
        let listener = bind_reuse("127.0.0.1", 0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let probe = tcp_probe(addr, Duration::from_secs(1));
        let (_, alive) = tokio::join!(listener.accept(), probe);
        assert!(alive);

        drop(listener);
        assert!(!tcp_probe(addr, Duration::from_millis(500)).await);
    }
}
