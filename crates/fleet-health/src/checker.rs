//! Reachability probe.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::trace;

/// Result of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The TCP handshake completed.
    Reachable,
    /// The connection was refused or failed outright.
    Refused,
    /// No answer within the timeout.
    TimedOut,
}

impl ProbeResult {
    pub fn is_reachable(self) -> bool {
        self == ProbeResult::Reachable
    }
}

/// Connect to `address`, giving up after `timeout`. The connection is
/// dropped immediately.
pub async fn tcp_probe(address: SocketAddr, timeout: Duration) -> ProbeResult {
    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(_stream)) => ProbeResult::Reachable,
        Ok(Err(e)) => {
            trace!(%address, error = %e, "probe refused");
            ProbeResult::Refused
        }
        Err(_) => ProbeResult::TimedOut,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn listening_port_is_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert_eq!(
            tcp_probe(addr, Duration::from_millis(500)).await,
            ProbeResult::Reachable
        );
    }

    #[tokio::test]
    async fn closed_port_is_not_reachable() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let result = tcp_probe(addr, Duration::from_millis(500)).await;
        assert!(!result.is_reachable());
    }

    #[tokio::test]
    async fn unroutable_address_times_out_or_fails() {
        // TEST-NET-1; either dropped (timeout) or rejected by the host stack.
        let addr: SocketAddr = "192.0.2.1:25565".parse().unwrap();
        let result = tcp_probe(addr, Duration::from_millis(100)).await;
        assert!(matches!(result, ProbeResult::TimedOut | ProbeResult::Refused));
    }
}
