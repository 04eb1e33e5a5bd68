//! TCP dial probe.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ProbeError;

/// Upper bound on a single dial, independent of the profile timeout.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(2);

/// Loopback address of a local service port.
pub fn local_addr(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

/// Open (and immediately drop) a TCP connection.
pub async fn dial(
    addr: SocketAddr,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), ProbeError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProbeError::Cancelled),
        res = tokio::time::timeout(timeout, TcpStream::connect(addr)) => match res {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => {
                debug!(%addr, error = %e, "tcp dial failed");
                Err(ProbeError::Io(e))
            }
            Err(_) => {
                debug!(%addr, "tcp dial timed out");
                Err(ProbeError::Timeout(timeout))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use vigil_core::ErrorCategory;

    use super::*;

    #[tokio::test]
    async fn dial_open_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        dial(addr, Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn dial_closed_port_is_refused() {
        // Bind then drop to get a port nothing listens on.
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let err = dial(addr, Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ConnectionRefused);
    }

    #[tokio::test]
    async fn dial_respects_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = dial(local_addr(1), Duration::from_secs(1), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Cancelled));
    }
}
