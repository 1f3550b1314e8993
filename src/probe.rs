use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Default connect timeout for a single reachability probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Reachability check against a TCP endpoint.
///
/// Implementations must collapse every failure into `false`; probing is
/// advisory and never an error for the caller.
#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn probe(&self, host: &str, port: u16, timeout: Duration) -> bool;
}

/// Single-attempt TCP connect probe.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

impl TcpProbe {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PortProbe for TcpProbe {
    async fn probe(&self, host: &str, port: u16, limit: Duration) -> bool {
        probe_port(host, port, limit).await
    }
}

/// Try once to open a TCP connection to `host:port` within `limit`.
///
/// The timeout covers name resolution as well as the handshake. The stream is
/// dropped immediately on success.
pub async fn probe_port(host: &str, port: u16, limit: Duration) -> bool {
    if port == 0 || limit.is_zero() {
        return false;
    }

    match timeout(limit, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            drop(stream);
            true
        }
        Ok(Err(e)) => {
            debug!("Probe {}:{} failed: {}", host, port, e);
            false
        }
        Err(_) => {
            debug!("Probe {}:{} timed out after {:?}", host, port, limit);
            false
        }
    }
}
