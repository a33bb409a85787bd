use crate::adapter::dial_tcp;
use crate::descriptor::Transport;
use crate::error::{ProbeError, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::debug;

/// Raw reachability check against a proxy's declared endpoint, bypassing the
/// proxy protocol entirely. Returns the address that answered.
#[async_trait]
pub trait ConnectivityChecker: Send + Sync {
    async fn check_reachable(
        &self,
        host: &str,
        port: u16,
        transport: Transport,
        timeout: Duration,
    ) -> Result<String>;
}

/// Checker backed by plain sockets.
///
/// TCP requires a completed handshake. UDP has no handshake, so a UDP check
/// only proves the name resolves and a datagram can be routed to it.
#[derive(Debug, Clone, Default)]
pub struct NetConnectivity;

#[async_trait]
impl ConnectivityChecker for NetConnectivity {
    async fn check_reachable(
        &self,
        host: &str,
        port: u16,
        transport: Transport,
        timeout: Duration,
    ) -> Result<String> {
        let peer = match transport {
            Transport::Tcp => {
                let stream = dial_tcp(host, port, timeout).await?;
                stream.peer_addr()?
            }
            Transport::Udp => udp_reachable(host, port, timeout).await?,
        };

        debug!("{transport} {host}:{port} reachable at {peer}");
        Ok(peer.ip().to_string())
    }
}

async fn udp_reachable(host: &str, port: u16, timeout: Duration) -> Result<SocketAddr> {
    let host = host.trim_start_matches('[').trim_end_matches(']');

    let target = match tokio::time::timeout(timeout, tokio::net::lookup_host((host, port))).await {
        Ok(Ok(mut addrs)) => addrs
            .next()
            .ok_or_else(|| ProbeError::network(format!("no address found for {host}")))?,
        Ok(Err(e)) => {
            return Err(ProbeError::network_with_source(
                format!("failed to resolve {host}"),
                e,
            ));
        }
        Err(_) => return Err(ProbeError::timeout(format!("resolve {host}"), timeout)),
    };

    let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(target).await?;
    socket.send(&[]).await?;

    Ok(target)
}
