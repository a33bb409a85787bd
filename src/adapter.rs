//! Protocol adapter seam
//!
//! A [`ProtocolAdapter`] turns a descriptor into a [`ProxyClient`] able to open
//! tunneled streams. The built-in [`NativeAdapter`] speaks SOCKS5 and HTTP
//! CONNECT; every other protocol is reported as unsupported so the prober falls
//! back to a raw connectivity check.

use crate::descriptor::{Protocol, ProxyDescriptor};
use crate::error::{ProbeError, Result};
use crate::http_connect::HttpConnectClient;
use crate::socks5::{Socks5Client, auth::UserPass};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Byte stream carried through a proxy
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// A client that opens TCP streams to arbitrary targets through one proxy
#[async_trait]
pub trait ProxyClient: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> Result<BoxedStream>;
}

pub trait ProtocolAdapter: Send + Sync {
    /// Whether this adapter can build a client for the descriptor's protocol
    fn supports_testing(&self, descriptor: &ProxyDescriptor) -> bool;

    fn build_client(&self, descriptor: &ProxyDescriptor) -> Result<Box<dyn ProxyClient>>;
}

/// Adapter backed by the crate's own SOCKS5 and HTTP CONNECT clients
#[derive(Debug, Clone)]
pub struct NativeAdapter {
    connect_timeout: Duration,
}

impl NativeAdapter {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl ProtocolAdapter for NativeAdapter {
    fn supports_testing(&self, descriptor: &ProxyDescriptor) -> bool {
        matches!(
            descriptor.protocol,
            Protocol::Socks5 { .. } | Protocol::Http { .. }
        )
    }

    fn build_client(&self, descriptor: &ProxyDescriptor) -> Result<Box<dyn ProxyClient>> {
        match &descriptor.protocol {
            Protocol::Socks5 { username, password } => {
                let auth = match (username, password) {
                    (Some(u), Some(p)) => Some(UserPass {
                        username: u.clone(),
                        password: p.clone(),
                    }),
                    (None, None) => None,
                    _ => {
                        return Err(ProbeError::adapter(
                            "must provide both username and password (or neither)",
                            "socks5",
                        ));
                    }
                };
                let client =
                    Socks5Client::new(&descriptor.server, descriptor.port, self.connect_timeout)
                        .with_auth(auth);
                Ok(Box::new(client))
            }
            Protocol::Http { username, password } => {
                let credentials = match (username, password) {
                    (Some(u), Some(p)) => Some((u.clone(), p.clone())),
                    (None, None) => None,
                    _ => {
                        return Err(ProbeError::adapter(
                            "must provide both username and password (or neither)",
                            "http",
                        ));
                    }
                };
                let client =
                    HttpConnectClient::new(&descriptor.server, descriptor.port, self.connect_timeout)
                        .with_credentials(credentials);
                Ok(Box::new(client))
            }
            other => Err(ProbeError::adapter(
                "no native client for this protocol",
                other.type_name(),
            )),
        }
    }
}

/// Client that dials targets without any proxy
#[derive(Debug, Clone)]
pub struct DirectClient {
    connect_timeout: Duration,
}

impl DirectClient {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl ProxyClient for DirectClient {
    async fn connect(&self, host: &str, port: u16) -> Result<BoxedStream> {
        let stream = dial_tcp(host, port, self.connect_timeout).await?;
        Ok(Box::new(stream))
    }
}

/// Open a TCP connection, bounded by `timeout`
pub(crate) async fn dial_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let host = host.trim_start_matches('[').trim_end_matches(']');

    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            stream.set_nodelay(true).ok();
            Ok(stream)
        }
        Ok(Err(e)) => Err(ProbeError::network_with_source(
            format!("failed to connect to {host}:{port}: {e}"),
            e,
        )),
        Err(_) => Err(ProbeError::timeout(format!("connect {host}:{port}"), timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Network;

    fn descriptor(protocol: Protocol) -> ProxyDescriptor {
        ProxyDescriptor {
            name: String::new(),
            id: None,
            server: "127.0.0.1".into(),
            port: 1080,
            protocol,
        }
    }

    #[test]
    fn test_supported_set() {
        let adapter = NativeAdapter::new(Duration::from_secs(1));

        let socks = descriptor(Protocol::Socks5 {
            username: None,
            password: None,
        });
        let vmess = descriptor(Protocol::Vmess {
            uuid: "u".into(),
            alter_id: 0,
            cipher: "auto".into(),
            network: Network::Ws,
        });

        assert!(adapter.supports_testing(&socks));
        assert!(!adapter.supports_testing(&vmess));
        assert!(adapter.build_client(&socks).is_ok());
        assert!(matches!(
            adapter.build_client(&vmess),
            Err(ProbeError::Adapter { .. })
        ));
    }

    #[test]
    fn test_half_credentials_rejected() {
        let adapter = NativeAdapter::new(Duration::from_secs(1));
        let http = descriptor(Protocol::Http {
            username: Some("user".into()),
            password: None,
        });
        assert!(adapter.build_client(&http).is_err());
    }

    #[tokio::test]
    async fn test_dial_refused_is_network_error() {
        // Bind then drop to get a port with nothing listening
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = dial_tcp("127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Network { .. }));
    }
}
