//! SOCKS5 client used to tunnel the egress probe
//!
//! - Features:
//!     - CONNECT
//!     - No Authentication
//!     - Username/Password Authentication
//!     - IPv4, IPv6 and domain name targets
//! - [SOCKS5 (RFC 1928)](https://datatracker.ietf.org/doc/html/rfc1928)
//! - [Username/Password Authentication (RFC 1929)](https://datatracker.ietf.org/doc/html/rfc1929)

pub mod address;
pub mod auth;
pub mod commands;
pub mod protocol;

use crate::adapter::{BoxedStream, ProxyClient, dial_tcp};
use crate::error::{ProbeError, Result};
use async_trait::async_trait;
use auth::UserPass;
use std::time::Duration;

/// Socks5Client dials targets through an upstream SOCKS5 server
pub struct Socks5Client {
    pub server: String,
    pub port: u16,
    pub auth: Option<UserPass>,
    connect_timeout: Duration,
}

/// Socks5Client implementation block
impl Socks5Client {
    /// new is a constructor for the Socks5Client type
    pub fn new(server: impl Into<String>, port: u16, connect_timeout: Duration) -> Self {
        Self {
            server: server.into(),
            port,
            auth: None,
            connect_timeout,
        }
    }

    /// with_auth applies the desired authentication
    pub fn with_auth(mut self, auth: Option<UserPass>) -> Self {
        self.auth = auth;
        self
    }
}

#[async_trait]
impl ProxyClient for Socks5Client {
    async fn connect(&self, host: &str, port: u16) -> Result<BoxedStream> {
        // Connect to the SOCKS server itself
        let mut stream = dial_tcp(&self.server, self.port, self.connect_timeout).await?;

        // Negotiate authentication, then ask for the tunnel
        auth::negotiate_auth(&mut stream, self.auth.as_ref())
            .await
            .map_err(|e| ProbeError::network_with_source("socks5 handshake failed", e))?;

        commands::send_connect(&mut stream, host, port)
            .await
            .map_err(|e| ProbeError::network_with_source("socks5 connect failed", e))?;

        Ok(Box::new(stream))
    }
}
