//! Egress probing
//!
//! For each descriptor the prober either fetches the echo page through the
//! proxy, or, when no client can be built for the protocol, checks that the
//! declared endpoint is reachable at all.

use crate::adapter::{NativeAdapter, ProtocolAdapter};
use crate::config::CheckConfig;
use crate::connectivity::{ConnectivityChecker, NetConnectivity};
use crate::descriptor::ProxyDescriptor;
use crate::error::{ProbeError, Result};
use crate::fetch::{HttpFetcher, TunnelFetcher};
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// What the probe observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Egress {
    /// Traffic leaves from the declared address
    Direct,
    /// Protocol cannot be probed; treated as pass-through
    Skipped,
    /// Traffic leaves from another address
    Forwarded(String),
}

#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, descriptor: &ProxyDescriptor) -> Result<Egress>;
}

pub struct EgressProber {
    adapter: Arc<dyn ProtocolAdapter>,
    fetcher: Arc<dyn HttpFetcher>,
    checker: Arc<dyn ConnectivityChecker>,
    echo_url: String,
    relay_timeout: Duration,
    connect_timeout: Duration,
}

impl EgressProber {
    /// Prober wired to the native adapter, tunnel fetcher and socket checker
    pub fn new(config: &CheckConfig) -> Self {
        Self {
            adapter: Arc::new(NativeAdapter::new(config.connect_timeout())),
            fetcher: Arc::new(TunnelFetcher::default()),
            checker: Arc::new(NetConnectivity),
            echo_url: config.echo_url.clone(),
            relay_timeout: config.relay_timeout(),
            connect_timeout: config.connect_timeout(),
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ProtocolAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn HttpFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_checker(mut self, checker: Arc<dyn ConnectivityChecker>) -> Self {
        self.checker = checker;
        self
    }

    async fn check_fallback(&self, descriptor: &ProxyDescriptor) -> Result<Egress> {
        let transport = descriptor.protocol.transport();
        let observed = self
            .checker
            .check_reachable(
                &descriptor.server,
                descriptor.port,
                transport,
                self.connect_timeout,
            )
            .await?;

        debug!(
            "{} unsupported by adapter, {transport} check answered from {observed}",
            descriptor.identifier()
        );

        // A host name cannot be compared, so the classifier leaves it unclassified
        if observed == descriptor.server {
            Ok(Egress::Direct)
        } else {
            Ok(Egress::Forwarded(observed))
        }
    }
}

#[async_trait]
impl Probe for EgressProber {
    async fn probe(&self, descriptor: &ProxyDescriptor) -> Result<Egress> {
        descriptor.validate()?;

        if descriptor.protocol.is_untestable() {
            debug!("{} skipped: transport cannot be probed", descriptor.identifier());
            return Ok(Egress::Skipped);
        }

        if !self.adapter.supports_testing(descriptor) {
            return self.check_fallback(descriptor).await;
        }

        let client = self.adapter.build_client(descriptor)?;
        let body = self
            .fetcher
            .fetch_body(client.as_ref(), &self.echo_url, self.relay_timeout)
            .await?;

        egress_from_body(&body, &descriptor.server)
    }
}

/// Interpret an echo response body
fn egress_from_body(body: &[u8], declared: &str) -> Result<Egress> {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();

    if text == declared {
        return Ok(Egress::Direct);
    }

    match text.parse::<IpAddr>() {
        Ok(_) => Ok(Egress::Forwarded(text.to_string())),
        Err(_) => Err(ProbeError::MalformedEgress(
            text.chars().take(64).collect(),
        )),
    }
}
