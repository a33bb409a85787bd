use crate::adapter::{BoxedStream, ProxyClient};
use crate::error::{ProbeError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty, LengthLimitError, Limited};
use hyper::client::conn::http1::Builder;
use hyper::header::{ACCEPT, CONNECTION, HOST, USER_AGENT};
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::debug;
use url::Url;

/// Echo bodies are a single address; anything larger is not an echo response
const MAX_BODY: usize = 64 * 1024;

/// Fetch a page through a proxy client
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn fetch_body(
        &self,
        client: &dyn ProxyClient,
        url: &str,
        timeout: Duration,
    ) -> Result<Vec<u8>>;
}

/// HTTP/1.1 GET over a tunneled stream
#[derive(Debug, Clone)]
pub struct TunnelFetcher {
    user_agent: String,
}

impl Default for TunnelFetcher {
    fn default() -> Self {
        Self {
            user_agent: concat!("relaycheck/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Parts of the echo URL needed to open the tunnel and build the request
struct EchoTarget {
    host: String,
    port: u16,
    /// Host header value; carries the port when it is not the scheme default
    authority: String,
    path: String,
}

impl EchoTarget {
    fn parse(url: &str) -> Result<Self> {
        let url =
            Url::parse(url).map_err(|e| ProbeError::parse_with_source("invalid echo URL", e))?;
        if url.scheme() != "http" {
            return Err(ProbeError::config(format!(
                "unsupported echo URL scheme: {}",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| ProbeError::config("echo URL has no host"))?
            .to_string();
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.clone(),
        };
        let path = match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_string(),
        };

        Ok(Self {
            port: url.port_or_known_default().unwrap_or(80),
            host,
            authority,
            path,
        })
    }
}

#[async_trait]
impl HttpFetcher for TunnelFetcher {
    async fn fetch_body(
        &self,
        client: &dyn ProxyClient,
        url: &str,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let target = EchoTarget::parse(url)?;

        let exchange = async {
            let stream = client.connect(&target.host, target.port).await?;
            self.get(stream, &target).await
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::timeout(format!("GET {url}"), timeout)),
        }
    }
}

impl TunnelFetcher {
    async fn get(&self, stream: BoxedStream, target: &EchoTarget) -> Result<Vec<u8>> {
        let (mut sender, conn) = Builder::new()
            .handshake(TokioIo::new(stream))
            .await
            .map_err(|e| ProbeError::network_with_source("HTTP handshake failed", e))?;

        // Dropping the set aborts the connection task, including on timeout
        let mut driver = JoinSet::new();
        driver.spawn(async move {
            if let Err(e) = conn.await {
                debug!("echo connection ended: {e}");
            }
        });

        let request = Request::builder()
            .method(Method::GET)
            .uri(target.path.as_str())
            .header(HOST, target.authority.as_str())
            .header(USER_AGENT, self.user_agent.as_str())
            .header(ACCEPT, "*/*")
            .header(CONNECTION, "close")
            .body(Empty::<Bytes>::new())
            .map_err(|e| ProbeError::parse_with_source("failed to build echo request", e))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| ProbeError::network_with_source("echo request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::network(format!(
                "echo endpoint answered {status}"
            )));
        }

        let body = Limited::new(response.into_body(), MAX_BODY)
            .collect()
            .await
            .map_err(|e| {
                if e.is::<LengthLimitError>() {
                    ProbeError::parse(format!("echo body larger than {MAX_BODY} bytes"))
                } else {
                    ProbeError::network_with_source("failed to read echo body", e)
                }
            })?;

        Ok(body.to_bytes().to_vec())
    }
}
