use crate::adapter::{BoxedStream, ProxyClient, dial_tcp};
use crate::error::{ProbeError, Result};
use async_trait::async_trait;
use base64::Engine;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

/// Upper bound on the CONNECT status line plus headers
const MAX_RESPONSE_HEAD: u64 = 16 * 1024;

/// HTTP proxy client that opens tunnels with `CONNECT`
pub struct HttpConnectClient {
    pub server: String,
    pub port: u16,
    credentials: Option<(String, String)>,
    connect_timeout: Duration,
}

impl HttpConnectClient {
    pub fn new(server: impl Into<String>, port: u16, connect_timeout: Duration) -> Self {
        Self {
            server: server.into(),
            port,
            credentials: None,
            connect_timeout,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<(String, String)>) -> Self {
        self.credentials = credentials;
        self
    }

    fn connect_request(&self, host: &str, port: u16) -> String {
        let target = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        };

        let mut request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
        if let Some((user, pass)) = &self.credentials {
            let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
            request.push_str(&format!("Proxy-Authorization: Basic {encoded}\r\n"));
        }
        request.push_str("\r\n");
        request
    }
}

#[async_trait]
impl ProxyClient for HttpConnectClient {
    async fn connect(&self, host: &str, port: u16) -> Result<BoxedStream> {
        let mut stream = dial_tcp(&self.server, self.port, self.connect_timeout).await?;

        stream
            .write_all(self.connect_request(host, port).as_bytes())
            .await
            .map_err(|e| ProbeError::network_with_source("failed to send CONNECT", e))?;

        // Keep the reader: anything it buffered past the headers belongs to the tunnel
        let mut reader = BufReader::new(stream);
        read_connect_head(&mut reader).await?;

        Ok(Box::new(reader))
    }
}

/// Read the CONNECT status line and headers, failing on a non-2xx status.
/// The head is capped at `MAX_RESPONSE_HEAD` bytes.
async fn read_connect_head<R>(reader: &mut R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = reader.take(MAX_RESPONSE_HEAD);

    let mut status_line = String::new();
    head.read_line(&mut status_line)
        .await
        .map_err(|e| ProbeError::network_with_source("failed to read CONNECT response", e))?;

    let status = status_line.split_whitespace().nth(1).unwrap_or_default();
    if !status_line.starts_with("HTTP/") || !status.starts_with('2') {
        return Err(ProbeError::network(format!(
            "CONNECT failed: {}",
            status_line.trim()
        )));
    }

    loop {
        let mut line = String::new();
        let n = head
            .read_line(&mut line)
            .await
            .map_err(|e| ProbeError::network_with_source("failed to read CONNECT headers", e))?;
        if n == 0 {
            return Err(ProbeError::network(
                "proxy closed or overran the limit during CONNECT headers",
            ));
        }
        if line == "\r\n" || line == "\n" {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_request_plain() {
        let client = HttpConnectClient::new("192.0.2.1", 8080, Duration::from_secs(1));
        assert_eq!(
            client.connect_request("ipinfo.io", 80),
            "CONNECT ipinfo.io:80 HTTP/1.1\r\nHost: ipinfo.io:80\r\n\r\n"
        );
    }

    #[test]
    fn test_connect_request_auth_and_ipv6() {
        let client = HttpConnectClient::new("192.0.2.1", 8080, Duration::from_secs(1))
            .with_credentials(Some(("user".into(), "pass".into())));
        let req = client.connect_request("2001:db8::1", 80);
        assert!(req.starts_with("CONNECT [2001:db8::1]:80 HTTP/1.1\r\n"));
        // base64("user:pass")
        assert!(req.contains("Proxy-Authorization: Basic dXNlcjpwYXNz\r\n"));
    }

    #[tokio::test]
    async fn test_connect_head_leaves_tunnel_bytes() {
        let mut reader: &[u8] = b"HTTP/1.1 200 Connection established\r\nVia: test\r\n\r\nHTTP/1.1 200 OK";
        read_connect_head(&mut reader).await.unwrap();
        assert_eq!(reader, b"HTTP/1.1 200 OK");
    }

    #[tokio::test]
    async fn test_connect_head_rejects_non_2xx() {
        let mut reader: &[u8] = b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n";
        let err = read_connect_head(&mut reader).await.unwrap_err();
        assert!(err.to_string().contains("407"));
    }

    #[tokio::test]
    async fn test_connect_head_is_bounded() {
        let mut head = b"HTTP/1.1 200 OK\r\nX-Filler: ".to_vec();
        head.extend(std::iter::repeat_n(b'a', MAX_RESPONSE_HEAD as usize * 2));
        let mut reader: &[u8] = &head;
        assert!(read_connect_head(&mut reader).await.is_err());
    }
}
