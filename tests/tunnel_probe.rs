use relaycheck::{
    CheckConfig, Classification, Egress, EgressProber, Probe, Protocol, ProxyDescriptor,
    RelayChecker, StatsStore,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Echo endpoint that always answers with `body`
async fn spawn_echo(body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut reader = BufReader::new(stream);
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.unwrap_or(0) == 0 || line == "\r\n" {
                        break;
                    }
                }
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let mut stream = reader.into_inner();
                stream.write_all(response.as_bytes()).await.ok();
                stream.shutdown().await.ok();
            });
        }
    });

    addr
}

/// Minimal SOCKS5 server: CONNECT only, optional username/password
async fn spawn_socks5(credentials: Option<(&'static str, &'static str)>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(socks5_session(stream, credentials));
        }
    });

    addr
}

async fn socks5_session(mut client: TcpStream, credentials: Option<(&str, &str)>) {
    // Greeting
    let mut head = [0u8; 2];
    client.read_exact(&mut head).await.unwrap();
    let mut methods = vec![0u8; head[1] as usize];
    client.read_exact(&mut methods).await.unwrap();

    match credentials {
        Some((user, pass)) => {
            client.write_all(&[0x05, 0x02]).await.unwrap();

            let mut ver_len = [0u8; 2];
            client.read_exact(&mut ver_len).await.unwrap();
            let mut username = vec![0u8; ver_len[1] as usize];
            client.read_exact(&mut username).await.unwrap();
            let mut plen = [0u8; 1];
            client.read_exact(&mut plen).await.unwrap();
            let mut password = vec![0u8; plen[0] as usize];
            client.read_exact(&mut password).await.unwrap();

            let ok = username == user.as_bytes() && password == pass.as_bytes();
            client.write_all(&[0x01, if ok { 0x00 } else { 0x01 }]).await.unwrap();
            if !ok {
                return;
            }
        }
        None => client.write_all(&[0x05, 0x00]).await.unwrap(),
    }

    // Request
    let mut req = [0u8; 4];
    client.read_exact(&mut req).await.unwrap();
    let host = match req[3] {
        0x01 => {
            let mut ip = [0u8; 4];
            client.read_exact(&mut ip).await.unwrap();
            std::net::Ipv4Addr::from(ip).to_string()
        }
        0x03 => {
            let mut len = [0u8; 1];
            client.read_exact(&mut len).await.unwrap();
            let mut name = vec![0u8; len[0] as usize];
            client.read_exact(&mut name).await.unwrap();
            String::from_utf8(name).unwrap()
        }
        other => panic!("unexpected address type {other}"),
    };
    let mut port = [0u8; 2];
    client.read_exact(&mut port).await.unwrap();
    let port = u16::from_be_bytes(port);

    let Ok(mut upstream) = TcpStream::connect((host.as_str(), port)).await else {
        client
            .write_all(&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
            .await
            .ok();
        return;
    };

    client
        .write_all(&[0x05, 0x00, 0x00, 0x01, 127, 0, 0, 1, 0x04, 0x38])
        .await
        .unwrap();
    tokio::io::copy_bidirectional(&mut client, &mut upstream)
        .await
        .ok();
}

/// Minimal HTTP CONNECT proxy
async fn spawn_http_connect() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut reader = BufReader::new(stream);
                let mut request_line = String::new();
                reader.read_line(&mut request_line).await.unwrap();
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.unwrap_or(0) == 0 || line == "\r\n" {
                        break;
                    }
                }

                let target = request_line.split_whitespace().nth(1).unwrap().to_string();
                let mut client = reader.into_inner();
                let Ok(mut upstream) = TcpStream::connect(target.as_str()).await else {
                    client
                        .write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n")
                        .await
                        .ok();
                    return;
                };

                client
                    .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                    .await
                    .unwrap();
                tokio::io::copy_bidirectional(&mut client, &mut upstream)
                    .await
                    .ok();
            });
        }
    });

    addr
}

fn config_for(echo: SocketAddr) -> CheckConfig {
    CheckConfig {
        workers: 4,
        relay_timeout_secs: 5,
        connect_timeout_secs: 2,
        echo_url: format!("http://{echo}/ip"),
        ..Default::default()
    }
}

fn socks(proxy: SocketAddr, username: Option<&str>, password: Option<&str>) -> ProxyDescriptor {
    ProxyDescriptor {
        name: "socks".into(),
        id: None,
        server: proxy.ip().to_string(),
        port: proxy.port(),
        protocol: Protocol::Socks5 {
            username: username.map(str::to_string),
            password: password.map(str::to_string),
        },
    }
}

fn http(proxy: SocketAddr) -> ProxyDescriptor {
    ProxyDescriptor {
        name: "http".into(),
        id: None,
        server: proxy.ip().to_string(),
        port: proxy.port(),
        protocol: Protocol::Http {
            username: None,
            password: None,
        },
    }
}

#[tokio::test]
async fn socks5_tunnel_reports_forwarded_egress() {
    let echo = spawn_echo("198.51.100.20\n").await;
    let proxy = spawn_socks5(None).await;

    let prober = EgressProber::new(&config_for(echo));
    let egress = prober.probe(&socks(proxy, None, None)).await.unwrap();

    assert_eq!(egress, Egress::Forwarded("198.51.100.20".into()));
}

#[tokio::test]
async fn socks5_with_credentials() {
    let echo = spawn_echo("127.0.0.1").await;
    let proxy = spawn_socks5(Some(("alice", "secret"))).await;
    let prober = EgressProber::new(&config_for(echo));

    let egress = prober
        .probe(&socks(proxy, Some("alice"), Some("secret")))
        .await
        .unwrap();
    assert_eq!(egress, Egress::Direct);

    let rejected = prober
        .probe(&socks(proxy, Some("alice"), Some("wrong")))
        .await;
    assert!(rejected.is_err());
}

#[tokio::test]
async fn http_connect_tunnel_reports_egress() {
    let echo = spawn_echo("127.0.0.9").await;
    let proxy = spawn_http_connect().await;

    let prober = EgressProber::new(&config_for(echo));
    let egress = prober.probe(&http(proxy)).await.unwrap();

    assert_eq!(egress, Egress::Forwarded("127.0.0.9".into()));
}

#[tokio::test]
async fn non_address_body_is_an_error() {
    let echo = spawn_echo("<html>rate limited</html>").await;
    let proxy = spawn_socks5(None).await;

    let prober = EgressProber::new(&config_for(echo));
    assert!(prober.probe(&socks(proxy, None, None)).await.is_err());
}

#[tokio::test]
async fn refused_proxy_is_an_error() {
    let echo = spawn_echo("198.51.100.20").await;

    // Bind then drop to get a port with nothing behind it
    let closed = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();

    let prober = EgressProber::new(&config_for(echo));
    assert!(prober.probe(&socks(closed, None, None)).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_cycle_over_real_tunnels() {
    let relay_echo = spawn_echo("198.51.100.20").await;
    let socks_proxy = spawn_socks5(None).await;
    let http_proxy = spawn_http_connect().await;

    let config = config_for(relay_echo);
    let checker = RelayChecker::new(Arc::new(EgressProber::new(&config)), &config);
    let store = Arc::new(StatsStore::new());

    let candidates = vec![socks(socks_proxy, None, None), http(http_proxy)];
    let cycle = checker.run_cycle(candidates, &store).await;

    assert_eq!(cycle.passing.len(), 2);
    assert_eq!(cycle.report.relay, 2);
    for stat in store.snapshot() {
        assert_eq!(stat.classification(), Classification::Relay);
        assert_eq!(stat.out_ip, "198.51.100.20");
    }
}
