//! Typed proxy descriptors
//!
//! Descriptors use Clash-style keys so that existing subscription exports can be
//! loaded as-is. The `type` field selects the protocol variant.

use crate::error::{ProbeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::warn;

/// One candidate proxy. Read-only for the duration of a check cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyDescriptor {
    /// Display name, not used for identity
    #[serde(default)]
    pub name: String,

    /// Explicit identifier; derived from type, server and port when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Declared address: host name or IP literal
    pub server: String,

    pub port: u16,

    #[serde(flatten)]
    pub protocol: Protocol,
}

/// Supported protocol variants and their client parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Protocol {
    Socks5 {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    Http {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    #[serde(rename = "ss")]
    Shadowsocks { cipher: String, password: String },
    Vmess {
        uuid: String,
        #[serde(rename = "alterId", default)]
        alter_id: u16,
        #[serde(default = "default_vmess_cipher")]
        cipher: String,
        #[serde(default)]
        network: Network,
    },
    Vless {
        uuid: String,
        #[serde(default)]
        network: Network,
    },
    Trojan {
        password: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sni: Option<String>,
        #[serde(default)]
        network: Network,
    },
    Hysteria2 {
        password: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sni: Option<String>,
    },
    Tuic { uuid: String, password: String },
}

fn default_vmess_cipher() -> String {
    "auto".to_string()
}

/// Stream transport carried by V2Ray-family protocols
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Tcp,
    Ws,
    H2,
    Http,
    Grpc,
}

/// Transport the server listens on, used by the raw connectivity fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => write!(f, "tcp"),
            Transport::Udp => write!(f, "udp"),
        }
    }
}

impl Protocol {
    /// Protocol tag as it appears in the `type` field
    pub fn type_name(&self) -> &'static str {
        match self {
            Protocol::Socks5 { .. } => "socks5",
            Protocol::Http { .. } => "http",
            Protocol::Shadowsocks { .. } => "ss",
            Protocol::Vmess { .. } => "vmess",
            Protocol::Vless { .. } => "vless",
            Protocol::Trojan { .. } => "trojan",
            Protocol::Hysteria2 { .. } => "hysteria2",
            Protocol::Tuic { .. } => "tuic",
        }
    }

    pub fn transport(&self) -> Transport {
        match self {
            Protocol::Hysteria2 { .. } | Protocol::Tuic { .. } => Transport::Udp,
            _ => Transport::Tcp,
        }
    }

    /// vmess over h2 blocks forever in the handshake, so it cannot be probed
    pub fn is_untestable(&self) -> bool {
        matches!(
            self,
            Protocol::Vmess {
                network: Network::H2,
                ..
            }
        )
    }
}

impl ProxyDescriptor {
    pub fn identifier(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!(
                "{}://{}:{}",
                self.protocol.type_name(),
                self.server,
                self.port
            ),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.protocol.type_name()
    }

    /// Check the fields every client builder relies on
    pub fn validate(&self) -> Result<()> {
        if self.server.trim().is_empty() {
            return Err(ProbeError::config("server is empty"));
        }
        if self.port == 0 {
            return Err(ProbeError::config(format!(
                "port is zero for {}",
                self.server
            )));
        }

        match &self.protocol {
            Protocol::Socks5 { username, password } | Protocol::Http { username, password } => {
                if username.is_some() != password.is_some() {
                    return Err(ProbeError::config(
                        "username and password must be given together",
                    ));
                }
                // RFC 1929 length fields are a single octet
                let out_of_range = |s: &String| s.is_empty() || s.len() > 255;
                if username.as_ref().is_some_and(out_of_range) {
                    return Err(ProbeError::config("username must be 1 to 255 bytes"));
                }
                if password.as_ref().is_some_and(out_of_range) {
                    return Err(ProbeError::config("password must be 1 to 255 bytes"));
                }
            }
            Protocol::Shadowsocks { cipher, password } => {
                if cipher.is_empty() || password.is_empty() {
                    return Err(ProbeError::config("shadowsocks needs cipher and password"));
                }
            }
            Protocol::Vmess { uuid, .. } | Protocol::Vless { uuid, .. } => {
                if uuid.is_empty() {
                    return Err(ProbeError::config("uuid is empty"));
                }
            }
            Protocol::Trojan { password, .. } | Protocol::Hysteria2 { password, .. } => {
                if password.is_empty() {
                    return Err(ProbeError::config("password is empty"));
                }
            }
            Protocol::Tuic { uuid, password } => {
                if uuid.is_empty() || password.is_empty() {
                    return Err(ProbeError::config("tuic needs uuid and password"));
                }
            }
        }

        Ok(())
    }

    /// Serialized form, accepted back by [`ProxyDescriptor::from_json`]
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| ProbeError::parse_with_source("failed to serialize descriptor", e))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| ProbeError::parse_with_source("failed to parse descriptor", e))
    }
}

impl fmt::Display for ProxyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.identifier())
        } else {
            write!(f, "{} ({})", self.name, self.identifier())
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProxyFile {
    Wrapped { proxies: Vec<serde_yaml::Value> },
    Bare(Vec<serde_yaml::Value>),
}

/// Parse a proxy list. YAML is a superset of JSON, so both formats load here,
/// either as a bare list or under a `proxies:` key.
///
/// Entries are converted one by one: an entry with an unknown type or missing
/// fields is logged and dropped, the rest are kept.
pub fn parse_proxy_list(raw: &str) -> Result<Vec<ProxyDescriptor>> {
    let file: ProxyFile = serde_yaml::from_str(raw)
        .map_err(|e| ProbeError::parse_with_source("failed to parse proxy list", e))?;

    let entries = match file {
        ProxyFile::Wrapped { proxies } => proxies,
        ProxyFile::Bare(proxies) => proxies,
    };

    let mut descriptors = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let name = entry
            .get("name")
            .and_then(serde_yaml::Value::as_str)
            .unwrap_or_default()
            .to_string();

        match serde_yaml::from_value::<ProxyDescriptor>(entry) {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(e) => warn!("skipping proxy #{index} {name:?}: {e}"),
        }
    }

    Ok(descriptors)
}

pub fn load_proxy_list(path: impl AsRef<Path>) -> Result<Vec<ProxyDescriptor>> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    parse_proxy_list(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn socks(server: &str, port: u16) -> ProxyDescriptor {
        ProxyDescriptor {
            name: String::new(),
            id: None,
            server: server.to_string(),
            port,
            protocol: Protocol::Socks5 {
                username: None,
                password: None,
            },
        }
    }

    #[test]
    fn test_identifier_is_derived() {
        let d = socks("203.0.113.5", 1080);
        assert_eq!(d.identifier(), "socks5://203.0.113.5:1080");

        let mut named = d.clone();
        named.id = Some("node-7".into());
        assert_eq!(named.identifier(), "node-7");
    }

    #[test]
    fn test_parse_clash_style_list() {
        let raw = r#"
proxies:
  - name: hk-01
    type: vmess
    server: 198.51.100.7
    port: 443
    uuid: 6f7a2c3e-0a1b-4c5d-8e9f-0123456789ab
    alterId: 0
    network: h2
  - name: jp-02
    type: trojan
    server: edge.example.net
    port: 443
    password: secret
  - name: local
    type: socks5
    server: 127.0.0.1
    port: 1080
"#;
        let list = parse_proxy_list(raw).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].type_name(), "vmess");
        assert!(list[0].protocol.is_untestable());
        assert!(!list[1].protocol.is_untestable());
        assert_eq!(list[2].protocol.transport(), Transport::Tcp);
    }

    #[test]
    fn test_parse_bare_json_list() {
        let raw = r#"[{"type":"hysteria2","server":"192.0.2.1","port":8443,"password":"x"}]"#;
        let list = parse_proxy_list(raw).unwrap();
        assert_eq!(list[0].protocol.transport(), Transport::Udp);
        assert_eq!(list[0].identifier(), "hysteria2://192.0.2.1:8443");
    }

    #[test]
    fn test_json_round_trip_keeps_protocol() {
        let raw = r#"{"name":"a","type":"ss","server":"192.0.2.9","port":8388,"cipher":"aes-128-gcm","password":"p"}"#;
        let d = ProxyDescriptor::from_json(raw).unwrap();
        let back = ProxyDescriptor::from_json(&d.to_json().unwrap()).unwrap();
        assert_eq!(d, back);
    }

    #[test]
    fn test_unknown_type_is_parse_error() {
        let raw = r#"{"type":"carrier-pigeon","server":"192.0.2.9","port":1}"#;
        let err = ProxyDescriptor::from_json(raw).unwrap_err();
        assert!(matches!(err, ProbeError::Parse { .. }));
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        assert!(socks("", 1080).validate().is_err());
        assert!(socks("192.0.2.1", 0).validate().is_err());

        let mut half_auth = socks("192.0.2.1", 1080);
        half_auth.protocol = Protocol::Socks5 {
            username: Some("user".into()),
            password: None,
        };
        assert!(half_auth.validate().is_err());

        assert!(socks("192.0.2.1", 1080).validate().is_ok());
    }

    #[test]
    fn test_bad_entries_are_dropped_individually() {
        let raw = r#"
proxies:
  - name: good
    type: socks5
    server: 203.0.113.5
    port: 1080
  - name: legacy
    type: ssr
    server: 203.0.113.6
    port: 443
  - name: no-uuid
    type: vmess
    server: 203.0.113.7
    port: 443
  - name: also-good
    type: http
    server: 203.0.113.8
    port: 8080
"#;
        let proxies = parse_proxy_list(raw).unwrap();
        let names: Vec<_> = proxies.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["good", "also-good"]);
    }

    #[test]
    fn test_non_list_file_is_error() {
        assert!(parse_proxy_list("proxies: 42").is_err());
    }
}
