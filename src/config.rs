use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings for one relay check cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    /// Maximum number of probes in flight
    pub workers: usize,

    /// Job queue capacity; derived from `workers` when unset
    pub queue_depth: Option<usize>,

    /// Bound on one egress fetch through a proxy
    pub relay_timeout_secs: u64,

    /// Bound on a single TCP connect or UDP resolve
    pub connect_timeout_secs: u64,

    /// Page that answers with the caller's address as plain text
    pub echo_url: String,

    pub geoip: Option<GeoIpPaths>,
}

/// Locations of the MaxMind databases and the country flag table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoIpPaths {
    pub city_db: PathBuf,
    pub asn_db: PathBuf,
    pub flags: PathBuf,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            workers: 50,
            queue_depth: None,
            relay_timeout_secs: 10,
            connect_timeout_secs: 5,
            echo_url: "http://ipinfo.io/ip".to_string(),
            geoip: None,
        }
    }
}

impl CheckConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_yaml(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        Ok(config)
    }

    /// Worker count, never below one
    pub fn worker_count(&self) -> usize {
        self.workers.max(1)
    }

    /// Queue capacity: one slot for small pools, a third of the workers otherwise
    pub fn queue_depth(&self) -> usize {
        match self.queue_depth {
            Some(depth) => depth.max(1),
            None => {
                let workers = self.worker_count();
                if workers > 4 { (workers + 2) / 3 } else { 1 }
            }
        }
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.relay_timeout_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CheckConfig::default();
        assert_eq!(config.worker_count(), 50);
        assert_eq!(config.queue_depth(), 17);
        assert_eq!(config.relay_timeout(), Duration::from_secs(10));
        assert_eq!(config.echo_url, "http://ipinfo.io/ip");
    }

    #[test]
    fn test_small_pool_queue_depth() {
        let config = CheckConfig {
            workers: 3,
            ..Default::default()
        };
        assert_eq!(config.queue_depth(), 1);

        let zero = CheckConfig {
            workers: 0,
            ..Default::default()
        };
        assert_eq!(zero.worker_count(), 1);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = CheckConfig::from_yaml(
            r#"
workers: 8
relay_timeout_secs: 3
geoip:
  city_db: assets/GeoLite2-City.mmdb
  asn_db: assets/GeoLite2-ASN.mmdb
  flags: assets/flags.json
"#,
        )
        .unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.queue_depth(), 3);
        assert_eq!(config.relay_timeout(), Duration::from_secs(3));
        assert_eq!(config.connect_timeout_secs, 5);
        assert!(config.geoip.is_some());
    }
}
