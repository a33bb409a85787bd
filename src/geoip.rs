//! Country and ASN enrichment for proxy and egress addresses
//!
//! Backed by MaxMind City and ASN databases plus a `flags.json` table mapping
//! ISO country codes to flag emoji.

use crate::config::GeoIpPaths;
use maxminddb::{Reader, geoip2};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use thiserror::Error;

/// Country label used when a lookup has no answer
pub const UNKNOWN_COUNTRY: &str = "🏁ZZ";

#[derive(Error, Debug)]
pub enum GeoIpError {
    #[error("failed to open {path}: {message}")]
    Open { path: String, message: String },

    #[error("invalid flags table {path}: {message}")]
    Flags { path: String, message: String },

    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },
}

/// Enrichment result for one address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoInfo {
    pub ip: IpAddr,
    /// Flag emoji followed by the ISO code, e.g. "🇯🇵JP"
    pub country: String,
    /// Shortened AS organisation, empty when unknown
    pub asn_org: String,
}

#[derive(Deserialize)]
struct CountryEmoji {
    code: String,
    emoji: String,
}

pub struct GeoIp {
    city: Reader<Vec<u8>>,
    asn: Reader<Vec<u8>>,
    flags: HashMap<String, String>,
}

impl GeoIp {
    pub fn open(paths: &GeoIpPaths) -> Result<Self, GeoIpError> {
        Ok(Self {
            city: open_reader(&paths.city_db)?,
            asn: open_reader(&paths.asn_db)?,
            flags: load_flags(&paths.flags)?,
        })
    }

    /// Resolve `ip_or_host` and look up its country and AS organisation
    pub async fn lookup(&self, ip_or_host: &str) -> Result<GeoInfo, GeoIpError> {
        let ip = resolve(ip_or_host).await?;
        Ok(self.lookup_ip(ip))
    }

    pub fn lookup_ip(&self, ip: IpAddr) -> GeoInfo {
        let country = self
            .country_code(ip)
            .and_then(|code| self.flags.get(&code).map(|emoji| format!("{emoji}{code}")))
            .unwrap_or_else(|| UNKNOWN_COUNTRY.to_string());

        let asn_org = self
            .asn_org(ip)
            .map(|org| short_asn_org(&org))
            .unwrap_or_default();

        GeoInfo {
            ip,
            country,
            asn_org,
        }
    }

    fn country_code(&self, ip: IpAddr) -> Option<String> {
        let lookup = self.city.lookup(ip).ok()?;
        let record: geoip2::Country = lookup.decode().ok()??;
        record.country.iso_code.map(|s| s.to_uppercase())
    }

    fn asn_org(&self, ip: IpAddr) -> Option<String> {
        let lookup = self.asn.lookup(ip).ok()?;
        let record: geoip2::Asn = lookup.decode().ok()??;
        record.autonomous_system_organization.map(str::to_string)
    }
}

fn open_reader(path: &Path) -> Result<Reader<Vec<u8>>, GeoIpError> {
    Reader::open_readfile(path).map_err(|e| GeoIpError::Open {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn load_flags(path: &Path) -> Result<HashMap<String, String>, GeoIpError> {
    let flags_err = |message: String| GeoIpError::Flags {
        path: path.display().to_string(),
        message,
    };

    let raw = std::fs::read_to_string(path).map_err(|e| flags_err(e.to_string()))?;
    parse_flags(&raw).map_err(flags_err)
}

fn parse_flags(raw: &str) -> Result<HashMap<String, String>, String> {
    let list: Vec<CountryEmoji> = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    Ok(list
        .into_iter()
        .map(|c| (c.code.to_uppercase(), c.emoji))
        .collect())
}

async fn resolve(ip_or_host: &str) -> Result<IpAddr, GeoIpError> {
    if let Ok(ip) = ip_or_host.parse::<IpAddr>() {
        return Ok(ip);
    }

    let resolve_err = |source| GeoIpError::Resolve {
        host: ip_or_host.to_string(),
        source,
    };

    tokio::net::lookup_host((ip_or_host, 0))
        .await
        .map_err(resolve_err)?
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| {
            resolve_err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no addresses",
            ))
        })
}

/// Known hosting-provider fragments of normalized AS organisation names
const SHORT_NAMES: &[(&str, &str)] = &[
    ("cloudflarenet", "cf"),
    ("amazon-02", "amazon"),
    ("g-corelabss.a.", "gcore"),
    ("oracle-bmc-31898", "oracle"),
    ("melbikomasuab", "melbikomas"),
    ("akamaiconnectedcloud", "akamai"),
    ("hktlimited", "hkt"),
    ("feelbsarl", "feelb"),
    ("datacamplimited", "datacamp"),
    ("starkindustriessolutionsltd", "stark"),
    ("hostkeyb.v.", "hostkey"),
    ("globalconnectivitysolutionsllp", "globalconn"),
    ("aezainternationalltd", "aeza"),
    ("sharktech", "shark"),
    ("scaleways.a.s.", "scaleway"),
    ("digitalocean-asn", "do"),
    ("as-choopa", "choopa"),
    ("sondatechs.a.s.", "sonda"),
    ("m247europesrl", "m247"),
    ("as-colocrossing", "colocross"),
    ("scloudpteltd", "scloud"),
    ("globalinternetsolutionsllc", "globalinte"),
    ("datacommunicationbusinessgroup", "datacomm"),
    ("aiyunhknetwork", "aliyunhk"),
    ("kakharovorinbassarmaratuly", "kakharovor"),
    ("hetzneronlinegmbh", "hetzner"),
    ("interhostcommunicationsolutionsltd.", "interhost"),
    ("hangzhoualibabaadvertisingco.,ltd.", "aliyun"),
    ("chinaunicomchina169backbone", "cn-unicom"),
    ("chinamobilecommunicationsgroupco.,ltd.", "cmcc-sg"),
    ("hgcglobalcommunicationslimited", "hgc"),
];

/// Shorten an AS organisation name: lowercase, drop spaces, then either a
/// known provider alias or the first 10 characters
pub fn short_asn_org(org: &str) -> String {
    let normalized: String = org
        .chars()
        .filter(|c| *c != ' ')
        .flat_map(char::to_lowercase)
        .collect();

    for (fragment, short) in SHORT_NAMES {
        if normalized.contains(fragment) {
            return short.to_string();
        }
    }

    normalized.chars().take(10).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_providers() {
        assert_eq!(short_asn_org("CLOUDFLARENET"), "cf");
        assert_eq!(short_asn_org("Hetzner Online GmbH"), "hetzner");
        assert_eq!(short_asn_org("DIGITALOCEAN-ASN"), "do");
        assert_eq!(
            short_asn_org("Hangzhou Alibaba Advertising Co.,Ltd."),
            "aliyun"
        );
    }

    #[test]
    fn test_unknown_provider_truncates() {
        assert_eq!(short_asn_org("Example Transit Networks"), "exampletra");
        assert_eq!(short_asn_org("Tiny ISP"), "tinyisp");
        assert_eq!(short_asn_org(""), "");
    }

    #[test]
    fn test_parse_flags() {
        let flags = parse_flags(r#"[{"code":"jp","emoji":"🇯🇵"},{"code":"US","emoji":"🇺🇸"}]"#)
            .unwrap();
        assert_eq!(flags.get("JP").map(String::as_str), Some("🇯🇵"));
        assert_eq!(flags.len(), 2);
        assert!(parse_flags("{}").is_err());
    }

    #[tokio::test]
    async fn test_resolve_literal_skips_dns() {
        let ip = resolve("203.0.113.5").await.unwrap();
        assert_eq!(ip, "203.0.113.5".parse::<IpAddr>().unwrap());
    }

    proptest! {
        #[test]
        fn prop_short_name_is_bounded(org in "[A-Za-z ]{0,40}") {
            let short = short_asn_org(&org);
            prop_assert!(short.chars().count() <= 10);
            prop_assert!(!short.contains(' '));
        }
    }
}
