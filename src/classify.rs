//! Pool/relay heuristic
//!
//! Hosting providers commonly put many machines behind one outbound NAT block,
//! so an egress address that differs from the declared one but stays inside
//! the same coarse prefix is read as a shared pool. Leaving that prefix is read
//! as a relay hop. This is a heuristic: it has no false-positive guarantee and
//! is weakest outside typical provider allocations.

use ipnet::{Ipv4Net, Ipv6Net};
use serde::Serialize;
use std::fmt;
use std::net::{AddrParseError, IpAddr};

/// IPv4 prefix compared when telling pool from relay
pub const POOL_PREFIX_V4: u8 = 16;

/// IPv6 prefix compared when telling pool from relay
pub const POOL_PREFIX_V6: u8 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// Egress is the declared address
    Direct,
    /// Same coarse network, different address
    Pool,
    /// Different network
    Relay,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Classification::Direct => "direct",
            Classification::Pool => "pool",
            Classification::Relay => "relay",
        })
    }
}

/// Compare a declared address with the observed egress address.
///
/// IPv4-mapped IPv6 addresses are treated as IPv4. Mixed families are a relay.
pub fn classify(declared: &str, egress: &str) -> Result<Classification, AddrParseError> {
    let declared = normalize(declared.trim().parse()?);
    let egress = normalize(egress.trim().parse()?);

    if declared == egress {
        return Ok(Classification::Direct);
    }

    let same_network = match (declared, egress) {
        (IpAddr::V4(a), IpAddr::V4(b)) => {
            Ipv4Net::new(a, POOL_PREFIX_V4).map(|n| n.trunc()).ok()
                == Ipv4Net::new(b, POOL_PREFIX_V4).map(|n| n.trunc()).ok()
        }
        (IpAddr::V6(a), IpAddr::V6(b)) => {
            Ipv6Net::new(a, POOL_PREFIX_V6).map(|n| n.trunc()).ok()
                == Ipv6Net::new(b, POOL_PREFIX_V6).map(|n| n.trunc()).ok()
        }
        _ => false,
    };

    Ok(if same_network {
        Classification::Pool
    } else {
        Classification::Relay
    })
}

fn normalize(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}
