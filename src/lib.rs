//! Proxy egress classification
//!
//! Probes each proxy in a list, learns which address its traffic actually
//! leaves from, and records whether the proxy is direct, part of a pool, or a
//! relay in front of another network.
//!
//! - Features:
//!     - Echo fetch tunneled through SOCKS5 and HTTP CONNECT proxies
//!     - TCP/UDP reachability fallback for protocols without a native client
//!     - /16 network comparison for IPv4 (/32 for IPv6)
//!     - Bounded worker pool with a per-cycle barrier
//!     - Identifier-keyed stats that survive across cycles
//!     - Optional country and ASN enrichment from MaxMind databases
//!
//! # Example
//! ```no_run
//! use relaycheck::{CheckConfig, EgressProber, RelayChecker, StatsStore, load_proxy_list};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CheckConfig::default();
//!     let proxies = load_proxy_list("proxies.yaml")?;
//!
//!     let checker = RelayChecker::new(Arc::new(EgressProber::new(&config)), &config);
//!     let store = Arc::new(StatsStore::new());
//!
//!     let cycle = checker.run_cycle(proxies, &store).await;
//!     println!("{} of {} passed", cycle.report.passed, cycle.report.total);
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod classify;
pub mod config;
pub mod connectivity;
pub mod descriptor;
pub mod dispatcher;
pub mod error;
pub mod fetch;
pub mod geoip;
pub mod http_connect;
pub mod pool;
pub mod probe;
pub mod socks5;
pub mod stats;

// Re-export main types at crate root for convenience
pub use adapter::{NativeAdapter, ProtocolAdapter, ProxyClient};
pub use classify::{Classification, classify};
pub use config::CheckConfig;
pub use descriptor::{Protocol, ProxyDescriptor, load_proxy_list, parse_proxy_list};
pub use dispatcher::{Cycle, CycleReport, RelayChecker};
pub use error::{ProbeError, ProbeErrorKind};
pub use probe::{Egress, EgressProber, Probe};
pub use stats::{Stat, StatsStore};
