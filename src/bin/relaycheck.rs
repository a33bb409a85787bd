use anyhow::{Context, Result, bail};
use clap::Parser;
use relaycheck::geoip::GeoIp;
use relaycheck::{
    CheckConfig, Classification, CycleReport, EgressProber, RelayChecker, Stat, StatsStore,
    load_proxy_list,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Classify proxies as direct, pool, or relay", long_about = None)]
struct Args {
    /// Proxy list (YAML or JSON)
    #[arg(short, long)]
    proxies: PathBuf,

    /// Check settings (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of concurrent probes
    #[arg(short, long)]
    workers: Option<usize>,

    /// Relay fetch timeout in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Plain-text page that echoes the caller's address
    #[arg(long)]
    echo_url: Option<String>,

    /// Number of check cycles to run over the list
    #[arg(long, default_value_t = 1)]
    cycles: u32,

    /// Print stats as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct Summary<'a> {
    report: &'a CycleReport,
    stats: &'a [Stat],
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse args
    let args = Args::parse();

    // Initialize tracing subscriber; RUST_LOG wins over -v
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if args.cycles == 0 {
        bail!("[ERR] --cycles must be at least 1");
    }

    // Config file first, then flag overrides
    let mut config = match &args.config {
        Some(path) => CheckConfig::load(path)?,
        None => CheckConfig::default(),
    };
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(timeout) = args.timeout {
        config.relay_timeout_secs = timeout;
    }
    if let Some(echo_url) = args.echo_url {
        config.echo_url = echo_url;
    }

    let proxies = load_proxy_list(&args.proxies)
        .with_context(|| format!("[ERR] failed to load {}", args.proxies.display()))?;
    info!("Loaded {} proxies from {}", proxies.len(), args.proxies.display());

    // Instantiate checker and the store shared by every cycle
    let checker = RelayChecker::new(Arc::new(EgressProber::new(&config)), &config);
    let store = Arc::new(StatsStore::new());

    let mut report = CycleReport::default();
    for cycle in 1..=args.cycles {
        info!("Starting cycle {cycle}/{}", args.cycles);
        report = checker.run_cycle(proxies.clone(), &store).await.report;
    }

    let stats = store.snapshot();

    if args.json {
        let summary = Summary {
            report: &report,
            stats: &stats,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    // GeoIP is optional; a broken database only costs the enrichment
    let geoip = match &config.geoip {
        Some(paths) => match GeoIp::open(paths) {
            Ok(geoip) => Some(geoip),
            Err(e) => {
                warn!("GeoIP disabled: {e}");
                None
            }
        },
        None => None,
    };

    for stat in &stats {
        let class = stat.classification();
        let mut line = format!("{class:<6} {:<40} {}", stat.id, stat.out_ip);

        if let (Classification::Relay, Some(geoip)) = (class, &geoip) {
            match geoip.lookup(&stat.out_ip).await {
                Ok(info) => line.push_str(&format!(" {} {}", info.country, info.asn_org)),
                Err(e) => warn!("{}: {e}", stat.id),
            }
        }

        println!("{line}");
    }

    println!(
        "{} proxies: {} passed ({} direct, {} pool, {} relay), {} failed ({} network, {} parse, {} config)",
        report.total,
        report.passed,
        report.direct,
        report.pool,
        report.relay,
        report.failed,
        report.network_errors,
        report.parse_errors,
        report.config_errors
    );

    Ok(())
}
