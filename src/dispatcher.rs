//! Relay check cycle
//!
//! Fans candidates out over a [`WorkerPool`], classifies each probe result and
//! folds it into the [`StatsStore`]. The store mutation and the passing-set
//! append for one candidate happen while the store lock is held, so a
//! descriptor is only ever reported as passing once its stat is written.

use crate::classify::{Classification, classify};
use crate::config::CheckConfig;
use crate::descriptor::ProxyDescriptor;
use crate::error::{ProbeError, ProbeErrorKind};
use crate::pool::WorkerPool;
use crate::probe::{Egress, Probe};
use crate::stats::{StatMutation, StatsStore};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Per-cycle counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub direct: usize,
    pub pool: usize,
    pub relay: usize,
    /// Probe succeeded but an address could not be parsed
    pub unclassified: usize,
    /// Failures broken down by [`ProbeErrorKind`]
    pub network_errors: usize,
    pub parse_errors: usize,
    pub config_errors: usize,
}

/// Result of one cycle
#[derive(Debug, Clone)]
pub struct Cycle {
    /// Candidates whose probe completed without error, in completion order
    pub passing: Vec<ProxyDescriptor>,
    pub report: CycleReport,
    pub elapsed: Duration,
}

/// Outcome of one job, decided before the store lock is taken
enum Verdict {
    Failed(ProbeErrorKind),
    Skipped,
    Classified(Classification),
    Unclassified,
}

#[derive(Default)]
struct Accumulator {
    passing: Vec<ProxyDescriptor>,
    report: CycleReport,
}

pub struct RelayChecker {
    prober: Arc<dyn Probe>,
    pool: WorkerPool,
}

impl RelayChecker {
    pub fn new(prober: Arc<dyn Probe>, config: &CheckConfig) -> Self {
        Self {
            prober,
            pool: WorkerPool::new(config.worker_count(), config.queue_depth()),
        }
    }

    /// Probe every candidate and update `store`. Always runs to completion;
    /// per-candidate failures only show up as absence from the passing set.
    pub async fn run_cycle(
        &self,
        candidates: Vec<ProxyDescriptor>,
        store: &Arc<StatsStore>,
    ) -> Cycle {
        let started = Instant::now();
        let total = candidates.len();

        info!(
            "relay check: {total} candidates, {} workers",
            self.pool.workers()
        );

        let acc = Arc::new(Mutex::new(Accumulator::default()));
        let done = Arc::new(AtomicUsize::new(0));

        let prober = Arc::clone(&self.prober);
        let job_store = Arc::clone(store);
        let job_acc = Arc::clone(&acc);

        self.pool
            .run(candidates, move |descriptor: ProxyDescriptor| {
                let prober = Arc::clone(&prober);
                let store = Arc::clone(&job_store);
                let acc = Arc::clone(&job_acc);
                let done = Arc::clone(&done);

                async move {
                    check_one(prober, &store, &acc, descriptor).await;
                    report_progress(done.fetch_add(1, Ordering::Relaxed) + 1, total);
                }
            })
            .await;

        // Every job has finished, so the accumulator has no other owner left
        let Accumulator { passing, mut report } = std::mem::take(&mut *acc.lock());
        report.total = total;

        let elapsed = started.elapsed();
        info!(
            "relay check done in {:.1}s: {} passed ({} direct, {} pool, {} relay, {} skipped, {} unclassified), {} failed ({} network, {} parse, {} config)",
            elapsed.as_secs_f64(),
            report.passed,
            report.direct,
            report.pool,
            report.relay,
            report.skipped,
            report.unclassified,
            report.failed,
            report.network_errors,
            report.parse_errors,
            report.config_errors,
        );

        Cycle {
            passing,
            report,
            elapsed,
        }
    }
}

async fn check_one(
    prober: Arc<dyn Probe>,
    store: &StatsStore,
    acc: &Mutex<Accumulator>,
    descriptor: ProxyDescriptor,
) {
    let id = descriptor.identifier();

    // Network work happens outside any lock. The probe gets its own task so a
    // panic inside it is still recorded as a failure for this candidate.
    let probed = {
        let descriptor = descriptor.clone();
        tokio::spawn(async move { prober.probe(&descriptor).await }).await
    };
    let outcome = probed
        .unwrap_or_else(|e| Err(ProbeError::network_with_source("probe task aborted", e)));

    let (verdict, mutation) = match outcome {
        Err(e) => {
            let kind = e.kind();
            warn!("{descriptor}: probe failed ({kind}): {e}");
            (Verdict::Failed(kind), Some(StatMutation::Failure))
        }
        Ok(Egress::Skipped) => (
            Verdict::Skipped,
            Some(StatMutation::Direct {
                out_ip: descriptor.server.clone(),
            }),
        ),
        Ok(Egress::Direct) => (
            Verdict::Classified(Classification::Direct),
            Some(StatMutation::Direct {
                out_ip: descriptor.server.clone(),
            }),
        ),
        Ok(Egress::Forwarded(out_ip)) => match classify(&descriptor.server, &out_ip) {
            Ok(outcome) => {
                debug!("{descriptor}: {outcome} via {out_ip}");
                (
                    Verdict::Classified(outcome),
                    Some(StatMutation::Classified { out_ip, outcome }),
                )
            }
            Err(e) => {
                debug!("{descriptor}: cannot compare with egress {out_ip}: {e}");
                (Verdict::Unclassified, None)
            }
        },
    };

    // One critical section for both shared structures
    let mut stats = store.lock();
    if let Some(mutation) = mutation {
        stats.upsert(&id, mutation);
    }

    let mut acc = acc.lock();
    match verdict {
        Verdict::Failed(kind) => {
            acc.report.failed += 1;
            match kind {
                ProbeErrorKind::Network => acc.report.network_errors += 1,
                ProbeErrorKind::Parse => acc.report.parse_errors += 1,
                ProbeErrorKind::Configuration => acc.report.config_errors += 1,
            }
        }
        Verdict::Skipped => acc.report.skipped += 1,
        Verdict::Classified(Classification::Direct) => acc.report.direct += 1,
        Verdict::Classified(Classification::Pool) => acc.report.pool += 1,
        Verdict::Classified(Classification::Relay) => acc.report.relay += 1,
        Verdict::Unclassified => acc.report.unclassified += 1,
    }
    if !matches!(verdict, Verdict::Failed(_)) {
        acc.report.passed += 1;
        acc.passing.push(descriptor);
    }
}

/// Log each time another 20% of the cycle completes
fn report_progress(done: usize, total: usize) {
    if total == 0 {
        return;
    }
    let step = |n: usize| n * 5 / total;
    if step(done) > step(done - 1) {
        info!("relay check progress: {}% ({done}/{total})", done * 100 / total);
    }
}

