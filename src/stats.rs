//! Per-proxy outcome records
//!
//! The store keeps one [`Stat`] per identifier, in first-seen order. Every
//! read-modify-write goes through a [`StatsGuard`], so deciding "create or
//! update" and applying the change happen in one critical section.

use crate::classify::Classification;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stat {
    pub id: String,
    /// Last observed egress address
    pub out_ip: String,
    /// Egress is on a different network than the declared address
    pub relay: bool,
    /// Egress shares the declared address's network but differs
    pub pool: bool,
    /// Owned by the latency checker; zero marks the proxy dead
    pub delay_score: u32,
}

impl Stat {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            out_ip: String::new(),
            relay: false,
            pool: false,
            delay_score: 0,
        }
    }

    pub fn classification(&self) -> Classification {
        match (self.relay, self.pool) {
            (true, _) => Classification::Relay,
            (false, true) => Classification::Pool,
            (false, false) => Classification::Direct,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatMutation {
    /// Probe failed: zero the delay score, keep everything else
    Failure,
    /// No forwarding observed
    Direct { out_ip: String },
    Classified {
        out_ip: String,
        outcome: Classification,
    },
}

/// What an upsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
    /// A failure for an identifier that was never probed successfully
    Ignored,
}

#[derive(Debug, Default)]
struct StatsTable {
    stats: Vec<Stat>,
    index: HashMap<String, usize>,
}

/// Identifier-keyed stats shared across check cycles
#[derive(Debug, Default)]
pub struct StatsStore {
    table: Mutex<StatsTable>,
}

/// Exclusive access to the store for the lifetime of the guard
pub struct StatsGuard<'a> {
    table: MutexGuard<'a, StatsTable>,
}

impl StatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the store's critical section
    pub fn lock(&self) -> StatsGuard<'_> {
        StatsGuard {
            table: self.table.lock(),
        }
    }

    pub fn upsert(&self, id: &str, mutation: StatMutation) -> Upsert {
        self.lock().upsert(id, mutation)
    }

    pub fn find(&self, id: &str) -> Option<Stat> {
        self.lock().find(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.table.lock().stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every stat in first-seen order
    pub fn snapshot(&self) -> Vec<Stat> {
        self.table.lock().stats.clone()
    }

    /// Hook for the latency checker. Returns false when the id is unknown.
    pub fn update_delay(&self, id: &str, delay_score: u32) -> bool {
        let mut guard = self.lock();
        match guard.find_mut(id) {
            Some(stat) => {
                stat.delay_score = delay_score;
                true
            }
            None => false,
        }
    }

    /// Egress addresses shared by at least `min_members` pool or relay stats,
    /// with the identifiers behind each one
    pub fn shared_egress(&self, min_members: usize) -> BTreeMap<String, Vec<String>> {
        let table = self.table.lock();

        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for stat in table.stats.iter().filter(|s| s.relay || s.pool) {
            groups
                .entry(stat.out_ip.clone())
                .or_default()
                .push(stat.id.clone());
        }

        groups.retain(|_, ids| ids.len() >= min_members.max(1));
        groups
    }
}

impl StatsGuard<'_> {
    pub fn find(&self, id: &str) -> Option<&Stat> {
        self.table.index.get(id).map(|&i| &self.table.stats[i])
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut Stat> {
        let i = *self.table.index.get(id)?;
        Some(&mut self.table.stats[i])
    }

    /// Apply `mutation` to the stat for `id`, creating it on first success
    pub fn upsert(&mut self, id: &str, mutation: StatMutation) -> Upsert {
        if let Some(stat) = self.find_mut(id) {
            apply(stat, mutation);
            return Upsert::Updated;
        }

        if mutation == StatMutation::Failure {
            return Upsert::Ignored;
        }

        let mut stat = Stat::new(id);
        apply(&mut stat, mutation);

        let table = &mut *self.table;
        table.index.insert(id.to_string(), table.stats.len());
        table.stats.push(stat);
        Upsert::Created
    }

    pub fn record_failure(&mut self, id: &str) -> Upsert {
        self.upsert(id, StatMutation::Failure)
    }

    pub fn record_direct(&mut self, id: &str, out_ip: &str) -> Upsert {
        self.upsert(
            id,
            StatMutation::Direct {
                out_ip: out_ip.to_string(),
            },
        )
    }

    pub fn record_classified(&mut self, id: &str, out_ip: &str, outcome: Classification) -> Upsert {
        self.upsert(
            id,
            StatMutation::Classified {
                out_ip: out_ip.to_string(),
                outcome,
            },
        )
    }
}

fn apply(stat: &mut Stat, mutation: StatMutation) {
    match mutation {
        StatMutation::Failure => stat.delay_score = 0,
        StatMutation::Direct { out_ip }
        | StatMutation::Classified {
            out_ip,
            outcome: Classification::Direct,
        } => {
            stat.out_ip = out_ip;
            stat.relay = false;
            stat.pool = false;
        }
        StatMutation::Classified { out_ip, outcome } => {
            stat.out_ip = out_ip;
            stat.relay = outcome == Classification::Relay;
            stat.pool = outcome == Classification::Pool;
        }
    }
}
