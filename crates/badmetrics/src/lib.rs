//! Bad-metric store
//!
//! Keeps a bounded, per-metric record of recently rejected lines so an
//! operator can ask "why is my metric not showing up?" without grepping
//! logs. Insert-only from the relay's point of view; entries age out after
//! `max_age`.
//!
//! Inserts come from every ingest task concurrently, so the store is one
//! mutex around a map with strictly bounded work per call: a push, a
//! per-metric cap check, and an occasional amortized prune.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Rejected lines kept per metric id.
const PER_METRIC_CAP: usize = 10;

/// Inserts between amortized prune passes.
const PRUNE_EVERY: u64 = 1024;

/// One rejected line.
#[derive(Debug, Clone)]
struct Record {
    at: SystemTime,
    line: Vec<u8>,
    reason: String,
}

/// Serializable view of one rejected line.
#[derive(Debug, Clone, Serialize)]
pub struct BadMetricRecord {
    /// The offending metric id (lossy UTF-8).
    pub metric: String,
    /// The raw rejected line (lossy UTF-8).
    pub line: String,
    /// Validation failure reason.
    pub reason: String,
    /// Unix timestamp of the rejection, seconds.
    pub seen_at: u64,
}

struct Inner {
    records: HashMap<Vec<u8>, Vec<Record>>,
    inserts: u64,
}

/// Concurrent store of recently rejected lines.
pub struct BadMetrics {
    max_age: Duration,
    inner: Mutex<Inner>,
}

impl BadMetrics {
    /// Create a store that forgets entries older than `max_age`.
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            inner: Mutex::new(Inner {
                records: HashMap::new(),
                inserts: 0,
            }),
        }
    }

    /// Record one rejected line.
    pub fn add(&self, metric: &[u8], line: &[u8], reason: &str) {
        let now = SystemTime::now();
        let mut guard = self.inner.lock().expect("badmetrics lock");
        let inner = &mut *guard;

        let records = inner.records.entry(metric.to_vec()).or_default();
        records.push(Record {
            at: now,
            line: line.to_vec(),
            reason: reason.to_string(),
        });
        if records.len() > PER_METRIC_CAP {
            records.remove(0);
        }

        inner.inserts += 1;
        if inner.inserts % PRUNE_EVERY == 0 {
            prune(&mut inner.records, now, self.max_age);
        }
    }

    /// All entries younger than `max_age`, newest first.
    pub fn snapshot(&self) -> Vec<BadMetricRecord> {
        let now = SystemTime::now();
        let mut inner = self.inner.lock().expect("badmetrics lock");
        prune(&mut inner.records, now, self.max_age);

        let mut out: Vec<BadMetricRecord> = inner
            .records
            .iter()
            .flat_map(|(metric, records)| {
                records.iter().map(|r| BadMetricRecord {
                    metric: String::from_utf8_lossy(metric).into_owned(),
                    line: String::from_utf8_lossy(&r.line).into_owned(),
                    reason: r.reason.clone(),
                    seen_at: r
                        .at
                        .duration_since(UNIX_EPOCH)
                        .map(|d| d.as_secs())
                        .unwrap_or(0),
                })
            })
            .collect();

        out.sort_by(|a, b| b.seen_at.cmp(&a.seen_at));
        out
    }

    /// Number of distinct metric ids currently recorded.
    pub fn metric_count(&self) -> usize {
        self.inner.lock().expect("badmetrics lock").records.len()
    }
}

fn prune(records: &mut HashMap<Vec<u8>, Vec<Record>>, now: SystemTime, max_age: Duration) {
    records.retain(|_, list| {
        list.retain(|r| {
            now.duration_since(r.at)
                .map(|age| age <= max_age)
                .unwrap_or(true)
        });
        !list.is_empty()
    });
}
