//! Process-wide statistics.
//!
//! [`Stats`] is a cloneable handle shared by every virtual user of a run. Each
//! logical name owns its own [`EndpointAggregate`] behind a short-lived
//! `parking_lot` mutex, so users recording different names never contend and
//! users recording the same name only serialize for the duration of a
//! histogram increment. No lock is ever held across an `.await`.
use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    aggregate::{Aggregate, EndpointAggregate},
    metric::{Metric, RequestOutcome},
};

/// Percentiles reported for every logical name.
pub const REPORTED_PERCENTILES: [f64; 4] = [50.0, 90.0, 95.0, 99.0];

#[derive(Default)]
struct Inner {
    endpoints: DashMap<String, Mutex<EndpointAggregate>>,
    skipped: DashMap<String, AtomicU64>,
}

#[derive(Clone, Default)]
pub struct Stats {
    inner: Arc<Inner>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one outcome into the aggregate for its logical name.
    pub fn record(&self, outcome: &RequestOutcome) {
        if let Some(agg) = self.inner.endpoints.get(outcome.name()) {
            agg.lock().consume(outcome);
            return;
        }
        self.inner
            .endpoints
            .entry(outcome.name().to_string())
            .or_insert_with(|| Mutex::new(EndpointAggregate::new()))
            .lock()
            .consume(outcome);
    }

    /// Counts an action that did not run for lack of a prerequisite. Skips are
    /// kept apart from request counts so they never show up as failures.
    pub fn record_skip(&self, action: &str) {
        if let Some(n) = self.inner.skipped.get(action) {
            n.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.inner
            .skipped
            .entry(action.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Reads every aggregate without disturbing recording.
    ///
    /// Each name is internally consistent; names are read one after another,
    /// so the snapshot as a whole is not a single point in time.
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut total = EndpointAggregate::new();
        let mut endpoints = BTreeMap::new();
        for entry in self.inner.endpoints.iter() {
            let agg = entry.value().lock().clone();
            endpoints.insert(entry.key().clone(), EndpointStats::from(&agg));
            total.merge(agg);
        }
        let skipped = self
            .inner
            .skipped
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();

        StatsSnapshot {
            endpoints,
            total: EndpointStats::from(&total),
            skipped,
        }
    }

    /// Drops every aggregate. Only meant for explicit operator resets, e.g.
    /// discarding a warm-up period.
    pub fn reset(&self) {
        self.inner.endpoints.clear();
        self.inner.skipped.clear();
    }
}

impl std::fmt::Debug for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stats")
            .field("endpoints", &self.inner.endpoints.len())
            .finish()
    }
}

/// Latency distribution in microseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub min_us: u64,
    pub max_us: u64,
    pub mean_us: u64,
    /// `(percentile, value)` pairs for [`REPORTED_PERCENTILES`].
    pub percentiles: Vec<(f64, u64)>,
}

impl LatencySummary {
    pub fn percentile(&self, p: f64) -> Option<u64> {
        self.percentiles
            .iter()
            .find(|(q, _)| (*q - p).abs() < f64::EPSILON)
            .map(|(_, v)| *v)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointStats {
    pub count: u64,
    pub successes: u64,
    pub failures: u64,
    pub failure_reasons: BTreeMap<String, u64>,
    pub latency: LatencySummary,
    pub total_bytes: u64,
}

impl EndpointStats {
    pub fn failure_ratio(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.failures as f64 / self.count as f64
        }
    }
}

impl From<&EndpointAggregate> for EndpointStats {
    fn from(agg: &EndpointAggregate) -> Self {
        let hist = &agg.latency_us;
        let latency = if agg.count == 0 {
            LatencySummary::default()
        } else {
            LatencySummary {
                min_us: hist.min(),
                max_us: hist.max(),
                mean_us: (agg.total_latency_us / agg.count as u128) as u64,
                percentiles: REPORTED_PERCENTILES
                    .iter()
                    .map(|p| (*p, hist.value_at_percentile(*p)))
                    .collect(),
            }
        };
        Self {
            count: agg.count,
            successes: agg.successes,
            failures: agg.failures,
            failure_reasons: agg
                .failure_reasons
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            latency,
            total_bytes: agg.total_bytes,
        }
    }
}

/// Point-in-time view of a [`Stats`] handle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub endpoints: BTreeMap<String, EndpointStats>,
    /// Every name merged together.
    pub total: EndpointStats,
    /// Actions that skipped for lack of a prerequisite, by action name.
    pub skipped: BTreeMap<String, u64>,
}

impl StatsSnapshot {
    pub fn get(&self, name: &str) -> Option<&EndpointStats> {
        self.endpoints.get(name)
    }

    pub fn skipped(&self, action: &str) -> u64 {
        self.skipped.get(action).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn snapshot_of_empty_stats_is_empty() {
        let snap = Stats::new().snapshot();
        assert!(snap.endpoints.is_empty());
        assert_eq!(snap.total.count, 0);
        assert_eq!(snap.total.latency, LatencySummary::default());
    }

    #[test]
    fn records_by_logical_name() {
        let stats = Stats::new();
        stats.record(&RequestOutcome::success("/items/:id", Duration::from_millis(5)));
        stats.record(&RequestOutcome::success("/items/:id", Duration::from_millis(15)));
        stats.record(&RequestOutcome::failure("/health", Duration::from_millis(1), "Status 503: down"));

        let snap = stats.snapshot();
        let items = snap.get("/items/:id").unwrap();
        assert_eq!(items.count, 2);
        assert_eq!(items.successes, 2);
        assert_eq!(items.latency.mean_us, 10_000);
        assert!(items.latency.percentile(99.0).unwrap() >= items.latency.percentile(50.0).unwrap());

        let health = snap.get("/health").unwrap();
        assert_eq!(health.failures, 1);
        assert_eq!(health.failure_reasons["Status 503: down"], 1);

        assert_eq!(snap.total.count, 3);
        assert_eq!(snap.total.failures, 1);
    }

    #[test]
    fn snapshots_are_idempotent() {
        let stats = Stats::new();
        for i in 0..100 {
            stats.record(&RequestOutcome::success("a", Duration::from_micros(i * 37)));
        }
        stats.record_skip("detail");

        assert_eq!(stats.snapshot(), stats.snapshot());
    }

    #[test]
    fn skips_are_not_failures() {
        let stats = Stats::new();
        stats.record_skip("detail");
        stats.record_skip("detail");

        let snap = stats.snapshot();
        assert_eq!(snap.skipped("detail"), 2);
        assert_eq!(snap.skipped("other"), 0);
        assert_eq!(snap.total.failures, 0);
        assert!(snap.endpoints.is_empty());
    }

    #[test]
    fn reset_clears_everything() {
        let stats = Stats::new();
        stats.record(&RequestOutcome::success("a", Duration::ZERO));
        stats.record_skip("b");
        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_records_are_not_lost() {
        let stats = Stats::new();
        let workers = 16;
        let per_worker = 2_000;

        let handles: Vec<_> = (0..workers)
            .map(|w| {
                let stats = stats.clone();
                tokio::spawn(async move {
                    for i in 0..per_worker {
                        let name = if i % 2 == 0 { "even" } else { "odd" };
                        stats.record(&RequestOutcome::success(name, Duration::from_micros(w + 1)));
                        if i % 100 == 0 {
                            let _ = stats.snapshot();
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.get("even").unwrap().count, workers * per_worker / 2);
        assert_eq!(snap.get("odd").unwrap().count, workers * per_worker / 2);
        assert_eq!(snap.total.count, workers * per_worker);
    }
}
