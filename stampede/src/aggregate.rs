use std::{collections::HashMap, fmt::Debug};

use hdrhistogram::Histogram;

use crate::metric::{Metric, Outcome, RequestOutcome};

/// The `Aggregate` trait defines how raw [`Metric`] values are folded into a
/// compact, mergeable representation.
///
/// Aggregates store counters, sums and histograms, never the samples
/// themselves, so memory stays flat no matter how long a test runs. Final
/// statistics (means, percentiles, ratios) are derived later when a
/// [`StatsSnapshot`] is taken.
///
/// # Implementor notes
/// - `merge` must be **associative** and **commutative**: the aggregated total
///   row of a snapshot merges per-name aggregates in arbitrary order.
/// - `consume` runs on the hot path of every virtual user. Keep it allocation
///   free in the common case.
///
/// # Example
/// ```rust
/// use stampede::{Aggregate, RequestOutcome};
///
/// #[derive(Debug, Clone, Default)]
/// struct Counter {
///     count: u64,
/// }
///
/// impl Aggregate for Counter {
///     type Metric = RequestOutcome;
///
///     fn new() -> Self {
///         Self::default()
///     }
///
///     fn consume(&mut self, _: &Self::Metric) {
///         self.count += 1;
///     }
///
///     fn merge(&mut self, other: Self) {
///         self.count += other.count;
///     }
/// }
/// ```
///
/// [`StatsSnapshot`]: crate::StatsSnapshot
pub trait Aggregate
where
    Self: Send + Sync + Debug + Clone,
{
    /// The metric type this aggregate summarizes.
    type Metric: Metric;

    /// Create a new, empty instance of the aggregate.
    fn new() -> Self;

    /// Aggregate multiple metrics into the current instance.
    fn aggregate(&mut self, metrics: &[Self::Metric]) {
        metrics.iter().for_each(|m| self.consume(m));
    }

    /// Incorporate a single metric into the aggregate.
    fn consume(&mut self, metric: &Self::Metric);

    /// Combine two different aggregates into one.
    fn merge(&mut self, other: Self);
}

/// Largest latency the histogram tracks, one hour in microseconds. Slower
/// samples are clamped to it.
pub const MAX_TRACKED_LATENCY_US: u64 = 3_600_000_000;

/// Distinct failure reasons kept per logical name.
pub const MAX_FAILURE_REASONS: usize = 64;

/// Bucket for reasons beyond [`MAX_FAILURE_REASONS`].
pub const OTHER_FAILURE_REASON: &str = "<other>";

/// Per logical name aggregate of [`RequestOutcome`]s.
///
/// Latencies go into an HDR histogram with three significant figures, which
/// keeps percentile error under 0.1% in a fixed amount of memory.
#[derive(Debug, Clone)]
pub struct EndpointAggregate {
    pub count: u64,
    pub successes: u64,
    pub failures: u64,
    pub failure_reasons: HashMap<String, u64>,
    pub latency_us: Histogram<u64>,
    pub total_latency_us: u128,
    pub total_bytes: u64,
}

impl EndpointAggregate {
    fn bump_reason(&mut self, reason: &str, by: u64) {
        if let Some(n) = self.failure_reasons.get_mut(reason) {
            *n += by;
            return;
        }
        let key = if self.failure_reasons.len() < MAX_FAILURE_REASONS {
            reason
        } else {
            OTHER_FAILURE_REASON
        };
        *self.failure_reasons.entry(key.to_string()).or_insert(0) += by;
    }
}

impl Aggregate for EndpointAggregate {
    type Metric = RequestOutcome;

    fn new() -> Self {
        Self {
            count: 0,
            successes: 0,
            failures: 0,
            failure_reasons: HashMap::new(),
            // Constant bounds, creation can only fail for invalid arguments
            latency_us: Histogram::new_with_bounds(1, MAX_TRACKED_LATENCY_US, 3)
                .expect("static histogram bounds are valid"),
            total_latency_us: 0,
            total_bytes: 0,
        }
    }

    fn consume(&mut self, metric: &Self::Metric) {
        let us = u64::try_from(metric.duration.as_micros()).unwrap_or(u64::MAX);
        self.count += 1;
        match &metric.outcome {
            Outcome::Success => self.successes += 1,
            Outcome::Failure(reason) => {
                self.failures += 1;
                self.bump_reason(reason, 1);
            }
        }
        self.latency_us.saturating_record(us);
        self.total_latency_us += us as u128;
        self.total_bytes += metric.bytes as u64;
    }

    fn merge(&mut self, other: Self) {
        self.count += other.count;
        self.successes += other.successes;
        self.failures += other.failures;
        for (reason, n) in other.failure_reasons {
            self.bump_reason(&reason, n);
        }
        if let Err(err) = self.latency_us.add(&other.latency_us) {
            tracing::warn!("Failed to merge latency histograms: {err}");
        }
        self.total_latency_us += other.total_latency_us;
        self.total_bytes += other.total_bytes;
    }
}
