//! Latency and outcome aggregation for a single scenario.
//!
//! Every worker of a scenario shares one [`LatencyStats`] through an `Arc`, and
//! records each completed request with [`LatencyStats::record_success`] or
//! [`LatencyStats::record_failure`]. Once the scenario is done, the reporter
//! reads a [`LatencySummary`] from it.
//!
//! Percentiles are nearest-rank over a sorted snapshot of all samples: the
//! value at index `floor(n * p / 100)`, clamped to the last sample. They are
//! not interpolated.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::util::round2;

/// How many error descriptions are kept for display. Further failures are
/// only counted.
pub const MAX_SAMPLE_ERRORS: usize = 10;

#[derive(Debug, Default)]
struct LatencyRecord {
    /// Successful request latencies in milliseconds, in completion order.
    latencies: Vec<f64>,
    successes: usize,
    failures: usize,
    /// The first [`MAX_SAMPLE_ERRORS`] error descriptions.
    errors: Vec<String>,
}

/// Thread-safe record of per-request outcomes for one scenario.
#[derive(Debug, Default)]
pub struct LatencyStats {
    record: Mutex<LatencyRecord>,
}

/// Latency-derived statistics, only available when at least one request
/// succeeded. All values are in milliseconds and rounded to 2 decimals.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyBreakdown {
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    /// Successful requests divided by the single slowest latency, in seconds.
    /// This is not wall-clock throughput; see [`LatencyStats::summary`].
    pub requests_per_second: f64,
}

/// Summary of a finished scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySummary {
    pub total_requests: usize,
    pub successes: usize,
    pub failures: usize,
    /// Percentage of failed requests, rounded to 2 decimals.
    pub error_rate: f64,
    pub latency: Option<LatencyBreakdown>,
}

impl LatencyStats {
    pub fn new() -> Self {
        Self::default()
    }

    // A worker that panicked mid-record can't leave the record half-updated:
    // every mutation is a single push or increment.
    fn lock(&self) -> MutexGuard<'_, LatencyRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a successful request and its latency in milliseconds.
    pub fn record_success(&self, latency_ms: f64) {
        let mut record = self.lock();
        record.latencies.push(latency_ms);
        record.successes += 1;
    }

    /// Record a failed request. The description is kept only while fewer than
    /// [`MAX_SAMPLE_ERRORS`] descriptions are stored.
    pub fn record_failure<S: Into<String>>(&self, error: S) {
        let mut record = self.lock();
        record.failures += 1;
        if record.errors.len() < MAX_SAMPLE_ERRORS {
            record.errors.push(error.into());
        }
    }

    pub fn successes(&self) -> usize {
        self.lock().successes
    }

    pub fn failures(&self) -> usize {
        self.lock().failures
    }

    /// Total completed requests, successful or not.
    pub fn requests(&self) -> usize {
        let record = self.lock();
        record.successes + record.failures
    }

    /// Copy of the stored error descriptions, oldest first.
    pub fn errors(&self) -> Vec<String> {
        self.lock().errors.clone()
    }

    /// Copy of all recorded latencies, in completion order.
    pub fn latencies(&self) -> Vec<f64> {
        self.lock().latencies.clone()
    }

    /// Nearest-rank percentile of recorded latencies, `p` in `0..=100`.
    ///
    /// Returns 0 when no latency was recorded.
    pub fn percentile(&self, p: f64) -> f64 {
        let sorted = self.sorted_latencies();
        nearest_rank(&sorted, p)
    }

    /// Summarize the recorded outcomes.
    ///
    /// `requests_per_second` is `successes / (max_ms / 1000)`: it treats the
    /// slowest single request as the elapsed time. Reported budgets were
    /// calibrated against this definition so it is kept as is.
    pub fn summary(&self) -> LatencySummary {
        let (sorted, successes, failures) = {
            let record = self.lock();
            let mut sorted = record.latencies.clone();
            sorted.sort_by(f64::total_cmp);
            (sorted, record.successes, record.failures)
        };
        let total_requests = successes + failures;

        if sorted.is_empty() {
            return LatencySummary {
                total_requests,
                successes,
                failures,
                error_rate: if failures > 0 { 100.0 } else { 0.0 },
                latency: None,
            };
        }

        let count = sorted.len();
        let min = sorted[0];
        let max = sorted[count - 1];
        let mean = sorted.iter().sum::<f64>() / count as f64;
        let median = if count % 2 == 1 {
            sorted[count / 2]
        } else {
            (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
        };
        let requests_per_second = if max > 0.0 {
            successes as f64 / (max / 1_000.0)
        } else {
            0.0
        };

        LatencySummary {
            total_requests,
            successes,
            failures,
            error_rate: round2(failures as f64 / total_requests as f64 * 100.0),
            latency: Some(LatencyBreakdown {
                min_ms: round2(min),
                max_ms: round2(max),
                mean_ms: round2(mean),
                median_ms: round2(median),
                p50_ms: round2(nearest_rank(&sorted, 50.0)),
                p90_ms: round2(nearest_rank(&sorted, 90.0)),
                p95_ms: round2(nearest_rank(&sorted, 95.0)),
                p99_ms: round2(nearest_rank(&sorted, 99.0)),
                requests_per_second: round2(requests_per_second),
            }),
        }
    }

    fn sorted_latencies(&self) -> Vec<f64> {
        let mut sorted = self.latencies();
        sorted.sort_by(f64::total_cmp);
        sorted
    }
}

/// Value at index `floor(n * p / 100)` of an ascending slice, clamped to the
/// slice bounds.
fn nearest_rank(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    // Float to int casts saturate, so negative indexes clamp to 0.
    let index = (sorted.len() as f64 * p / 100.0).floor() as usize;
    sorted[index.min(sorted.len() - 1)]
}

#[cfg(test)]
mod test {
    use super::*;

    fn stats_with(latencies: &[f64]) -> LatencyStats {
        let stats = LatencyStats::new();
        for latency in latencies {
            stats.record_success(*latency);
        }
        stats
    }

    #[test]
    fn empty_percentile_is_zero() {
        let stats = LatencyStats::new();
        assert_eq!(stats.percentile(50.0), 0.0);
        assert_eq!(stats.percentile(99.0), 0.0);
    }

    #[test]
    fn percentile_nearest_rank() {
        let stats = stats_with(&[100.0, 30.0, 10.0, 90.0, 50.0, 20.0, 70.0, 40.0, 80.0, 60.0]);
        // floor(10 * 90 / 100) = 9, the 10th value.
        assert_eq!(stats.percentile(90.0), 100.0);
        // floor(10 * 50 / 100) = 5, the 6th value.
        assert_eq!(stats.percentile(50.0), 60.0);
        // floor(10 * 99 / 100) = 9.
        assert_eq!(stats.percentile(99.0), 100.0);
        assert_eq!(stats.percentile(0.0), 10.0);
        assert_eq!(stats.percentile(100.0), 100.0);
    }

    #[test]
    fn percentile_bounds_are_min_and_max() {
        let samples = [3.5, 1.25, 9.0, 7.75, 2.0, 8.5, 4.0];
        let stats = stats_with(&samples);
        assert_eq!(stats.percentile(0.0), 1.25);
        assert_eq!(stats.percentile(100.0), 9.0);
        // Out of range values clamp rather than panic.
        assert_eq!(stats.percentile(250.0), 9.0);
        assert_eq!(stats.percentile(-5.0), 1.25);

        let single = stats_with(&[42.0]);
        assert_eq!(single.percentile(0.0), 42.0);
        assert_eq!(single.percentile(100.0), 42.0);
    }

    #[test]
    fn error_list_is_capped() {
        let stats = LatencyStats::new();
        for i in 0..1_000 {
            stats.record_failure(format!("status=500: failure {}", i));
        }
        assert_eq!(stats.failures(), 1_000);
        let errors = stats.errors();
        assert_eq!(errors.len(), MAX_SAMPLE_ERRORS);
        // The first errors are retained, later ones are dropped.
        assert_eq!(errors[0], "status=500: failure 0");
        assert_eq!(errors[9], "status=500: failure 9");
    }

    #[test]
    fn failures_only_summary() {
        let stats = LatencyStats::new();
        stats.record_failure("timeout");
        stats.record_failure("timeout");
        stats.record_failure("status=503: unavailable");
        let summary = stats.summary();
        assert_eq!(summary.total_requests, 3);
        assert_eq!(summary.successes, 0);
        assert_eq!(summary.failures, 3);
        assert_eq!(summary.error_rate, 100.0);
        assert!(summary.latency.is_none());
    }

    #[test]
    fn empty_summary() {
        let summary = LatencyStats::new().summary();
        assert_eq!(summary.total_requests, 0);
        assert_eq!(summary.error_rate, 0.0);
        assert!(summary.latency.is_none());
    }

    #[test]
    fn summary_error_rate_and_totals() {
        let stats = LatencyStats::new();
        for latency in 1..=7 {
            stats.record_success(latency as f64);
        }
        stats.record_failure("timeout");
        stats.record_failure("timeout");
        stats.record_failure("timeout");

        let summary = stats.summary();
        assert_eq!(summary.total_requests, 10);
        assert_eq!(summary.successes, 7);
        assert_eq!(summary.failures, 3);
        assert_eq!(summary.error_rate, round2(3.0 / 10.0 * 100.0));

        let stats = stats_with(&[5.0, 5.0]);
        stats.record_failure("connection refused");
        assert_eq!(stats.summary().error_rate, 33.33);
    }

    #[test]
    fn summary_latency_breakdown() {
        let stats = stats_with(&[10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0]);
        let latency = stats.summary().latency.expect("latency breakdown");
        assert_eq!(latency.min_ms, 10.0);
        assert_eq!(latency.max_ms, 100.0);
        assert_eq!(latency.mean_ms, 55.0);
        // Even count: mean of the two middle values.
        assert_eq!(latency.median_ms, 55.0);
        assert_eq!(latency.p50_ms, 60.0);
        assert_eq!(latency.p90_ms, 100.0);
        assert_eq!(latency.p95_ms, 100.0);
        assert_eq!(latency.p99_ms, 100.0);
        // 10 successes over a 100ms slowest request.
        assert_eq!(latency.requests_per_second, 100.0);

        let odd = stats_with(&[3.0, 1.0, 2.0]);
        assert_eq!(odd.summary().latency.expect("latency").median_ms, 2.0);
    }

    #[test]
    fn summary_rounds_but_samples_keep_precision() {
        let stats = stats_with(&[1.234_567, 2.345_678]);
        let latency = stats.summary().latency.expect("latency breakdown");
        assert_eq!(latency.min_ms, 1.23);
        assert_eq!(latency.max_ms, 2.35);
        assert_eq!(stats.latencies(), vec![1.234_567, 2.345_678]);
        assert_eq!(stats.percentile(0.0), 1.234_567);
    }

    #[test]
    fn requests_counts_both_outcomes() {
        let stats = stats_with(&[1.0, 2.0]);
        stats.record_failure("timeout");
        assert_eq!(stats.requests(), 3);
        assert_eq!(stats.successes(), 2);
        assert_eq!(stats.latencies().len(), 2);
    }
}
