//! Console rendering of banners, scenario results, and the latency verdict.
//!
//! Everything here implements [`fmt::Display`] so the caller decides where the
//! text goes: the load test prints it to standard out.

use num_format::{Locale, ToFormattedString};
use std::fmt;

use crate::config::{RunSettings, Scenario};
use crate::runner::{ScenarioPlan, ScenarioResult};
use crate::util;
use crate::worker::{COMMUNITIES_PATH, EVENTS_PATH};

/// Ingestion passes when its p99 latency is below this many milliseconds.
pub const INGESTION_P99_BUDGET_MS: f64 = 100.0;
/// Discovery passes when its p99 latency is below this many milliseconds.
pub const DISCOVERY_P99_BUDGET_MS: f64 = 50.0;

/// How many of the stored error descriptions are displayed.
pub const MAX_DISPLAYED_ERRORS: usize = 5;

const BANNER_WIDTH: usize = 60;

fn heavy_rule() -> String {
    "=".repeat(BANNER_WIDTH)
}

fn light_rule() -> String {
    "─".repeat(BANNER_WIDTH)
}

/// Format a rate with thousands separators and one decimal, e.g. `1,234.5`.
fn format_rate(rate: f64) -> String {
    let tenths = (rate * 10.0).round().max(0.0) as u64;
    format!("{}.{}", (tenths / 10).to_formatted_string(&Locale::en), tenths % 10)
}

impl Scenario {
    /// Method and path requested by the scenario.
    pub fn endpoint(&self) -> String {
        match self {
            Scenario::Ingestion => format!("POST {}", EVENTS_PATH),
            Scenario::Discovery => format!("GET {}", COMMUNITIES_PATH),
        }
    }
}

/// The banner printed once before anything runs.
impl fmt::Display for RunSettings {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        writeln!(fmt, "\n{}", heavy_rule())?;
        writeln!(fmt, "PULSE LOAD TESTING")?;
        writeln!(fmt, "{}", heavy_rule())?;
        writeln!(fmt, "target: {}", self.base_url)?;
        writeln!(fmt, "scenario: {}", self.selection)?;
        writeln!(fmt, "concurrency: {}", self.concurrency)?;
        write!(fmt, "duration: {}s", self.run_time)
    }
}

/// The banner printed before a scenario starts.
impl fmt::Display for ScenarioPlan {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        writeln!(fmt, "\n{}", heavy_rule())?;
        writeln!(
            fmt,
            "SCENARIO {}: {} LOAD TEST",
            self.scenario.letter(),
            self.scenario.name().to_uppercase()
        )?;
        writeln!(fmt, "{}", heavy_rule())?;
        writeln!(fmt, "concurrency: {} workers", self.concurrency)?;
        writeln!(fmt, "duration: {} seconds", self.run_time)?;
        if self.scenario == Scenario::Ingestion {
            writeln!(fmt, "target communities: {}", self.community_count())?;
        }
        writeln!(fmt, "endpoint: {}", self.scenario.endpoint())
    }
}

impl ScenarioResult {
    /// Successful requests per second of configured run time.
    pub fn throughput(&self) -> f64 {
        if self.run_time == 0 {
            return 0.0;
        }
        self.stats.successes() as f64 / self.run_time as f64
    }

    fn fmt_counts(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = self.stats.summary();
        writeln!(
            fmt,
            "\n  Total Requests:     {}",
            summary.total_requests.to_formatted_string(&Locale::en)
        )?;
        writeln!(
            fmt,
            "  Successful:         {}",
            summary.successes.to_formatted_string(&Locale::en)
        )?;
        writeln!(
            fmt,
            "  Failed:             {}",
            summary.failures.to_formatted_string(&Locale::en)
        )?;
        writeln!(fmt, "  Error Rate:         {:.2}%", summary.error_rate)?;
        if self.workers_cancelled > 0 {
            writeln!(
                fmt,
                "  Workers Cancelled:  {}",
                self.workers_cancelled.to_formatted_string(&Locale::en)
            )?;
        }
        if let (Some(started), Some(stopped)) = (self.started, self.stopped) {
            writeln!(
                fmt,
                "  Ran:                {} - {}",
                started.format("%H:%M:%S"),
                stopped.format("%H:%M:%S")
            )?;
        }
        Ok(())
    }

    fn fmt_latency(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Nothing to display without at least one successful request.
        let latency = match self.stats.summary().latency {
            Some(latency) => latency,
            None => return Ok(()),
        };
        writeln!(
            fmt,
            "\n  Throughput:         {} req/s",
            format_rate(self.throughput())
        )?;
        writeln!(fmt, "\n  Latency (ms):")?;
        writeln!(fmt, "    Min:              {:.2}", latency.min_ms)?;
        writeln!(fmt, "    Mean:             {:.2}", latency.mean_ms)?;
        writeln!(fmt, "    Median (p50):     {:.2}", latency.p50_ms)?;
        writeln!(fmt, "    p90:              {:.2}", latency.p90_ms)?;
        writeln!(fmt, "    p95:              {:.2}", latency.p95_ms)?;
        writeln!(fmt, "    p99:              {:.2}", latency.p99_ms)?;
        writeln!(fmt, "    Max:              {:.2}", latency.max_ms)
    }

    fn fmt_errors(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let errors = self.stats.errors();
        if errors.is_empty() {
            return Ok(());
        }
        writeln!(fmt, "\n  Sample Errors ({}):", errors.len())?;
        for error in errors.iter().take(MAX_DISPLAYED_ERRORS) {
            writeln!(fmt, "    - {}", error)?;
        }
        Ok(())
    }
}

/// The results block printed after a scenario finishes.
impl fmt::Display for ScenarioResult {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        writeln!(fmt, "\n{}", light_rule())?;
        writeln!(fmt, "RESULTS: {}", self.scenario.name().to_uppercase())?;
        writeln!(fmt, "{}", light_rule())?;
        self.fmt_counts(fmt)?;
        self.fmt_latency(fmt)?;
        self.fmt_errors(fmt)
    }
}

/// A scenario whose p99 latency was not below its budget.
#[derive(Clone, Debug, PartialEq)]
pub struct BudgetMiss {
    pub scenario: Scenario,
    pub p99_ms: f64,
    pub budget_ms: f64,
}

/// Overall assessment of a run of both scenarios.
#[derive(Clone, Debug, PartialEq)]
pub struct Verdict {
    pub ingestion_p99_ms: f64,
    pub discovery_p99_ms: f64,
    /// Empty when every budget was met.
    pub misses: Vec<BudgetMiss>,
}

impl Verdict {
    pub fn passed(&self) -> bool {
        self.misses.is_empty()
    }
}

/// Compare p99 latencies against the fixed budgets.
///
/// # Example
/// ```rust
/// use pulse_loadtest::report::evaluate;
///
/// assert!(evaluate(99.9, 49.9).passed());
/// assert_eq!(evaluate(100.0, 10.0).misses.len(), 1);
/// ```
pub fn evaluate(ingestion_p99_ms: f64, discovery_p99_ms: f64) -> Verdict {
    let misses = [
        (Scenario::Ingestion, ingestion_p99_ms, INGESTION_P99_BUDGET_MS),
        (Scenario::Discovery, discovery_p99_ms, DISCOVERY_P99_BUDGET_MS),
    ]
    .into_iter()
    .filter(|(_, p99_ms, budget_ms)| p99_ms >= budget_ms)
    .map(|(scenario, p99_ms, budget_ms)| BudgetMiss {
        scenario,
        p99_ms,
        budget_ms,
    })
    .collect();

    Verdict {
        ingestion_p99_ms,
        discovery_p99_ms,
        misses,
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        writeln!(fmt, "\n{}", "-".repeat(BANNER_WIDTH))?;
        if self.passed() {
            writeln!(fmt, "✓ PASS: both scenarios within acceptable latency targets")?;
            writeln!(
                fmt,
                "  - ingestion p99 < {}ms: {:.2}ms",
                INGESTION_P99_BUDGET_MS, self.ingestion_p99_ms
            )?;
            writeln!(
                fmt,
                "  - discovery p99 < {}ms: {:.2}ms",
                DISCOVERY_P99_BUDGET_MS, self.discovery_p99_ms
            )?;
        } else {
            writeln!(fmt, "✗ REVIEW: latency targets may not be met")?;
            for miss in &self.misses {
                writeln!(
                    fmt,
                    "  - {} p99 >= {}ms: {:.2}ms",
                    miss.scenario, miss.budget_ms, miss.p99_ms
                )?;
            }
        }
        write!(fmt, "{}", "-".repeat(BANNER_WIDTH))
    }
}

/// Side by side tail latencies of an ingestion and a discovery run, with
/// the verdict.
#[derive(Clone, Debug)]
pub struct CombinedSummary {
    pub ingestion_p95_ms: f64,
    pub ingestion_p99_ms: f64,
    pub discovery_p95_ms: f64,
    pub discovery_p99_ms: f64,
    pub verdict: Verdict,
}

impl CombinedSummary {
    pub fn new(ingestion: &ScenarioResult, discovery: &ScenarioResult) -> Self {
        let ingestion_p99_ms = ingestion.stats.percentile(99.0);
        let discovery_p99_ms = discovery.stats.percentile(99.0);
        CombinedSummary {
            ingestion_p95_ms: ingestion.stats.percentile(95.0),
            ingestion_p99_ms,
            discovery_p95_ms: discovery.stats.percentile(95.0),
            discovery_p99_ms,
            verdict: evaluate(ingestion_p99_ms, discovery_p99_ms),
        }
    }
}

impl fmt::Display for CombinedSummary {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        writeln!(fmt, "\n{}", heavy_rule())?;
        writeln!(fmt, "COMBINED SUMMARY")?;
        writeln!(fmt, "{}", heavy_rule())?;
        writeln!(
            fmt,
            "\nIngestion: p95={:.2}ms, p99={:.2}ms",
            self.ingestion_p95_ms, self.ingestion_p99_ms
        )?;
        writeln!(
            fmt,
            "Discovery: p95={:.2}ms, p99={:.2}ms",
            self.discovery_p95_ms, self.discovery_p99_ms
        )?;
        write!(fmt, "{}", self.verdict)
    }
}

/// Printed between the two scenarios of a `both` run.
pub(crate) fn pause_notice(pause: std::time::Duration, next: Scenario) -> String {
    format!("\npausing {}s before {} test...", pause.as_secs(), next)
}

/// Printed after the found community ids.
pub(crate) fn communities_notice(count: usize) -> String {
    format!("found {} communities", util::format_number(count))
}
