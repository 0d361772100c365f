//! # Pulse load test
//!
//! Load generation and latency measurement for the Pulse HTTP API.
//!
//! A load test drives concurrent synthetic traffic against two endpoint
//! classes and reports latency percentiles against fixed budgets:
//!
//! - **Scenario A, ingestion**: `POST /api/v1/events` with event types drawn
//!   from a weighted distribution, spread across the target communities.
//! - **Scenario B, discovery**: `GET /api/v1/communities` with varied page
//!   sizes and offsets.
//!
//! Each scenario launches the configured number of workers as tokio tasks
//! sharing one [`reqwest`](https://docs.rs/reqwest/) client. Workers record
//! the outcome and latency of every request into a shared
//! [`LatencyStats`](./stats/struct.LatencyStats.html), which is summarized once
//! the scenario stops.
//!
//! ## Running a load test
//!
//! ```bash
//! cargo run --release --bin pulse-loadtest -- -s both -c 1000 -d 60 -t <jwt_token>
//! ```
//!
//! Run with `-h` to see all available options. When running both scenarios
//! each gets half of the configured duration, with a short pause between them,
//! and a combined summary compares their p99 latency against the budgets:
//!
//! ```text
//! ============================================================
//! COMBINED SUMMARY
//! ============================================================
//!
//! Ingestion: p95=41.20ms, p99=87.03ms
//! Discovery: p95=9.87ms, p99=21.54ms
//!
//! ------------------------------------------------------------
//! ✓ PASS: both scenarios within acceptable latency targets
//!   - ingestion p99 < 100ms: 87.03ms
//!   - discovery p99 < 50ms: 21.54ms
//! ------------------------------------------------------------
//! ```
//!
//! The ingestion scenario needs existing communities. Unless ids are passed
//! with `--community-ids`, up to 50 are fetched from the api before any load
//! is generated, and the load test fails if none are found.
//!
//! ## Generating background noise
//!
//! The `pulse-noise` binary sends a small number of events one at a time, with
//! a delay between them, to exercise momentum calculations by hand:
//!
//! ```bash
//! cargo run --bin pulse-noise -- --random --count 100 -t <jwt_token>
//! ```
//!
//! ## Using the library
//!
//! ```rust,no_run
//! use gumdrop::Options;
//! use pulse_loadtest::config::LoadTestConfiguration;
//! use pulse_loadtest::{LoadTest, LoadTestError};
//!
//! fn main() -> Result<(), LoadTestError> {
//!     let configuration = LoadTestConfiguration::parse_args_default(&[
//!         "--scenario", "discovery", "--duration", "10s", "--token", "secret",
//!     ]).expect("failed to parse options");
//!
//!     let results = LoadTest::initialize_with_config(configuration)?.execute()?;
//!     for scenario in &results.scenarios {
//!         println!("{}: {} requests", scenario.scenario, scenario.stats.requests());
//!     }
//!     Ok(())
//! }
//! ```

#[macro_use]
extern crate log;

pub mod communities;
pub mod config;
pub mod event;
pub mod noise;
pub mod report;
pub mod runner;
pub mod stats;
pub mod util;
pub mod worker;

use gumdrop::Options;
use reqwest::Client;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::{fmt, io};

use crate::communities::LOAD_TEST_COMMUNITY_LIMIT;
use crate::config::{LoadTestConfiguration, RunSettings, Scenario};
use crate::report::{CombinedSummary, Verdict};
use crate::runner::{ScenarioPlan, ScenarioResult};

/// Set when ctrl-c is caught, reset at the start of every load test.
pub(crate) static CANCELED: AtomicBool = AtomicBool::new(false);

/// User agent sent with every request.
pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// An enumeration of all errors a [`LoadTest`](./struct.LoadTest.html) can
/// return.
///
/// Failed requests made while generating load are not errors: they are
/// counted in the scenario's statistics.
#[derive(Debug)]
pub enum LoadTestError {
    /// Wraps a [`std::io::Error`](https://doc.rust-lang.org/std/io/struct.Error.html).
    Io(io::Error),
    /// Wraps a [`reqwest::Error`](https://docs.rs/reqwest/*/reqwest/struct.Error.html).
    Reqwest(reqwest::Error),
    /// Failed to parse the base url.
    InvalidHost {
        /// The invalid base url that caused this error.
        host: String,
        /// An optional explanation of the error.
        detail: String,
        /// Wraps a [`url::ParseError`](https://docs.rs/url/*/url/enum.ParseError.html).
        parse_error: url::ParseError,
    },
    /// Invalid option or value specified, may only be invalid in context.
    InvalidOption {
        /// The invalid option that caused this error, may be only invalid in context.
        option: String,
        /// The invalid value that caused this error, may be only invalid in context.
        value: String,
        /// An optional explanation of the error.
        detail: String,
    },
    /// The ingestion scenario has no communities to send events to.
    NoCommunities {
        /// An optional explanation of the error.
        detail: String,
    },
}

/// Implement a helper to provide a text description of all possible types of errors.
impl LoadTestError {
    fn describe(&self) -> &str {
        match *self {
            LoadTestError::Io(_) => "io::Error",
            LoadTestError::Reqwest(_) => "reqwest::Error",
            LoadTestError::InvalidHost { .. } => "failed to parse base url",
            LoadTestError::InvalidOption { .. } => "invalid option or value specified",
            LoadTestError::NoCommunities { .. } => "no communities found",
        }
    }
}

/// Implement format trait to allow displaying errors.
impl fmt::Display for LoadTestError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            LoadTestError::Io(ref source) => write!(f, "{} ({})", self.describe(), source),
            LoadTestError::Reqwest(ref source) => write!(f, "{} ({})", self.describe(), source),
            LoadTestError::InvalidHost {
                ref host,
                ref parse_error,
                ..
            } => write!(f, "{} {} ({})", self.describe(), host, parse_error),
            LoadTestError::InvalidOption {
                ref option,
                ref value,
                ref detail,
            } => write!(f, "{} {}={:?}: {}", self.describe(), option, value, detail),
            LoadTestError::NoCommunities { ref detail } => {
                write!(f, "{}. {}", self.describe(), detail)
            }
        }
    }
}

// Define the lower level source of this error, if any.
impl std::error::Error for LoadTestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            LoadTestError::Io(ref source) => Some(source),
            LoadTestError::Reqwest(ref source) => Some(source),
            LoadTestError::InvalidHost {
                ref parse_error, ..
            } => Some(parse_error),
            _ => None,
        }
    }
}

/// Auto-convert Reqwest errors.
impl From<reqwest::Error> for LoadTestError {
    fn from(err: reqwest::Error) -> LoadTestError {
        LoadTestError::Reqwest(err)
    }
}

/// Auto-convert IO errors.
impl From<io::Error> for LoadTestError {
    fn from(err: io::Error) -> LoadTestError {
        LoadTestError::Io(err)
    }
}

/// Everything a finished load test measured.
#[derive(Debug)]
pub struct LoadTestResults {
    /// One result per scenario that ran, in the order they ran.
    pub scenarios: Vec<ScenarioResult>,
    /// Only set when both scenarios ran.
    pub verdict: Option<Verdict>,
}

impl LoadTestResults {
    /// The result of a scenario, if it ran.
    pub fn get(&self, scenario: Scenario) -> Option<&ScenarioResult> {
        find_result(&self.scenarios, scenario)
    }
}

fn find_result(scenarios: &[ScenarioResult], scenario: Scenario) -> Option<&ScenarioResult> {
    scenarios.iter().find(|r| r.scenario == scenario)
}

/// Global internal state for the load test.
pub struct LoadTest {
    /// Configuration object holding options set when launching the load test.
    configuration: LoadTestConfiguration,
}

impl LoadTest {
    /// Load configuration from the command line and initialize a
    /// [`LoadTest`](./struct.LoadTest.html).
    ///
    /// # Example
    /// ```rust,no_run
    /// use pulse_loadtest::LoadTest;
    ///
    /// let load_test = LoadTest::initialize();
    /// ```
    pub fn initialize() -> Result<LoadTest, LoadTestError> {
        Ok(LoadTest {
            configuration: LoadTestConfiguration::parse_args_default_or_exit(),
        })
    }

    /// Initialize a [`LoadTest`](./struct.LoadTest.html) with an already
    /// loaded configuration.
    ///
    /// This is generally used by tests.
    pub fn initialize_with_config(
        configuration: LoadTestConfiguration,
    ) -> Result<LoadTest, LoadTestError> {
        Ok(LoadTest { configuration })
    }

    /// Execute the load test: validate the configuration, fetch communities
    /// if needed, run the selected scenarios, and print their results.
    ///
    /// Returns an error if the configuration is invalid or the ingestion
    /// scenario has no communities to target. Latency budgets that aren't met
    /// are reported in the returned [`Verdict`](./report/struct.Verdict.html),
    /// not as an error.
    pub fn execute(self) -> Result<LoadTestResults, LoadTestError> {
        // If version flag is set, display package name and version and exit.
        if self.configuration.version {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            std::process::exit(0);
        }

        self.configuration.initialize_logger();
        let settings = self.configuration.resolve()?;
        debug!("resolved settings: {:?}", settings);

        util::setup_ctrlc_handler();

        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.run(settings))
    }

    async fn run(&self, settings: RunSettings) -> Result<LoadTestResults, LoadTestError> {
        println!("{}", settings);

        let community_ids = self.community_ids(&settings).await?;

        let mut scenarios: Vec<ScenarioResult> = Vec::new();
        for (index, scenario) in settings.selection.scenarios().into_iter().enumerate() {
            if index > 0 && !util::canceled() {
                println!("{}", report::pause_notice(settings.scenario_pause, scenario));
                tokio::time::sleep(settings.scenario_pause).await;
            }
            if util::canceled() {
                info!("canceled, skipping {} scenario", scenario);
                break;
            }

            let plan = ScenarioPlan::new(&settings, scenario, community_ids.clone())?;
            println!("{}", plan);
            let result = runner::run_scenario(plan).await?;
            println!("{}", result);
            scenarios.push(result);
        }

        let verdict = match (
            find_result(&scenarios, Scenario::Ingestion),
            find_result(&scenarios, Scenario::Discovery),
        ) {
            (Some(ingestion), Some(discovery)) => {
                let summary = CombinedSummary::new(ingestion, discovery);
                println!("{}", summary);
                Some(summary.verdict)
            }
            _ => None,
        };

        println!("\nload test complete.\n");
        Ok(LoadTestResults { scenarios, verdict })
    }

    /// The community ids ingestion posts events to, fetched from the api when
    /// none were configured. `None` when ingestion isn't selected.
    async fn community_ids(
        &self,
        settings: &RunSettings,
    ) -> Result<Option<Arc<[String]>>, LoadTestError> {
        if !settings.selection.includes(Scenario::Ingestion) {
            return Ok(None);
        }
        if let Some(ids) = settings.community_ids.as_ref() {
            info!("targeting {} configured communities", ids.len());
            return Ok(Some(ids.clone().into()));
        }

        println!("\nfetching communities from api...");
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(settings.request_timeout)
            .build()?;
        let ids = communities::fetch_community_ids(
            &client,
            &settings.base_url,
            &settings.token,
            LOAD_TEST_COMMUNITY_LIMIT,
        )
        .await;
        if ids.is_empty() {
            return Err(LoadTestError::NoCommunities {
                detail: "create some first.".to_string(),
            });
        }
        println!("{}", report::communities_notice(ids.len()));
        Ok(Some(ids.into()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_display() {
        let error = LoadTestError::NoCommunities {
            detail: "create some first.".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "no communities found. create some first."
        );

        let error = LoadTestError::InvalidOption {
            option: "--concurrency".to_string(),
            value: "0".to_string(),
            detail: "--concurrency must be set to at least 1.".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "invalid option or value specified --concurrency=\"0\": --concurrency must be set to at least 1."
        );
        assert!(std::error::Error::source(&error).is_none());
    }

    #[test]
    fn invalid_host_has_source() {
        let error = config::validate_base_url("not a url").expect_err("invalid base url");
        assert!(matches!(error, LoadTestError::InvalidHost { .. }));
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn user_agent() {
        assert!(APP_USER_AGENT.starts_with("pulse-loadtest/"));
    }
}
