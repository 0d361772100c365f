//! Functions and structures related to configuring a load test.
//!
//! The load test is configured at run time by passing in the options and flags
//! defined by the [`LoadTestConfiguration`] structure. Before anything runs, the
//! raw options are validated and resolved into an immutable [`RunSettings`].

use gumdrop::Options;
use itertools::Itertools;
use regex::RegexSet;
use simplelog::*;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use strum::IntoEnumIterator;
use strum_macros::EnumIter;
use url::Url;

use crate::util;
use crate::LoadTestError;

/// Base url of the api when `--url` isn't set.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
/// Concurrent workers per scenario when `--concurrency` isn't set.
pub const DEFAULT_CONCURRENCY: usize = 100;
/// Seconds to run when `--duration` isn't set.
pub const DEFAULT_DURATION: usize = 30;
/// Per-request timeout in seconds when `--timeout` isn't set.
pub const DEFAULT_TIMEOUT: f64 = 10.0;
/// Seconds to pause between scenarios when running both.
pub const DEFAULT_SCENARIO_PAUSE: usize = 5;

/// Runtime options available when launching a load test.
///
/// Help is generated for all of these options by passing a `-h` flag. The
/// [`gumdrop`](https://docs.rs/gumdrop/) crate derives it from the structure
/// below.
#[derive(Options, Debug, Clone, Default)]
#[options(
    help = r#"Drives concurrent synthetic traffic against the Pulse API and reports
latency percentiles against fixed budgets.

examples:
  pulse-loadtest -s ingestion -c 1000 -d 30 -t <jwt_token>
  pulse-loadtest -s discovery -c 5000 -d 30 -t <jwt_token>
  pulse-loadtest -s both -c 1000 -d 60 -t <jwt_token>

The following runtime options are available:"#
)]
pub struct LoadTestConfiguration {
    /// Displays this help
    #[options(short = "h")]
    pub help: bool,
    /// Prints version information
    #[options(short = "V")]
    pub version: bool,

    /// Selects scenario to run: ingestion, discovery, both (default: both)
    #[options(short = "s", meta = "SCENARIO")]
    pub scenario: Option<ScenarioSelection>,
    /// Sets concurrent workers (default: 100)
    #[options(short = "c")]
    pub concurrency: Option<usize>,
    /// Stops each run after (30, 30s, 1m30s, etc) (default: 30s)
    #[options(short = "d", meta = "TIME")]
    pub duration: String,
    /// Defines base url of the api (default: http://localhost:8080)
    #[options(short = "u", meta = "URL")]
    pub url: String,
    /// Sets jwt bearer token for authentication (required)
    #[options(short = "t", meta = "TOKEN")]
    pub token: String,
    /// Targets specific community ids, comma separated (default: fetched from api)
    #[options(no_short, meta = "IDS")]
    pub community_ids: Option<CommunityIds>,
    /// Sets per-request timeout, in seconds (default: 10)
    #[options(no_short, meta = "VALUE")]
    pub timeout: Option<f64>,
    /// Pauses between scenarios when running both (default: 5s)
    // Add a blank line and then a 'Logging:' header after this option
    #[options(
        no_short,
        meta = "TIME",
        help = "Pauses between scenarios when running both (default: 5s)\n\nLogging:"
    )]
    pub scenario_pause: String,

    /// Enables log file and sets name
    #[options(short = "G", meta = "NAME")]
    pub log_file: String,
    /// Increases log file level (-g, -gg, etc)
    #[options(short = "g", count)]
    pub log_level: u8,
    /// Decreases verbosity (-q, -qq, etc)
    #[options(count, short = "q")]
    pub quiet: u8,
    /// Increases verbosity (-v, -vv, etc)
    #[options(count, short = "v")]
    pub verbose: u8,
}

/// One of the two traffic patterns a load test drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter)]
pub enum Scenario {
    /// `POST /api/v1/events` with weighted random event types.
    Ingestion,
    /// `GET /api/v1/communities` with varied paging.
    Discovery,
}

impl Scenario {
    /// Lower case name used on the command line and in reports.
    pub fn name(&self) -> &'static str {
        match self {
            Scenario::Ingestion => "ingestion",
            Scenario::Discovery => "discovery",
        }
    }

    /// Letter identifying the scenario in console banners.
    pub fn letter(&self) -> &'static str {
        match self {
            Scenario::Ingestion => "A",
            Scenario::Discovery => "B",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which scenarios to run, selected with `--scenario`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScenarioSelection {
    Ingestion,
    Discovery,
    /// Ingestion then discovery, each for half of the duration.
    Both,
}

impl ScenarioSelection {
    /// The scenarios to run, in order.
    pub fn scenarios(&self) -> Vec<Scenario> {
        match self {
            ScenarioSelection::Ingestion => vec![Scenario::Ingestion],
            ScenarioSelection::Discovery => vec![Scenario::Discovery],
            ScenarioSelection::Both => Scenario::iter().collect(),
        }
    }

    /// Whether community ids are required.
    pub fn includes(&self, scenario: Scenario) -> bool {
        self.scenarios().contains(&scenario)
    }
}

impl fmt::Display for ScenarioSelection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ScenarioSelection::Ingestion => f.write_str("ingestion"),
            ScenarioSelection::Discovery => f.write_str("discovery"),
            ScenarioSelection::Both => f.write_str("both"),
        }
    }
}

/// Allow `--scenario` from the command line using text variations on the
/// supported selections.
impl FromStr for ScenarioSelection {
    type Err = LoadTestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let selection = RegexSet::new([
            r"(?i)^(ingestion|ingest|events?|a)$",
            r"(?i)^(discovery|discover|communities|b)$",
            r"(?i)^(both|all)$",
        ])
        .expect("failed to compile scenario RegexSet");
        let matches = selection.matches(s.trim());
        if matches.matched(0) {
            Ok(ScenarioSelection::Ingestion)
        } else if matches.matched(1) {
            Ok(ScenarioSelection::Discovery)
        } else if matches.matched(2) {
            Ok(ScenarioSelection::Both)
        } else {
            Err(LoadTestError::InvalidOption {
                option: "--scenario".to_string(),
                value: s.to_string(),
                detail: format!(
                    "Invalid scenario, expected: {}, or both",
                    Scenario::iter().map(|s| s.name()).join(", ")
                ),
            })
        }
    }
}

/// Explicit community ids to target instead of fetching them from the api.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct CommunityIds {
    pub ids: Vec<String>,
}

/// Implement [`FromStr`] to convert a `"foo,bar"` comma separated string to a
/// list of ids.
impl FromStr for CommunityIds {
    type Err = LoadTestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ids: Vec<String> = s
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        if ids.is_empty() {
            return Err(LoadTestError::InvalidOption {
                option: "--community-ids".to_string(),
                value: s.to_string(),
                detail: "Expected format: --community-ids \"{one},{two},{three}\"".to_string(),
            });
        }
        Ok(CommunityIds { ids })
    }
}

/// Validated, immutable settings for a load test run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub selection: ScenarioSelection,
    pub concurrency: usize,
    /// Seconds requested with `--duration`.
    pub run_time: usize,
    /// Base url without a trailing slash.
    pub base_url: String,
    pub token: String,
    pub community_ids: Option<Vec<String>>,
    pub request_timeout: Duration,
    pub scenario_pause: Duration,
}

impl RunSettings {
    /// Seconds each scenario runs: when running both, each gets half of the
    /// requested duration.
    pub fn scenario_run_time(&self) -> usize {
        match self.selection {
            ScenarioSelection::Both => self.run_time / 2,
            _ => self.run_time,
        }
    }
}

impl LoadTestConfiguration {
    /// Validate the configured options, filling in defaults, and return the
    /// immutable settings the load test runs with.
    pub fn resolve(&self) -> Result<RunSettings, LoadTestError> {
        // Can't set both --verbose and --quiet.
        if self.verbose > 0 && self.quiet > 0 {
            return Err(LoadTestError::InvalidOption {
                option: "--verbose".to_string(),
                value: self.verbose.to_string(),
                detail: "--verbose can not be set with --quiet.".to_string(),
            });
        }

        let concurrency = self.concurrency.unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            return Err(LoadTestError::InvalidOption {
                option: "--concurrency".to_string(),
                value: concurrency.to_string(),
                detail: "--concurrency must be set to at least 1.".to_string(),
            });
        }

        let run_time = parse_time_option("--duration", &self.duration, DEFAULT_DURATION)?;
        let scenario_pause = parse_time_option(
            "--scenario-pause",
            &self.scenario_pause,
            DEFAULT_SCENARIO_PAUSE,
        )?;

        if self.token.trim().is_empty() {
            return Err(LoadTestError::InvalidOption {
                option: "--token".to_string(),
                value: self.token.clone(),
                detail: "A jwt bearer token must be defined via the --token option.".to_string(),
            });
        }

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        if !timeout.is_finite() || timeout <= 0.0 {
            return Err(LoadTestError::InvalidOption {
                option: "--timeout".to_string(),
                value: timeout.to_string(),
                detail: "--timeout must be greater than 0.".to_string(),
            });
        }
        let request_timeout =
            Duration::try_from_secs_f64(timeout).map_err(|e| LoadTestError::InvalidOption {
                option: "--timeout".to_string(),
                value: timeout.to_string(),
                detail: format!("--timeout is out of range: {}.", e),
            })?;

        let base_url = validate_base_url(if self.url.is_empty() {
            DEFAULT_BASE_URL
        } else {
            &self.url
        })?;

        Ok(RunSettings {
            selection: self.scenario.unwrap_or(ScenarioSelection::Both),
            concurrency,
            run_time,
            base_url,
            token: self.token.trim().to_string(),
            community_ids: self.community_ids.as_ref().map(|c| c.ids.clone()),
            request_timeout,
            scenario_pause: Duration::from_secs(scenario_pause as u64),
        })
    }

    /// Initialize the logger which writes to standard out and optionally to a
    /// log file.
    pub(crate) fn initialize_logger(&self) {
        initialize_logger(self.verbose, self.quiet, self.log_level, &self.log_file);
    }
}

fn parse_time_option(option: &str, value: &str, default: usize) -> Result<usize, LoadTestError> {
    if value.is_empty() {
        return Ok(default);
    }
    util::parse_timespan(value).ok_or_else(|| LoadTestError::InvalidOption {
        option: option.to_string(),
        value: value.to_string(),
        detail: format!(
            "{} must be formatted as seconds or as a combination of h, m and s (30, 30s, 1m30s).",
            option
        ),
    })
}

/// Confirm the base url parses and is http(s), returning it without a
/// trailing slash.
pub(crate) fn validate_base_url(base_url: &str) -> Result<String, LoadTestError> {
    let parsed = Url::parse(base_url).map_err(|parse_error| LoadTestError::InvalidHost {
        host: base_url.to_string(),
        detail: "Invalid base url, expected format: http://host:port".to_string(),
        parse_error,
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(base_url.trim_end_matches('/').to_string()),
        scheme => Err(LoadTestError::InvalidOption {
            option: "--url".to_string(),
            value: base_url.to_string(),
            detail: format!("Unsupported scheme {}, expected http or https.", scheme),
        }),
    }
}

/// Initialize the logger: standard out at a level controlled by `verbose` and
/// `quiet`, and an optional log file at a level controlled by `log_level`.
pub(crate) fn initialize_logger(verbose: u8, quiet: u8, log_level: u8, log_file: &str) {
    // Configure debug output level.
    let debug_level = match verbose {
        0 => match quiet {
            0 => LevelFilter::Info,
            _ => LevelFilter::Warn,
        },
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    // Configure log file level.
    let file_level = match log_level {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut loggers: Vec<Box<dyn SharedLogger>> =
        vec![SimpleLogger::new(debug_level, Config::default())];

    let log_path: Option<PathBuf> = if log_file.is_empty() {
        None
    } else {
        Some(PathBuf::from(log_file))
    };
    if let Some(path) = log_path.as_ref() {
        match std::fs::File::create(path) {
            Ok(file) => loggers.push(WriteLogger::new(file_level, Config::default(), file)),
            Err(e) => eprintln!("failed to create log file {}: {}", path.display(), e),
        }
    }

    if let Err(e) = CombinedLogger::init(loggers) {
        // Already initialized, for example when running multiple load tests
        // from the same process.
        debug!("failed to initialize CombinedLogger: {}", e);
    }

    if let Some(path) = log_path {
        info!("Writing to log file: {}", path.display());
    }
    info!("Output verbosity level: {}", debug_level);
    info!("Logfile verbosity level: {}", file_level);
}
