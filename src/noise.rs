//! A one-shot generator of background activity.
//!
//! Unlike the load test, the noise generator sends events one at a time with a
//! delay between them. Events look like real traffic: the event type follows
//! the weighted distribution, and some events carry a weight or metadata.
//! Only `201 Created` counts as a successful event.

use gumdrop::Options;
use itertools::Itertools;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::communities::{fetch_community_ids, NOISE_COMMUNITY_LIMIT};
use crate::config::{initialize_logger, validate_base_url, DEFAULT_BASE_URL};
use crate::event::weighted_event;
use crate::util::{round2, truncate_chars};
use crate::worker::{EVENTS_PATH, MAX_ERROR_CHARS};
use crate::{LoadTestError, APP_USER_AGENT};

/// Events sent when `--count` isn't set.
pub const DEFAULT_EVENT_COUNT: usize = 50;
/// Milliseconds between events when `--delay` isn't set.
pub const DEFAULT_DELAY_MS: u64 = 100;
/// Per-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Probability that an event carries a weight.
const WEIGHT_PROBABILITY: f64 = 0.3;
/// Probability that an event carries metadata.
const METADATA_PROBABILITY: f64 = 0.5;
const SOURCES: [&str; 3] = ["web", "mobile", "api"];

/// Runtime options available when generating noise.
#[derive(Options, Debug, Clone, Default)]
#[options(help = r#"Generates noise events for Pulse momentum testing.

examples:
  pulse-noise --community-id abc123 --token eyJ...
  pulse-noise --random --count 100 --token eyJ...
  pulse-noise --community-id abc123 --token eyJ... --verbose --delay 50

The following runtime options are available:"#)]
pub struct NoiseConfiguration {
    /// Displays this help
    #[options(short = "h")]
    pub help: bool,
    /// Targets a single community id
    #[options(short = "c", meta = "ID")]
    pub community_id: String,
    /// Distributes events randomly across all available communities
    #[options(short = "r")]
    pub random: bool,
    /// Sets jwt bearer token for authentication (required)
    #[options(short = "t", meta = "TOKEN")]
    pub token: String,
    /// Defines base url of the api (default: http://localhost:8080)
    #[options(short = "u", meta = "URL")]
    pub base_url: String,
    /// Sets number of events to generate (default: 50)
    #[options(short = "n")]
    pub count: Option<usize>,
    /// Sets delay between events, in milliseconds (default: 100)
    #[options(short = "d", meta = "MS")]
    pub delay: Option<u64>,
    /// Prints detailed output for each event
    #[options(short = "v")]
    pub verbose: bool,
}

/// Where noise events are sent.
#[derive(Clone, Debug, PartialEq)]
pub enum NoiseTarget {
    Community(String),
    /// Random communities fetched from the api.
    Random,
}

/// Validated noise generator settings.
#[derive(Clone, Debug, PartialEq)]
pub struct NoiseSettings {
    pub target: NoiseTarget,
    pub token: String,
    pub base_url: String,
    pub count: usize,
    pub delay: Duration,
    pub verbose: bool,
}

impl NoiseConfiguration {
    pub fn resolve(&self) -> Result<NoiseSettings, LoadTestError> {
        let community_id = self.community_id.trim();
        let target = match (community_id.is_empty(), self.random) {
            (false, false) => NoiseTarget::Community(community_id.to_string()),
            (true, true) => NoiseTarget::Random,
            (false, true) => {
                return Err(LoadTestError::InvalidOption {
                    option: "--random".to_string(),
                    value: "true".to_string(),
                    detail: "--random can not be set with --community-id.".to_string(),
                })
            }
            (true, false) => {
                return Err(LoadTestError::InvalidOption {
                    option: "--community-id".to_string(),
                    value: String::new(),
                    detail: "One of --community-id or --random is required.".to_string(),
                })
            }
        };

        if self.token.trim().is_empty() {
            return Err(LoadTestError::InvalidOption {
                option: "--token".to_string(),
                value: self.token.clone(),
                detail: "A jwt bearer token must be defined via the --token option.".to_string(),
            });
        }

        let base_url = validate_base_url(if self.base_url.is_empty() {
            DEFAULT_BASE_URL
        } else {
            &self.base_url
        })?;

        Ok(NoiseSettings {
            target,
            token: self.token.trim().to_string(),
            base_url,
            count: self.count.unwrap_or(DEFAULT_EVENT_COUNT),
            delay: Duration::from_millis(self.delay.unwrap_or(DEFAULT_DELAY_MS)),
            verbose: self.verbose,
        })
    }
}

/// Optional metadata attached to some noise events.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NoiseMetadata {
    pub source: &'static str,
    pub session_id: String,
}

/// One generated event.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NoiseEvent {
    pub community_id: String,
    pub event_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<NoiseMetadata>,
}

/// A weight for 30% of events: uniform in `[0.1, 5.0]`, rounded to 2
/// decimals.
pub fn random_weight<R: Rng + ?Sized>(rng: &mut R) -> Option<f64> {
    if rng.random::<f64>() < WEIGHT_PROBABILITY {
        Some(round2(rng.random_range(0.1..=5.0)))
    } else {
        None
    }
}

/// Metadata for 50% of events: a random source and session id.
pub fn random_metadata<R: Rng + ?Sized>(rng: &mut R) -> Option<NoiseMetadata> {
    if rng.random::<f64>() < METADATA_PROBABILITY {
        Some(NoiseMetadata {
            source: SOURCES[rng.random_range(0..SOURCES.len())],
            session_id: format!("sess_{}", rng.random_range(1_000..=9_999)),
        })
    } else {
        None
    }
}

impl NoiseEvent {
    /// Generate an event for one of `community_ids`, which must not be empty.
    pub fn random<R: Rng + ?Sized>(community_ids: &[String], rng: &mut R) -> Self {
        let community_id = community_ids[rng.random_range(0..community_ids.len())].clone();
        NoiseEvent {
            community_id,
            event_type: weighted_event(rng),
            weight: random_weight(rng),
            metadata: random_metadata(rng),
        }
    }
}

/// Counts of sent events.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NoiseStats {
    pub success: usize,
    pub failed: usize,
    /// Successful events per event type.
    pub by_type: HashMap<String, usize>,
    /// Successful events per community id.
    pub by_community: HashMap<String, usize>,
}

impl NoiseStats {
    fn record_success(&mut self, event: &NoiseEvent) {
        self.success += 1;
        *self.by_type.entry(event.event_type.to_string()).or_insert(0) += 1;
        *self
            .by_community
            .entry(event.community_id.clone())
            .or_insert(0) += 1;
    }
}

/// Largest count first, ties by name.
fn by_count(counts: &HashMap<String, usize>) -> Vec<(&String, &usize)> {
    counts
        .iter()
        .sorted_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)))
        .collect()
}

impl fmt::Display for NoiseStats {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        writeln!(fmt, "\n{}", "=".repeat(50))?;
        writeln!(fmt, "NOISE GENERATION SUMMARY")?;
        writeln!(fmt, "{}", "=".repeat(50))?;
        writeln!(fmt, "   successful: {}", self.success)?;
        writeln!(fmt, "   failed: {}", self.failed)?;

        if !self.by_type.is_empty() {
            writeln!(fmt, "\n   events by type:")?;
            for (event_type, count) in by_count(&self.by_type) {
                writeln!(fmt, "      {}: {}", event_type, count)?;
            }
        }

        // A single community is the one that was targeted, nothing to break down.
        if self.by_community.len() > 1 {
            writeln!(fmt, "\n   events by community:")?;
            for (community_id, count) in by_count(&self.by_community) {
                writeln!(fmt, "      {}...: {}", truncate_chars(community_id, 8), count)?;
            }
        }

        write!(fmt, "{}", "=".repeat(50))
    }
}

/// Sends noise events.
pub struct NoiseGenerator {
    configuration: NoiseConfiguration,
}

impl NoiseGenerator {
    /// Load configuration from the command line.
    pub fn initialize() -> Result<NoiseGenerator, LoadTestError> {
        Ok(NoiseGenerator {
            configuration: NoiseConfiguration::parse_args_default_or_exit(),
        })
    }

    pub fn initialize_with_config(
        configuration: NoiseConfiguration,
    ) -> Result<NoiseGenerator, LoadTestError> {
        Ok(NoiseGenerator { configuration })
    }

    /// Send the configured number of events and print a summary.
    pub fn execute(self) -> Result<NoiseStats, LoadTestError> {
        initialize_logger(u8::from(self.configuration.verbose), 0, 0, "");
        let settings = self.configuration.resolve()?;
        debug!("resolved settings: {:?}", settings);

        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(generate_noise(settings))
    }
}

async fn generate_noise(settings: NoiseSettings) -> Result<NoiseStats, LoadTestError> {
    let client = Client::builder()
        .user_agent(APP_USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .build()?;

    let community_ids = match &settings.target {
        NoiseTarget::Community(community_id) => vec![community_id.clone()],
        NoiseTarget::Random => {
            println!("fetching communities from {}...", settings.base_url);
            let ids = fetch_community_ids(
                &client,
                &settings.base_url,
                &settings.token,
                NOISE_COMMUNITY_LIMIT,
            )
            .await;
            if ids.is_empty() {
                return Err(LoadTestError::NoCommunities {
                    detail: "create some first or check your token.".to_string(),
                });
            }
            println!("   found {} communities", ids.len());
            ids
        }
    };

    println!(
        "\ngenerating {} events across {} community(ies)...",
        settings.count,
        community_ids.len()
    );
    println!("   delay between events: {}ms\n", settings.delay.as_millis());

    let mut rng = StdRng::from_rng(&mut rand::rng());
    let url = format!("{}{}", settings.base_url, EVENTS_PATH);
    let mut stats = NoiseStats::default();

    for i in 0..settings.count {
        let position = i + 1;
        let event = NoiseEvent::random(&community_ids, &mut rng);

        match client
            .post(&url)
            .bearer_auth(&settings.token)
            .json(&event)
            .send()
            .await
        {
            Ok(response) if response.status() == StatusCode::CREATED => {
                stats.record_success(&event);
                if settings.verbose {
                    println!(
                        "  [{}/{}] {} -> {}...",
                        position,
                        settings.count,
                        event.event_type,
                        truncate_chars(&event.community_id, 8)
                    );
                }
            }
            Ok(response) => {
                stats.failed += 1;
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                if settings.verbose {
                    println!(
                        "  [{}/{}] {} failed: status={}: {}",
                        position,
                        settings.count,
                        event.event_type,
                        status,
                        truncate_chars(&body, MAX_ERROR_CHARS)
                    );
                }
            }
            Err(e) => {
                stats.failed += 1;
                if settings.verbose {
                    println!("  [{}/{}] error: {}", position, settings.count, e);
                }
            }
        }

        if !settings.verbose && position % 10 == 0 {
            println!(
                "   progress: {}/{} ({:.0}%)",
                position,
                settings.count,
                position as f64 / settings.count as f64 * 100.0
            );
        }

        if !settings.delay.is_zero() && position < settings.count {
            tokio::time::sleep(settings.delay).await;
        }
    }

    println!("{}\n", stats);
    Ok(stats)
}
