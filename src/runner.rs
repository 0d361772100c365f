//! Running a single scenario.
//!
//! A scenario moves through each [`RunnerPhase`] once: workers are launched,
//! load is maintained for the configured run time while progress is printed,
//! workers are asked to stop and given a short grace period, stragglers are
//! aborted, and finally every worker is joined.

use chrono::prelude::*;
use reqwest::{Client, RequestBuilder};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::{RunSettings, Scenario};
use crate::stats::LatencyStats;
use crate::util;
use crate::worker::{self, RequestTarget, StopSignal};
use crate::{LoadTestError, APP_USER_AGENT};

/// Idle connections kept per host beyond one per worker.
pub const POOL_HEADROOM: usize = 50;

/// How long workers get to finish their current request after being told to
/// stop, before they are aborted.
pub const GRACE_PERIOD: Duration = Duration::from_millis(500);

/// Everything needed to run one scenario.
#[derive(Clone, Debug)]
pub struct ScenarioPlan {
    pub scenario: Scenario,
    pub concurrency: usize,
    /// Seconds to maintain load.
    pub run_time: usize,
    pub base_url: String,
    pub token: String,
    pub request_timeout: Duration,
    pub target: RequestTarget,
}

impl ScenarioPlan {
    /// Plan a scenario from the run settings. Ingestion needs at least one
    /// community id to post events to.
    pub fn new(
        settings: &RunSettings,
        scenario: Scenario,
        community_ids: Option<Arc<[String]>>,
    ) -> Result<Self, LoadTestError> {
        let target = match scenario {
            Scenario::Ingestion => match community_ids {
                Some(community_ids) if !community_ids.is_empty() => {
                    RequestTarget::Ingestion { community_ids }
                }
                _ => {
                    return Err(LoadTestError::NoCommunities {
                        detail: "The ingestion scenario requires at least one community id."
                            .to_string(),
                    })
                }
            },
            Scenario::Discovery => RequestTarget::Discovery,
        };

        Ok(ScenarioPlan {
            scenario,
            concurrency: settings.concurrency,
            run_time: settings.scenario_run_time(),
            base_url: settings.base_url.clone(),
            token: settings.token.clone(),
            request_timeout: settings.request_timeout,
            target,
        })
    }

    /// Number of community ids ingestion posts to, 0 for discovery.
    pub fn community_count(&self) -> usize {
        match &self.target {
            RequestTarget::Ingestion { community_ids } => community_ids.len(),
            RequestTarget::Discovery => 0,
        }
    }

    /// Build an authenticated request for the next worker iteration.
    pub(crate) fn build_request<R: rand::Rng + ?Sized>(
        &self,
        client: &Client,
        worker_id: usize,
        rng: &mut R,
    ) -> RequestBuilder {
        self.target
            .build_request(client, &self.base_url, worker_id, rng)
            .bearer_auth(&self.token)
            .timeout(self.request_timeout)
    }
}

/// A scenario moves through each of the following phases exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunnerPhase {
    /// Nothing launched yet.
    Idle,
    /// Workers are generating load and progress is being displayed.
    Running,
    /// The stop signal is raised, workers are finishing their current request.
    Draining,
    /// Workers still running after the grace period are aborted.
    Cancelling,
    /// All workers have been joined.
    Done,
}

/// The outcome of one finished scenario.
#[derive(Debug)]
pub struct ScenarioResult {
    pub scenario: Scenario,
    pub concurrency: usize,
    /// Seconds load was configured to run.
    pub run_time: usize,
    pub stats: Arc<LatencyStats>,
    /// Workers still running after the grace period.
    pub workers_cancelled: usize,
    pub started: Option<DateTime<Local>>,
    pub stopped: Option<DateTime<Local>>,
}

struct ScenarioRunner {
    plan: Arc<ScenarioPlan>,
    phase: RunnerPhase,
    stats: Arc<LatencyStats>,
    stop: StopSignal,
    workers: Vec<JoinHandle<()>>,
    workers_cancelled: usize,
    /// Drives the progress loop, reset when load starts.
    load_started: tokio::time::Instant,
    started: Option<DateTime<Local>>,
    stopped: Option<DateTime<Local>>,
}

impl ScenarioRunner {
    fn new(plan: ScenarioPlan) -> Self {
        ScenarioRunner {
            plan: Arc::new(plan),
            phase: RunnerPhase::Idle,
            stats: Arc::new(LatencyStats::new()),
            stop: StopSignal::new(),
            workers: Vec::new(),
            workers_cancelled: 0,
            load_started: tokio::time::Instant::now(),
            started: None,
            stopped: None,
        }
    }

    fn set_phase(&mut self, phase: RunnerPhase) {
        if self.phase == phase {
            return;
        }
        debug!("entering {} phase: {:?}", self.plan.scenario, phase);
        self.phase = phase;
    }

    /// Build the shared client and spawn one task per worker.
    fn launch_workers(&mut self) -> Result<(), LoadTestError> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .pool_max_idle_per_host(self.plan.concurrency + POOL_HEADROOM)
            .build()?;

        info!(
            "launching {} {} workers...",
            util::format_number(self.plan.concurrency),
            self.plan.scenario
        );
        self.started = Some(Local::now());
        self.load_started = tokio::time::Instant::now();
        self.workers = (0..self.plan.concurrency)
            .map(|worker_id| {
                tokio::spawn(worker::worker_main(
                    worker_id,
                    client.clone(),
                    Arc::clone(&self.plan),
                    Arc::clone(&self.stats),
                    self.stop.clone(),
                ))
            })
            .collect();

        self.set_phase(RunnerPhase::Running);
        Ok(())
    }

    /// Maintain load until the run time elapses or ctrl-c is caught, printing
    /// progress about once a second.
    async fn maintain_load(&mut self) {
        let run_time = Duration::from_secs(self.plan.run_time as u64);
        let mut drift_timer = tokio::time::Instant::now();
        self.print_progress();
        loop {
            let elapsed = self.load_started.elapsed();
            if elapsed >= run_time {
                break;
            }
            if util::canceled() {
                info!("stopping {} scenario early", self.plan.scenario);
                break;
            }
            let tick = (run_time - elapsed).min(Duration::from_secs(1));
            drift_timer = util::sleep_minus_drift(tick, drift_timer).await;
            self.print_progress();
        }
        println!();

        self.stop.raise();
        self.set_phase(RunnerPhase::Draining);
    }

    fn progress_line(&self) -> String {
        format!(
            "  progress: {}/{}s | requests: {} | errors: {}",
            self.load_started.elapsed().as_secs(),
            self.plan.run_time,
            util::format_number(self.stats.requests()),
            util::format_number(self.stats.failures()),
        )
    }

    fn print_progress(&self) {
        print!("\r{}", self.progress_line());
        if let Err(e) = std::io::stdout().flush() {
            debug!("failed to flush progress: {}", e);
        }
    }

    /// Give workers the grace period to finish their current request.
    async fn drain(&mut self) {
        tokio::time::sleep(GRACE_PERIOD).await;
        self.set_phase(RunnerPhase::Cancelling);
    }

    /// Abort any worker still running and join them all.
    async fn cancel(&mut self) {
        let workers = std::mem::take(&mut self.workers);
        for handle in workers.iter().filter(|handle| !handle.is_finished()) {
            handle.abort();
            self.workers_cancelled += 1;
        }
        if self.workers_cancelled > 0 {
            debug!(
                "aborted {} {} workers after the grace period",
                self.workers_cancelled, self.plan.scenario
            );
        }

        for result in futures::future::join_all(workers).await {
            match result {
                Ok(()) => (),
                // An aborted worker is stopped, not failed.
                Err(e) if e.is_cancelled() => (),
                Err(e) => warn!("{} worker failed: {}", self.plan.scenario, e),
            }
        }

        self.stopped = Some(Local::now());
        self.set_phase(RunnerPhase::Done);
    }

    fn into_result(self) -> ScenarioResult {
        ScenarioResult {
            scenario: self.plan.scenario,
            concurrency: self.plan.concurrency,
            run_time: self.plan.run_time,
            stats: self.stats,
            workers_cancelled: self.workers_cancelled,
            started: self.started,
            stopped: self.stopped,
        }
    }
}

/// Run one scenario to completion and return its result.
pub async fn run_scenario(plan: ScenarioPlan) -> Result<ScenarioResult, LoadTestError> {
    let mut runner = ScenarioRunner::new(plan);
    loop {
        match runner.phase {
            RunnerPhase::Idle => runner.launch_workers()?,
            RunnerPhase::Running => runner.maintain_load().await,
            RunnerPhase::Draining => runner.drain().await,
            RunnerPhase::Cancelling => runner.cancel().await,
            RunnerPhase::Done => break,
        }
    }
    Ok(runner.into_result())
}
