//! Request workers that repeatedly hit one endpoint until told to stop.
//!
//! A worker loops: build a request for its [`RequestTarget`], time it until the
//! response head arrives, classify the result into a [`RequestOutcome`] and
//! record it in the scenario's shared [`LatencyStats`], sleep a small random
//! jitter, then check the [`StopSignal`]. The signal is only checked between
//! requests so an in-flight request always completes normally.

use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Scenario;
use crate::event::weighted_event;
use crate::runner::ScenarioPlan;
use crate::stats::LatencyStats;
use crate::util::truncate_chars;

/// Event ingestion endpoint, relative to the base url.
pub const EVENTS_PATH: &str = "/api/v1/events";
/// Community discovery endpoint, relative to the base url.
pub const COMMUNITIES_PATH: &str = "/api/v1/communities";

/// Page sizes requested by discovery workers.
pub const PAGE_LIMITS: [u32; 3] = [10, 20, 50];
/// Page offsets requested by discovery workers: most requests are for the
/// first page.
pub const PAGE_OFFSETS: [u32; 5] = [0, 0, 0, 10, 20];

/// Error descriptions and response bodies are truncated to this many
/// characters.
pub const MAX_ERROR_CHARS: usize = 100;

/// Milliseconds slept between requests.
const JITTER_MS: RangeInclusive<u64> = 1..=10;

/// Shared flag telling every worker of a scenario to exit after its current
/// request. Raised once by the runner, never lowered.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a worker requests on each iteration.
#[derive(Clone, Debug)]
pub enum RequestTarget {
    /// `POST /api/v1/events` for a random community.
    Ingestion { community_ids: Arc<[String]> },
    /// `GET /api/v1/communities` with a random page.
    Discovery,
}

#[derive(Debug, Serialize)]
struct IngestionEvent<'a> {
    community_id: &'a str,
    event_type: &'a str,
    metadata: WorkerMetadata,
}

#[derive(Debug, Serialize)]
struct WorkerMetadata {
    worker_id: usize,
    source: &'static str,
}

impl RequestTarget {
    pub fn scenario(&self) -> Scenario {
        match self {
            RequestTarget::Ingestion { .. } => Scenario::Ingestion,
            RequestTarget::Discovery => Scenario::Discovery,
        }
    }

    /// Build the next request, choosing the randomized parts of it with `rng`.
    /// Authentication and timeout are added by the caller.
    pub fn build_request<R: Rng + ?Sized>(
        &self,
        client: &Client,
        base_url: &str,
        worker_id: usize,
        rng: &mut R,
    ) -> RequestBuilder {
        match self {
            RequestTarget::Ingestion { community_ids } => {
                let community_id = community_ids
                    .choose(rng)
                    .map(String::as_str)
                    .unwrap_or_default();
                let event = IngestionEvent {
                    community_id,
                    event_type: weighted_event(rng),
                    metadata: WorkerMetadata {
                        worker_id,
                        source: "load_test",
                    },
                };
                client
                    .post(format!("{}{}", base_url, EVENTS_PATH))
                    .json(&event)
            }
            RequestTarget::Discovery => {
                let limit = PAGE_LIMITS[rng.random_range(0..PAGE_LIMITS.len())];
                let offset = PAGE_OFFSETS[rng.random_range(0..PAGE_OFFSETS.len())];
                client
                    .get(format!("{}{}", base_url, COMMUNITIES_PATH))
                    .query(&[("limit", limit), ("offset", offset)])
            }
        }
    }

    /// Whether a response status counts as a successful request.
    pub fn accepts(&self, status: StatusCode) -> bool {
        match self {
            RequestTarget::Ingestion { .. } => matches!(
                status,
                StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED
            ),
            RequestTarget::Discovery => status == StatusCode::OK,
        }
    }
}

/// The classified result of one request.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestOutcome {
    /// Latency in milliseconds until the response head arrived.
    Success(f64),
    /// Short description of what went wrong.
    Failure(String),
}

impl RequestOutcome {
    /// Classify a response that arrived after `latency_ms`.
    ///
    /// Successful bodies are drained so the connection returns to the pool,
    /// failed bodies are read for the error description.
    pub async fn from_response(
        target: &RequestTarget,
        response: reqwest::Response,
        latency_ms: f64,
    ) -> Self {
        let status = response.status();
        if target.accepts(status) {
            if let Err(e) = response.bytes().await {
                debug!("failed to drain response body: {}", e);
            }
            RequestOutcome::Success(latency_ms)
        } else {
            match response.text().await {
                Ok(body) => RequestOutcome::from_status(status, &body),
                Err(e) if e.is_timeout() => RequestOutcome::Failure("timeout".to_string()),
                Err(e) => {
                    debug!("failed to read response body: {}", e);
                    RequestOutcome::from_status(status, "")
                }
            }
        }
    }

    /// Describe an unexpected status and its body.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        RequestOutcome::Failure(format!(
            "status={}: {}",
            status.as_u16(),
            truncate_chars(body, MAX_ERROR_CHARS)
        ))
    }

    /// Describe a request that never produced a response.
    pub fn from_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            RequestOutcome::Failure("timeout".to_string())
        } else {
            RequestOutcome::Failure(truncate_chars(&error.to_string(), MAX_ERROR_CHARS))
        }
    }

    pub fn record(self, stats: &LatencyStats) {
        match self {
            RequestOutcome::Success(latency_ms) => stats.record_success(latency_ms),
            RequestOutcome::Failure(description) => stats.record_failure(description),
        }
    }
}

/// Send requests for the plan's target until `stop` is raised.
pub(crate) async fn worker_main(
    worker_id: usize,
    client: Client,
    plan: Arc<ScenarioPlan>,
    stats: Arc<LatencyStats>,
    stop: StopSignal,
) {
    // Each worker owns a generator so the future stays Send.
    let mut rng = StdRng::from_rng(&mut rand::rng());
    trace!("launching {} worker {}", plan.scenario, worker_id);

    while !stop.is_raised() {
        let request = plan.build_request(&client, worker_id, &mut rng);
        let started = Instant::now();
        let outcome = match request.send().await {
            Ok(response) => {
                let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;
                RequestOutcome::from_response(&plan.target, response, latency_ms).await
            }
            Err(e) => RequestOutcome::from_error(&e),
        };
        outcome.record(&stats);

        let jitter = rng.random_range(JITTER_MS);
        tokio::time::sleep(Duration::from_millis(jitter)).await;
    }

    trace!("exiting {} worker {}", plan.scenario, worker_id);
}

#[cfg(test)]
mod test {
    use super::*;

    const BASE_URL: &str = "http://127.0.0.1:8080";

    fn ingestion_target() -> RequestTarget {
        RequestTarget::Ingestion {
            community_ids: vec!["c-1".to_string(), "c-2".to_string(), "c-3".to_string()].into(),
        }
    }

    #[test]
    fn stop_signal_is_shared() {
        let stop = StopSignal::new();
        let observer = stop.clone();
        assert!(!observer.is_raised());
        stop.raise();
        assert!(observer.is_raised());
        // Raising twice is harmless.
        stop.raise();
        assert!(observer.is_raised());
    }

    #[test]
    fn accepted_statuses() {
        let ingestion = ingestion_target();
        assert!(ingestion.accepts(StatusCode::OK));
        assert!(ingestion.accepts(StatusCode::CREATED));
        assert!(ingestion.accepts(StatusCode::ACCEPTED));
        assert!(!ingestion.accepts(StatusCode::NO_CONTENT));
        assert!(!ingestion.accepts(StatusCode::INTERNAL_SERVER_ERROR));

        let discovery = RequestTarget::Discovery;
        assert!(discovery.accepts(StatusCode::OK));
        assert!(!discovery.accepts(StatusCode::CREATED));
        assert!(!discovery.accepts(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn ingestion_request() {
        let client = Client::new();
        let mut rng = StdRng::seed_from_u64(3);
        let target = ingestion_target();
        assert_eq!(target.scenario(), Scenario::Ingestion);

        let request = target
            .build_request(&client, BASE_URL, 7, &mut rng)
            .build()
            .expect("valid request");
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().as_str(), "http://127.0.0.1:8080/api/v1/events");
        assert_eq!(
            request.headers()[reqwest::header::CONTENT_TYPE],
            "application/json"
        );

        let body = request
            .body()
            .and_then(|b| b.as_bytes())
            .expect("buffered body");
        let event: serde_json::Value = serde_json::from_slice(body).expect("json body");
        let community = event["community_id"].as_str().expect("community id");
        assert!(["c-1", "c-2", "c-3"].contains(&community));
        let event_type = event["event_type"].as_str().expect("event type");
        assert!(crate::event::EVENT_TYPES
            .iter()
            .any(|(name, _)| *name == event_type));
        assert_eq!(event["metadata"]["worker_id"], 7);
        assert_eq!(event["metadata"]["source"], "load_test");
    }

    #[test]
    fn discovery_request() {
        let client = Client::new();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..20 {
            let request = RequestTarget::Discovery
                .build_request(&client, BASE_URL, 0, &mut rng)
                .build()
                .expect("valid request");
            assert_eq!(request.method(), reqwest::Method::GET);
            assert_eq!(request.url().path(), COMMUNITIES_PATH);

            let pairs: Vec<(String, String)> = request
                .url()
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            assert_eq!(pairs.len(), 2);
            assert_eq!(pairs[0].0, "limit");
            assert_eq!(pairs[1].0, "offset");
            let limit: u32 = pairs[0].1.parse().expect("numeric limit");
            let offset: u32 = pairs[1].1.parse().expect("numeric offset");
            assert!(PAGE_LIMITS.contains(&limit));
            assert!(PAGE_OFFSETS.contains(&offset));
        }
    }

    #[test]
    fn status_failures_are_truncated() {
        let body = "e".repeat(500);
        match RequestOutcome::from_status(StatusCode::INTERNAL_SERVER_ERROR, &body) {
            RequestOutcome::Failure(description) => {
                assert!(description.starts_with("status=500: "));
                assert_eq!(description.len(), "status=500: ".len() + MAX_ERROR_CHARS);
            }
            RequestOutcome::Success(_) => panic!("status 500 classified as success"),
        }
        assert_eq!(
            RequestOutcome::from_status(StatusCode::UNAUTHORIZED, "unauthorized"),
            RequestOutcome::Failure("status=401: unauthorized".to_string())
        );
    }

    #[test]
    fn outcomes_are_recorded() {
        let stats = LatencyStats::new();
        RequestOutcome::Success(12.5).record(&stats);
        RequestOutcome::Failure("timeout".to_string()).record(&stats);
        assert_eq!(stats.successes(), 1);
        assert_eq!(stats.failures(), 1);
        assert_eq!(stats.latencies(), vec![12.5]);
        assert_eq!(stats.errors(), vec!["timeout".to_string()]);
    }

    #[tokio::test]
    async fn stalled_failure_body_is_a_timeout() {
        use std::io::{Read, Write};

        // Send headers for an error response, then never finish the body.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind listener");
        let address = listener.local_addr().expect("local address");
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut request = [0u8; 1024];
                let _ = stream.read(&mut request);
                let _ = stream.write_all(
                    b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 100\r\n\r\npartial",
                );
                let _ = stream.flush();
                std::thread::sleep(std::time::Duration::from_secs(2));
            }
        });

        let client = Client::new();
        let response = client
            .get(format!("http://{}{}", address, COMMUNITIES_PATH))
            .timeout(std::time::Duration::from_millis(300))
            .send()
            .await
            .expect("headers arrive before the timeout");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let outcome = RequestOutcome::from_response(&RequestTarget::Discovery, response, 1.0).await;
        assert_eq!(outcome, RequestOutcome::Failure("timeout".to_string()));
    }
}
