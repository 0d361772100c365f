use std::sync::Arc;

use pulse_loadtest::stats::LatencyStats;

const TASKS: usize = 50;
const RECORDS_PER_TASK: usize = 1_000;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
/// Concurrent recording from many tasks loses no updates.
async fn test_concurrent_recording() {
    let stats = Arc::new(LatencyStats::new());

    let handles: Vec<_> = (0..TASKS)
        .map(|task| {
            let stats = Arc::clone(&stats);
            tokio::spawn(async move {
                for i in 0..RECORDS_PER_TASK {
                    stats.record_success((task * RECORDS_PER_TASK + i) as f64);
                    if i % 100 == 0 {
                        stats.record_failure(format!("task {} failure {}", task, i));
                    }
                    if i % 250 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        })
        .collect();
    for result in futures::future::join_all(handles).await {
        result.unwrap();
    }

    let expected_successes = TASKS * RECORDS_PER_TASK;
    let expected_failures = TASKS * RECORDS_PER_TASK / 100;
    assert_eq!(stats.successes(), expected_successes);
    assert_eq!(stats.latencies().len(), expected_successes);
    assert_eq!(stats.failures(), expected_failures);
    assert_eq!(stats.requests(), expected_successes + expected_failures);
    assert_eq!(stats.errors().len(), 10);

    // Every distinct sample was recorded once.
    let mut latencies = stats.latencies();
    latencies.sort_by(f64::total_cmp);
    latencies.dedup();
    assert_eq!(latencies.len(), expected_successes);
    assert_eq!(stats.percentile(0.0), 0.0);
    assert_eq!(stats.percentile(100.0), (expected_successes - 1) as f64);
}
