use pulse_loadtest::{LoadTest, LoadTestError};

fn main() {
    match LoadTest::initialize().and_then(|load_test| load_test.execute()) {
        // Missed latency budgets are reported, not failures.
        Ok(_) => (),
        Err(e @ LoadTestError::NoCommunities { .. }) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(2);
        }
    }
}
