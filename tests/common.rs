use gumdrop::Options;
use httpmock::{Method::GET, Mock, MockServer};

use pulse_loadtest::config::LoadTestConfiguration;
use pulse_loadtest::noise::NoiseConfiguration;
use pulse_loadtest::worker::COMMUNITIES_PATH;

/// Not all functions are used by all tests, so we enable allow(dead_code) to avoid
/// compiler warnings during testing.

/// Token every test authenticates with.
pub const TOKEN: &str = "test-token";

/// The following options are configured by default, if not set to a custom value:
///  --url <mock-server>
///  --token test-token
///  --concurrency 2
///  --duration 1
///  --scenario-pause 0
#[allow(dead_code)]
pub fn build_configuration(server: &MockServer, custom: Vec<&str>) -> LoadTestConfiguration {
    // Start with an empty configuration.
    let mut configuration: Vec<&str> = vec![];
    // Declare server_url here no matter what, so its lifetime is sufficient when needed.
    let server_url = server.base_url();

    // Merge in all custom options first.
    configuration.extend_from_slice(&custom);

    // Default to using mock server if not otherwise configured.
    if !configuration.contains(&"--url") {
        configuration.extend_from_slice(&["--url", &server_url]);
    }

    if !configuration.contains(&"--token") {
        configuration.extend_from_slice(&["--token", TOKEN]);
    }

    // Default to testing with 2 workers if not otherwise configured.
    if !configuration.contains(&"--concurrency") {
        configuration.extend_from_slice(&["--concurrency", "2"]);
    }

    // Default to running for 1 second if not otherwise configured.
    if !configuration.contains(&"--duration") {
        configuration.extend_from_slice(&["--duration", "1"]);
    }

    // Don't pause between scenarios unless asked to.
    if !configuration.contains(&"--scenario-pause") {
        configuration.extend_from_slice(&["--scenario-pause", "0"]);
    }

    // Parse these options to generate a LoadTestConfiguration.
    LoadTestConfiguration::parse_args_default(&configuration)
        .expect("failed to parse options and generate a configuration")
}

/// The following options are configured by default, if not set to a custom value:
///  --base-url <mock-server>
///  --token test-token
///  --delay 0
#[allow(dead_code)]
pub fn build_noise_configuration(server: &MockServer, custom: Vec<&str>) -> NoiseConfiguration {
    let mut configuration: Vec<&str> = vec![];
    let server_url = server.base_url();

    configuration.extend_from_slice(&custom);

    if !configuration.contains(&"--base-url") {
        configuration.extend_from_slice(&["--base-url", &server_url]);
    }

    if !configuration.contains(&"--token") {
        configuration.extend_from_slice(&["--token", TOKEN]);
    }

    // Don't slow tests down unless asked to.
    if !configuration.contains(&"--delay") {
        configuration.extend_from_slice(&["--delay", "0"]);
    }

    NoiseConfiguration::parse_args_default(&configuration)
        .expect("failed to parse options and generate a configuration")
}

/// Serve a community list with the given ids from the discovery endpoint.
#[allow(dead_code)]
pub fn mock_communities<'a>(server: &'a MockServer, ids: &[&str]) -> Mock<'a> {
    let communities: Vec<serde_json::Value> = ids
        .iter()
        .map(|id| serde_json::json!({ "id": id, "name": format!("community {}", id) }))
        .collect();
    server.mock(|when, then| {
        when.method(GET).path(COMMUNITIES_PATH);
        then.status(200)
            .header("content-type", "application/json")
            .json_body(serde_json::json!({ "communities": communities }));
    })
}
