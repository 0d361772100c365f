//! Discovering which communities to send events to.

use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::worker::COMMUNITIES_PATH;

/// How many communities the load test asks for.
pub const LOAD_TEST_COMMUNITY_LIMIT: usize = 50;
/// How many communities the noise generator asks for.
pub const NOISE_COMMUNITY_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
struct CommunityList {
    #[serde(default)]
    communities: Vec<Community>,
}

#[derive(Debug, Deserialize)]
struct Community {
    id: String,
}

/// Fetch up to `limit` community ids from the discovery endpoint.
///
/// Any failure, whether transport, status, or body, is logged and yields an
/// empty list: callers decide whether running without communities is fatal.
pub async fn fetch_community_ids(
    client: &Client,
    base_url: &str,
    token: &str,
    limit: usize,
) -> Vec<String> {
    let url = format!("{}{}", base_url, COMMUNITIES_PATH);
    let response = match client
        .get(&url)
        .bearer_auth(token)
        .query(&[("limit", limit)])
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            warn!("failed to fetch communities from {}: {}", url, e);
            return Vec::new();
        }
    };

    if response.status() != StatusCode::OK {
        warn!("failed to fetch communities: {}", response.status().as_u16());
        return Vec::new();
    }

    match response.json::<CommunityList>().await {
        Ok(list) => list.communities.into_iter().map(|c| c.id).collect(),
        Err(e) => {
            warn!("failed to parse communities: {}", e);
            Vec::new()
        }
    }
}
