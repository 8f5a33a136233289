//! Minimal client for the API-Football `fixtures` endpoint

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::source::FixtureSyncSource;
use crate::models::FixtureResult;

/// The endpoint accepts at most this many ids per request
pub const IDS_PER_REQUEST: usize = 20;

const TIMEZONE: &str = "America/Sao_Paulo";

#[derive(Debug, Deserialize)]
struct FixturesResponse {
    response: Vec<FixtureEntry>,
}

#[derive(Debug, Deserialize)]
struct FixtureEntry {
    fixture: FixtureMeta,
    score: Score,
}

#[derive(Debug, Deserialize)]
struct FixtureMeta {
    id: u64,
    status: StatusMeta,
}

#[derive(Debug, Deserialize)]
struct StatusMeta {
    short: String,
}

#[derive(Debug, Deserialize)]
struct Score {
    fulltime: Goals,
}

#[derive(Debug, Deserialize)]
struct Goals {
    home: Option<u32>,
    away: Option<u32>,
}

impl From<FixtureEntry> for FixtureResult {
    fn from(entry: FixtureEntry) -> Self {
        FixtureResult {
            external_id: entry.fixture.id.to_string(),
            status: entry.fixture.status.short,
            home_score: entry.score.fulltime.home,
            away_score: entry.score.fulltime.away,
        }
    }
}

pub struct ApiFootballSource {
    client: Client,
    base_url: String,
    api_key: String,
    /// Only fixtures in one of these statuses are requested
    finished_statuses: Vec<String>,
}

impl ApiFootballSource {
    pub fn new(base_url: &str, api_key: &str, finished_statuses: Vec<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            finished_statuses,
        })
    }

    fn is_rapid_api(&self) -> bool {
        self.base_url.contains("rapidapi")
    }

    async fn fetch_batch(&self, ids: &[String]) -> Result<Vec<FixtureResult>> {
        let mut request = self.client.get(format!("{}/fixtures", self.base_url)).query(&[
            ("timezone", TIMEZONE.to_string()),
            ("status", self.finished_statuses.join("-")),
            ("ids", ids.join("-")),
        ]);
        request = if self.is_rapid_api() {
            request
                .header("x-rapidapi-host", "v3.football.api-sports.io")
                .header("x-rapidapi-key", &self.api_key)
        } else {
            request.header("x-apisports-key", &self.api_key)
        };

        let response = request.send().await.context("fixtures request failed")?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Failed to retrieve fixtures: {} - {}", status, error_text));
        }

        let body: FixturesResponse = response.json().await.context("invalid fixtures payload")?;
        Ok(body.response.into_iter().map(FixtureResult::from).collect())
    }
}

#[async_trait]
impl FixtureSyncSource for ApiFootballSource {
    async fn fetch_results(&self, external_ids: &[String]) -> Result<Vec<FixtureResult>> {
        let mut results = Vec::with_capacity(external_ids.len());
        for batch in external_ids.chunks(IDS_PER_REQUEST) {
            results.extend(self.fetch_batch(batch).await?);
        }
        Ok(results)
    }

    fn name(&self) -> &str {
        &self.base_url
    }
}
