use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::FixtureResult;

/// Sports-data provider
#[async_trait]
pub trait FixtureSyncSource: Send + Sync {
    /// Final results for the given external fixture ids. Fixtures that have
    /// not finished may be missing from the answer.
    async fn fetch_results(&self, external_ids: &[String]) -> Result<Vec<FixtureResult>>;

    fn name(&self) -> &str;
}

/// Ordered list of providers; the first one that answers wins.
pub struct FailoverSource {
    sources: Vec<Arc<dyn FixtureSyncSource>>,
}

impl FailoverSource {
    pub fn new(sources: Vec<Arc<dyn FixtureSyncSource>>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl FixtureSyncSource for FailoverSource {
    async fn fetch_results(&self, external_ids: &[String]) -> Result<Vec<FixtureResult>> {
        let mut last_err = anyhow!("no fixture source configured");
        for source in &self.sources {
            match source.fetch_results(external_ids).await {
                Ok(results) => return Ok(results),
                Err(e) => {
                    log::warn!("Fixture source {} failed: {:#}", source.name(), e);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    fn name(&self) -> &str {
        "failover"
    }
}

/// In-memory source for tests
pub struct MockFixtureSource {
    name: String,
    results: Mutex<HashMap<String, FixtureResult>>,
    fail: Mutex<bool>,
    calls: Mutex<u32>,
}

impl MockFixtureSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            results: Mutex::new(HashMap::new()),
            fail: Mutex::new(false),
            calls: Mutex::new(0),
        }
    }

    pub fn set_result(&self, result: FixtureResult) {
        self.results.lock().unwrap().insert(result.external_id.clone(), result);
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl FixtureSyncSource for MockFixtureSource {
    async fn fetch_results(&self, external_ids: &[String]) -> Result<Vec<FixtureResult>> {
        *self.calls.lock().unwrap() += 1;
        if *self.fail.lock().unwrap() {
            return Err(anyhow!("{}: unavailable", self.name));
        }
        let results = self.results.lock().unwrap();
        Ok(external_ids.iter().filter_map(|id| results.get(id).cloned()).collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
