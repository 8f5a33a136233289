//! Periodic settlement sweep
//!
//! Safety net for result callbacks that never arrived: every interval, all
//! open pools are offered to `finalize`.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use super::engine::SettlementEngine;

pub struct SweepWorker {
    engine: Arc<SettlementEngine>,
    interval: Duration,
}

impl SweepWorker {
    pub fn new(engine: Arc<SettlementEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// One pass; returns how many pools were closed
    pub async fn run_once(&self) -> usize {
        let engine = self.engine.clone();
        match tokio::task::spawn_blocking(move || engine.sweep()).await {
            Ok(Ok(reports)) => {
                if !reports.is_empty() {
                    log::info!("Sweep closed {} pools", reports.len());
                }
                reports.len()
            }
            Ok(Err(e)) => {
                log::error!("Error scanning open pools: {}", e);
                0
            }
            Err(e) => {
                log::error!("Sweep task panicked: {}", e);
                0
            }
        }
    }

    pub async fn run(&self) {
        log::info!("Settlement sweep started (interval={:?})", self.interval);
        loop {
            self.run_once().await;
            sleep(self.interval).await;
        }
    }
}
