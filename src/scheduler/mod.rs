//! Delayed task scheduling
//!
//! Tasks are delivered at least once; every handler is idempotent.

pub mod watcher;

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::models::PoolId;

pub use watcher::ResultWatcher;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Fetch the result of one fixture and settle its pools once finished
    CheckResult { external_id: String, attempt: u32 },
    SettlePool { pool_id: PoolId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum When {
    At(DateTime<Utc>),
    After(Duration),
}

impl When {
    /// Time left until the task is due; zero when already due.
    pub fn delay_from(&self, now: DateTime<Utc>) -> Duration {
        match self {
            When::At(at) => (*at - now).to_std().unwrap_or(Duration::ZERO),
            When::After(delay) => *delay,
        }
    }
}

#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn schedule(&self, task: Task, when: When) -> Result<()>;
}

/// Timer per task feeding one channel
pub struct TokioScheduler {
    tx: mpsc::UnboundedSender<Task>,
}

impl TokioScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Task>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn schedule(&self, task: Task, when: When) -> Result<()> {
        if self.tx.is_closed() {
            return Err(anyhow::anyhow!("task channel closed"));
        }
        let delay = when.delay_from(Utc::now());
        log::debug!("Scheduling {:?} in {:?}", task, delay);

        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = tx.send(task).context("task channel closed") {
                log::warn!("Dropped scheduled task: {:#}", e);
            }
        });
        Ok(())
    }
}
