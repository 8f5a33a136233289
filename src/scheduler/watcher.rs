use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use super::{Scheduler, Task, When};
use crate::configure::WatcherConfig;
use crate::models::Fixture;
use crate::settlement::SettlementEngine;
use crate::sync::FixtureSyncSource;

/// Follows fixtures from kickoff to final whistle and settles their pools.
pub struct ResultWatcher {
    engine: Arc<SettlementEngine>,
    source: Arc<dyn FixtureSyncSource>,
    scheduler: Arc<dyn Scheduler>,
    config: WatcherConfig,
}

impl ResultWatcher {
    pub fn new(
        engine: Arc<SettlementEngine>,
        source: Arc<dyn FixtureSyncSource>,
        scheduler: Arc<dyn Scheduler>,
        config: WatcherConfig,
    ) -> Self {
        Self { engine, source, scheduler, config }
    }

    /// Store newly discovered fixtures and schedule their first result check.
    pub async fn ingest(&self, fixtures: Vec<Fixture>) -> Result<Vec<Fixture>> {
        let first_check = chrono::Duration::from_std(self.config.first_check_delay)
            .context("first check delay out of range")?;
        let mut stored = Vec::with_capacity(fixtures.len());
        for fixture in fixtures {
            let fixture = self.engine.ledger().db().upsert_fixture(fixture)?;
            self.scheduler
                .schedule(
                    Task::CheckResult { external_id: fixture.external_id.clone(), attempt: 1 },
                    When::At(fixture.kickoff + first_check),
                )
                .await?;
            stored.push(fixture);
        }
        log::info!("Ingested {} fixtures", stored.len());
        Ok(stored)
    }

    pub async fn handle(&self, task: Task) -> Result<()> {
        match task {
            Task::CheckResult { external_id, attempt } => self.check_result(external_id, attempt).await,
            Task::SettlePool { pool_id } => {
                let report = self.engine.finalize(pool_id)?;
                log::info!("Pool {} settle task: {}", pool_id, report.branch.as_ref());
                Ok(())
            }
        }
    }

    async fn check_result(&self, external_id: String, attempt: u32) -> Result<()> {
        let results = match self.source.fetch_results(std::slice::from_ref(&external_id)).await {
            Ok(results) => results,
            Err(e) => {
                log::warn!("Result fetch for fixture {} failed: {:#}", external_id, e);
                return self.recheck(external_id, attempt).await;
            }
        };

        let db = self.engine.ledger().db();
        let mut finished = None;
        for result in results.iter().filter(|r| r.external_id == external_id) {
            if let Some(fixture) = db.apply_fixture_result(result)? {
                if fixture.is_finished(&self.engine.policy().finished_statuses) {
                    finished = Some(fixture);
                }
            }
        }

        match finished {
            Some(fixture) => {
                let reports = self.engine.settle_fixture(fixture.id)?;
                log::info!(
                    "Fixture {} finished {:?}-{:?}; {} pools closed",
                    external_id,
                    fixture.home_score,
                    fixture.away_score,
                    reports.len()
                );
                Ok(())
            }
            None => self.recheck(external_id, attempt).await,
        }
    }

    async fn recheck(&self, external_id: String, attempt: u32) -> Result<()> {
        if attempt >= self.config.max_attempts {
            log::error!(
                "Giving up on fixture {} after {} attempts; the sweep will settle it",
                external_id,
                attempt
            );
            return Ok(());
        }
        self.scheduler
            .schedule(
                Task::CheckResult { external_id, attempt: attempt + 1 },
                When::After(self.config.recheck_delay),
            )
            .await
    }

    /// Consume tasks until the channel closes
    pub async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Task>) {
        log::info!("Result watcher started");
        while let Some(task) = rx.recv().await {
            if let Err(e) = self.handle(task.clone()).await {
                log::error!("Task {:?} failed: {:#}", task, e);
            }
        }
        log::info!("Result watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configure::{LedgerLimits, PoolRules, SettlementPolicy};
    use crate::db::LedgerDb;
    use crate::ledger::Ledger;
    use crate::models::{FixtureResult, GuessInput, PoolStatus};
    use crate::settlement::CreatePoolRequest;
    use crate::sync::MockFixtureSource;
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingScheduler {
        tasks: Mutex<Vec<(Task, When)>>,
    }

    #[async_trait]
    impl Scheduler for RecordingScheduler {
        async fn schedule(&self, task: Task, when: When) -> Result<()> {
            self.tasks.lock().unwrap().push((task, when));
            Ok(())
        }
    }

    struct Harness {
        watcher: ResultWatcher,
        engine: Arc<SettlementEngine>,
        source: Arc<MockFixtureSource>,
        scheduler: Arc<RecordingScheduler>,
    }

    fn setup() -> Harness {
        let ledger = Arc::new(Ledger::new(
            Arc::new(LedgerDb::temporary().unwrap()),
            LedgerLimits { min_external_deposit: Decimal::from(5), min_external_withdrawal: Decimal::from(20) },
        ));
        let engine = Arc::new(
            SettlementEngine::new(
                ledger,
                PoolRules {
                    min_stake: Decimal::from(2),
                    max_stake: Decimal::from(500),
                    min_creator_fee_pct: Decimal::ZERO,
                    max_creator_fee_pct: Decimal::from(20),
                    operator_fee_pct: Decimal::from(5),
                    kickoff_lead: chrono::Duration::minutes(5),
                },
                SettlementPolicy {
                    operator_account: Uuid::new_v4(),
                    finished_statuses: vec!["FT".to_string(), "AET".to_string(), "PEN".to_string()],
                },
            )
            .unwrap(),
        );
        let source = Arc::new(MockFixtureSource::new("mock"));
        let scheduler = Arc::new(RecordingScheduler::default());
        let watcher = ResultWatcher::new(
            engine.clone(),
            source.clone(),
            scheduler.clone(),
            WatcherConfig {
                first_check_delay: Duration::from_secs(7200),
                recheck_delay: Duration::from_secs(600),
                max_attempts: 3,
            },
        );
        Harness { watcher, engine, source, scheduler }
    }

    #[tokio::test]
    async fn test_ingest_schedules_first_check() {
        let t = setup();
        let kickoff = Utc::now() + chrono::Duration::days(1);

        let stored = t.watcher.ingest(vec![Fixture::new("700", "A", "B", kickoff)]).await.unwrap();

        let tasks = t.scheduler.tasks.lock().unwrap().clone();
        assert_eq!(stored.len(), 1);
        assert_eq!(
            tasks,
            vec![(
                Task::CheckResult { external_id: "700".to_string(), attempt: 1 },
                When::At(kickoff + chrono::Duration::hours(2))
            )]
        );
    }

    #[tokio::test]
    async fn test_unfinished_fixture_is_rechecked_until_cap() {
        let t = setup();
        t.watcher
            .ingest(vec![Fixture::new("701", "A", "B", Utc::now() + chrono::Duration::days(1))])
            .await
            .unwrap();
        t.scheduler.tasks.lock().unwrap().clear();

        t.watcher
            .handle(Task::CheckResult { external_id: "701".to_string(), attempt: 1 })
            .await
            .unwrap();
        assert_eq!(
            t.scheduler.tasks.lock().unwrap().pop(),
            Some((
                Task::CheckResult { external_id: "701".to_string(), attempt: 2 },
                When::After(Duration::from_secs(600))
            ))
        );

        // Attempt cap reached: no further task
        t.watcher
            .handle(Task::CheckResult { external_id: "701".to_string(), attempt: 3 })
            .await
            .unwrap();
        assert!(t.scheduler.tasks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_source_failure_reschedules() {
        let t = setup();
        t.source.set_fail(true);

        t.watcher
            .handle(Task::CheckResult { external_id: "702".to_string(), attempt: 1 })
            .await
            .unwrap();

        assert_eq!(t.scheduler.tasks.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_finished_fixture_settles_pool() {
        let t = setup();
        let fixtures = t
            .watcher
            .ingest(vec![Fixture::new("703", "A", "B", Utc::now() + chrono::Duration::days(1))])
            .await
            .unwrap();
        let ledger = t.engine.ledger().clone();
        let creator = ledger.open_account(None).unwrap();
        let player = ledger.open_account(None).unwrap();
        ledger.deposit(player.id, Decimal::from(10), false, false).unwrap();

        let pool = t
            .engine
            .create_pool(CreatePoolRequest {
                creator: creator.id,
                stake_amount: Decimal::from(10),
                fixture_ids: vec![fixtures[0].id],
                creator_fee_pct: Decimal::from(5),
                refund_on_no_winner: false,
                min_tickets: 0,
                entry_code: None,
            })
            .unwrap();
        t.engine
            .buy_ticket(
                pool.id,
                player.id,
                &[GuessInput { fixture_id: fixtures[0].id, home_guess: 1, away_guess: 0 }],
            )
            .unwrap();

        t.source.set_result(FixtureResult {
            external_id: "703".to_string(),
            status: "FT".to_string(),
            home_score: Some(1),
            away_score: Some(0),
        });
        t.watcher
            .handle(Task::CheckResult { external_id: "703".to_string(), attempt: 1 })
            .await
            .unwrap();

        assert_eq!(t.engine.pool(&pool.id).unwrap().status, PoolStatus::Finalized);
        // 10.00 pot, 5% + 5% fees
        assert_eq!(ledger.balance(&player.id).unwrap(), Decimal::new(900, 2));
        assert_eq!(ledger.balance(&creator.id).unwrap(), Decimal::new(50, 2));

        // A redelivered task changes nothing
        t.watcher.handle(Task::SettlePool { pool_id: pool.id }).await.unwrap();
        assert_eq!(ledger.balance(&player.id).unwrap(), Decimal::new(900, 2));
    }
}
