use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use uuid::Uuid;

use bolao::configure::{self, AppConfig};
use bolao::db::LedgerDb;
use bolao::ledger::Ledger;
use bolao::logger::setup_logger;
use bolao::scheduler::{ResultWatcher, Scheduler, Task, TokioScheduler, When};
use bolao::settlement::{Actor, SettlementEngine, SweepWorker};
use bolao::sync::{ApiFootballSource, FailoverSource, FixtureSyncSource};

#[derive(Parser)]
#[command(name = "settlement_service")]
#[command(about = "Pool settlement service and admin tools")]
struct Cli {
    /// Config file, without extension
    #[arg(long, default_value = "config/config")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch fixture results and sweep open pools
    Run,
    /// Finalize every open pool whose fixtures are finished, then exit
    Sweep,
    /// Finalize one pool
    Finalize {
        #[arg(long)]
        pool: Uuid,
    },
    /// Cancel one pool as admin and refund every ticket
    Cancel {
        #[arg(long)]
        pool: Uuid,
    },
    /// Show a pool's summary
    Summary {
        #[arg(long)]
        pool: Uuid,
    },
    /// Show an account's balance and history
    Balance {
        #[arg(long)]
        account: Uuid,
    },
    /// List charges requested from the provider but never booked
    Intents,
}

fn build_engine(config: &AppConfig) -> Result<Arc<SettlementEngine>> {
    log::info!("Opening store at {}", config.db_path);
    let db = Arc::new(LedgerDb::open(&config.db_path).context("Failed to open store")?);
    let ledger = Arc::new(Ledger::new(db, config.ledger_limits()));
    let engine = SettlementEngine::new(ledger, config.pool_rules(), config.settlement_policy())?;
    Ok(Arc::new(engine))
}

fn build_source(config: &AppConfig) -> Result<Arc<dyn FixtureSyncSource>> {
    let mut sources: Vec<Arc<dyn FixtureSyncSource>> = Vec::new();
    for url in &config.fixture_api_urls {
        sources.push(Arc::new(ApiFootballSource::new(
            url,
            &config.fixture_api_key,
            config.finished_statuses.clone(),
        )?));
    }
    Ok(Arc::new(FailoverSource::new(sources)))
}

/// Re-arm result checks for fixtures of open pools; scheduled tasks do not
/// survive a restart.
async fn rearm_checks(engine: &SettlementEngine, scheduler: &dyn Scheduler) -> Result<usize> {
    let db = engine.ledger().db();
    let finished = &engine.policy().finished_statuses;
    let mut external_ids = Vec::new();
    for pool in db.open_pools()? {
        for fixture_id in &pool.fixture_ids {
            if let Some(fixture) = db.fixture(fixture_id)? {
                if !fixture.is_finished(finished) && !external_ids.contains(&fixture.external_id) {
                    external_ids.push(fixture.external_id);
                }
            }
        }
    }
    for external_id in &external_ids {
        scheduler
            .schedule(
                Task::CheckResult { external_id: external_id.clone(), attempt: 1 },
                When::After(Duration::ZERO),
            )
            .await?;
    }
    Ok(external_ids.len())
}

async fn run(config: AppConfig, engine: Arc<SettlementEngine>) -> Result<()> {
    let (scheduler, rx) = TokioScheduler::new();
    let scheduler = Arc::new(scheduler);
    let watcher = Arc::new(ResultWatcher::new(
        engine.clone(),
        build_source(&config)?,
        scheduler.clone(),
        config.watcher_config(),
    ));

    let rearmed = rearm_checks(&engine, &*scheduler).await?;
    log::info!("Re-armed {} result checks", rearmed);

    tokio::spawn(watcher.run(rx));
    log::info!("Result watcher spawned");

    // Safety net for results that never arrived
    let sweeper = SweepWorker::new(engine, Duration::from_secs(config.sweep_interval_secs));
    sweeper.run().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let config = configure::load_config(&cli.config).context("Failed to load configuration")?;
    setup_logger(&config).map_err(|e| anyhow!("Failed to set up logger: {}", e))?;
    log::info!("Settlement service starting (db={})", config.db_path);

    let engine = build_engine(&config)?;

    match cli.command {
        Commands::Run => run(config, engine.clone()).await?,
        Commands::Sweep => {
            let reports = engine.sweep()?;
            println!("Closed {} pools", reports.len());
            for report in reports {
                println!("  {} -> {} ({})", report.pool_id, report.status, report.branch.as_ref());
            }
        }
        Commands::Finalize { pool } => {
            let report = engine.finalize(pool)?;
            println!("{} -> {} ({})", report.pool_id, report.status, report.branch.as_ref());
            for tx in &report.payouts {
                println!("  {} {}", tx.account_id, tx.amount);
            }
        }
        Commands::Cancel { pool } => {
            let admin = Actor::admin(engine.policy().operator_account);
            let report = engine.cancel(pool, admin)?;
            println!("{} cancelled; refunded {}", report.pool_id, report.total_paid());
        }
        Commands::Summary { pool } => {
            let summary = engine.summary(pool)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Balance { account } => {
            let ledger = engine.ledger();
            println!("Balance: {}", ledger.balance(&account)?);
            for tx in ledger.history(&account)? {
                println!(
                    "  {} {:>10} {:<10} {:<9} {}",
                    tx.created_at.format("%Y-%m-%d %H:%M:%S"),
                    tx.amount,
                    tx.kind,
                    tx.status,
                    tx.id
                );
            }
        }
        Commands::Intents => {
            let intents = engine.ledger().db().charge_intents()?;
            println!("{} unbooked charges", intents.len());
            for intent in intents {
                println!(
                    "  {} {} {:>10} {}",
                    intent.created_at.format("%Y-%m-%d %H:%M:%S"),
                    intent.reference,
                    intent.amount,
                    intent.account_id
                );
            }
        }
    }

    engine.ledger().db().flush()?;
    Ok(())
}
