use std::time::Duration;

use config::{Config, ConfigError, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub log_level: String,
    pub log_to_file: bool,
    pub log_file: String,
    pub db_path: String,

    pub min_external_deposit: Decimal,
    pub min_external_withdrawal: Decimal,

    pub min_stake: Decimal,
    pub max_stake: Decimal,
    pub min_creator_fee_pct: Decimal,
    pub max_creator_fee_pct: Decimal,
    pub operator_fee_pct: Decimal,
    pub operator_account_id: Uuid,
    pub kickoff_lead_minutes: i64,

    pub finished_statuses: Vec<String>,
    pub result_check_delay_secs: u64,
    pub result_recheck_secs: u64,
    pub result_max_attempts: u32,
    pub sweep_interval_secs: u64,

    pub gateway_timeout_ms: u64,
    pub fixture_api_urls: Vec<String>,
    pub fixture_api_key: String,
}

/// Thresholds applied to external cash-in/cash-out
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerLimits {
    pub min_external_deposit: Decimal,
    pub min_external_withdrawal: Decimal,
}

/// Validation bounds for new pools
#[derive(Debug, Clone, PartialEq)]
pub struct PoolRules {
    pub min_stake: Decimal,
    pub max_stake: Decimal,
    pub min_creator_fee_pct: Decimal,
    pub max_creator_fee_pct: Decimal,
    pub operator_fee_pct: Decimal,
    /// Fixtures starting sooner than this cannot be added to a pool
    pub kickoff_lead: chrono::Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettlementPolicy {
    pub operator_account: Uuid,
    pub finished_statuses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatcherConfig {
    /// Delay after kickoff before the first result check
    pub first_check_delay: Duration,
    pub recheck_delay: Duration,
    pub max_attempts: u32,
}

impl AppConfig {
    pub fn ledger_limits(&self) -> LedgerLimits {
        LedgerLimits {
            min_external_deposit: self.min_external_deposit,
            min_external_withdrawal: self.min_external_withdrawal,
        }
    }

    pub fn pool_rules(&self) -> PoolRules {
        PoolRules {
            min_stake: self.min_stake,
            max_stake: self.max_stake,
            min_creator_fee_pct: self.min_creator_fee_pct,
            max_creator_fee_pct: self.max_creator_fee_pct,
            operator_fee_pct: self.operator_fee_pct,
            kickoff_lead: chrono::Duration::minutes(self.kickoff_lead_minutes),
        }
    }

    pub fn settlement_policy(&self) -> SettlementPolicy {
        SettlementPolicy {
            operator_account: self.operator_account_id,
            finished_statuses: self.finished_statuses.clone(),
        }
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig { timeout: Duration::from_millis(self.gateway_timeout_ms) }
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            first_check_delay: Duration::from_secs(self.result_check_delay_secs),
            recheck_delay: Duration::from_secs(self.result_recheck_secs),
            max_attempts: self.result_max_attempts,
        }
    }
}

pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let s = Config::builder()
        // Set defaults
        .set_default("log_level", "info")?
        .set_default("log_to_file", false)?
        .set_default("log_file", "log/bolao.log")?
        .set_default("db_path", "data/bolao.sled")?
        .set_default("min_external_deposit", "5.00")?
        .set_default("min_external_withdrawal", "20.00")?
        .set_default("min_stake", "2.00")?
        .set_default("max_stake", "500.00")?
        .set_default("min_creator_fee_pct", "0")?
        .set_default("max_creator_fee_pct", "20")?
        .set_default("operator_fee_pct", "5")?
        .set_default("operator_account_id", Uuid::nil().to_string())?
        .set_default("kickoff_lead_minutes", 5)?
        .set_default("finished_statuses", vec!["FT", "AET", "PEN"])?
        .set_default("result_check_delay_secs", 2 * 60 * 60)?
        .set_default("result_recheck_secs", 600)?
        .set_default("result_max_attempts", 36)?
        .set_default("sweep_interval_secs", 300)?
        .set_default("gateway_timeout_ms", 40_000)?
        .set_default("fixture_api_urls", vec!["https://v3.football.api-sports.io/"])?
        .set_default("fixture_api_key", "")?
        // Add configuration from a file
        .add_source(File::with_name(path).required(false))
        // Add configuration from environment variables
        .add_source(config::Environment::with_prefix("APP"))
        .build()?;

    s.try_deserialize()
}
