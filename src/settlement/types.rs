use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{AccountId, FixtureId, PoolId, PoolStatus, Transaction};

/// Request to open a new pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePoolRequest {
    pub creator: AccountId,
    pub stake_amount: Decimal,
    pub fixture_ids: Vec<FixtureId>,
    pub creator_fee_pct: Decimal,
    #[serde(default)]
    pub refund_on_no_winner: bool,
    #[serde(default)]
    pub min_tickets: u32,
    /// Generated when absent
    #[serde(default)]
    pub entry_code: Option<String>,
}

/// 16 upper-case hex characters
pub fn generate_entry_code() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_uppercase()
}

/// Who is asking for a pool state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub account: AccountId,
    pub is_admin: bool,
}

impl Actor {
    pub fn user(account: AccountId) -> Self {
        Self { account, is_admin: false }
    }

    pub fn admin(account: AccountId) -> Self {
        Self { account, is_admin: true }
    }
}

/// Which settlement rule a `finalize`/`cancel` call applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SettlementBranch {
    /// Some fixture has no final result yet; nothing changed
    AwaitingResults,
    /// Pool was already finalized or cancelled; nothing changed
    AlreadyTerminal,
    /// Fewer tickets than required: every stake refunded
    BelowMinimum,
    /// Cancelled by creator or admin: every stake refunded
    Cancelled,
    Winners,
    /// No winner: net split among all tickets
    RefundNoWinner,
    /// No winner: net goes to the creator
    CreatorTakesAll,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettlementReport {
    pub pool_id: PoolId,
    pub branch: SettlementBranch,
    pub status: PoolStatus,
    pub ticket_count: u32,
    pub payouts: Vec<Transaction>,
}

impl SettlementReport {
    pub fn unchanged(pool_id: PoolId, status: PoolStatus, ticket_count: u32, branch: SettlementBranch) -> Self {
        Self { pool_id, branch, status, ticket_count, payouts: Vec::new() }
    }

    /// Whether this call moved the pool to a terminal status
    pub fn settled(&self) -> bool {
        !matches!(self.branch, SettlementBranch::AwaitingResults | SettlementBranch::AlreadyTerminal)
    }

    pub fn total_paid(&self) -> Decimal {
        self.payouts.iter().map(|tx| tx.amount).sum()
    }

    pub fn paid_to(&self, account: &AccountId) -> Decimal {
        self.payouts
            .iter()
            .filter(|tx| tx.account_id == *account)
            .map(|tx| tx.amount)
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolSummary {
    pub pool_id: PoolId,
    pub entry_code: String,
    pub status: PoolStatus,
    pub ticket_count: u32,
    pub total_stakes: Decimal,
    pub potential_payout: Decimal,
    /// Owners whose tickets match every known score
    pub winners: Vec<AccountId>,
}
