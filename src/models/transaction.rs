//! Ledger transaction records
//!
//! A transaction is written once per balance movement. Only its status changes
//! afterwards, driven by gateway callbacks for external flows.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::account::AccountId;
use super::pool::PoolId;

pub type TransactionId = Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display, strum_macros::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    /// External credit (cash-in)
    Deposit,
    /// External debit (cash-out)
    Withdrawal,
    /// Internal debit, e.g. a ticket stake
    Purchase,
    /// Internal credit: prizes, fees, refunds
    Payout,
}

impl TransactionKind {
    /// Kind derived from the signed amount and whether the money left the platform.
    pub fn classify(amount: Decimal, external: bool) -> Self {
        match (external, amount.is_sign_negative() && !amount.is_zero()) {
            (true, false) => TransactionKind::Deposit,
            (true, true) => TransactionKind::Withdrawal,
            (false, true) => TransactionKind::Purchase,
            (false, false) => TransactionKind::Payout,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display, strum_macros::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Failed,
    Removed,
}

/// Metadata returned by the payment gateway for a charge or a payout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayInfo {
    pub gateway_id: String,
    pub due_date: Option<NaiveDate>,
    pub value: Decimal,
    pub net_value: Decimal,
    pub invoice_url: Option<String>,
    pub billet_url: Option<String>,
}

/// Destination bank account for a PIX payout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankAccount {
    pub bank_code: String,
    pub agency: String,
    pub account_number: String,
    pub account_digit: String,
    pub account_type: String,
}

/// A charge requested from the provider but not booked yet. `reference` is
/// the id the PENDING deposit will carry, sent to the provider as external
/// reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeIntent {
    pub reference: TransactionId,
    pub account_id: AccountId,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub account_id: AccountId,
    /// Signed amount: positive credits, negative debits
    pub amount: Decimal,
    pub kind: TransactionKind,
    pub external: bool,
    pub status: TransactionStatus,
    pub gateway: Option<GatewayInfo>,
    pub destination: Option<BankAccount>,
    pub pool_id: Option<PoolId>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        account_id: AccountId,
        amount: Decimal,
        external: bool,
        status: TransactionStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            amount,
            kind: TransactionKind::classify(amount, external),
            external,
            status,
            gateway: None,
            destination: None,
            pool_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_pool(mut self, pool_id: PoolId) -> Self {
        self.pool_id = Some(pool_id);
        self
    }

    pub fn with_gateway(mut self, info: GatewayInfo) -> Self {
        self.gateway = Some(info);
        self
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == TransactionStatus::Confirmed
    }
}
