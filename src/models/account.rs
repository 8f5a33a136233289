use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::configure::LedgerLimits;

pub type AccountId = Uuid;

/// A user's wallet. Mutated only through ledger postings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub balance: Decimal,
    pub blocked: bool,
    /// Customer id at the payment gateway
    pub customer_ref: Option<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(id: AccountId, customer_ref: Option<String>) -> Self {
        Self {
            id,
            balance: Decimal::ZERO,
            blocked: false,
            customer_ref,
            version: 0,
            created_at: Utc::now(),
        }
    }

    pub fn can_withdraw(&self, amount: Decimal, external: bool, limits: &LedgerLimits) -> bool {
        if self.blocked || amount < Decimal::ZERO {
            return false;
        }
        if external && amount < limits.min_external_withdrawal {
            return false;
        }
        self.balance - amount >= Decimal::ZERO
    }

    pub fn can_deposit(&self, amount: Decimal, external: bool, limits: &LedgerLimits) -> bool {
        if self.blocked {
            return false;
        }
        if external {
            return amount >= limits.min_external_deposit;
        }
        amount >= Decimal::ZERO
    }

    pub fn credit(&mut self, amount: Decimal) {
        self.balance += amount;
        self.version += 1;
    }

    pub fn debit(&mut self, amount: Decimal) {
        self.balance -= amount;
        self.version += 1;
    }
}
