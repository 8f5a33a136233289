//! Pool record and its status machine

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::account::AccountId;
use super::fixture::{Fixture, FixtureId};
use super::ticket::TicketId;

pub type PoolId = Uuid;

/// Pool statuses. `MatchStarted` is never stored; it is an overlay computed
/// from fixture kickoffs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display, strum_macros::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PoolStatus {
    Active,
    GuessesPaused,
    MatchStarted,
    Finalized,
    Cancelled,
}

/// Inputs that move a pool between statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEvent {
    Pause,
    Resume,
    Cancel,
    Finalize,
}

impl PoolStatus {
    /// Check if this is a terminal state (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, PoolStatus::Finalized | PoolStatus::Cancelled)
    }

    pub fn accepts_entries(&self) -> bool {
        matches!(self, PoolStatus::Active)
    }

    /// Next status for `event`, or `None` when the transition is not allowed.
    pub fn transition(self, event: PoolEvent) -> Option<PoolStatus> {
        use PoolEvent::*;
        use PoolStatus::*;

        match (self, event) {
            (Active, Pause) | (GuessesPaused, Pause) => Some(GuessesPaused),
            (GuessesPaused, Resume) | (Active, Resume) => Some(Active),
            (Active | GuessesPaused | MatchStarted, Cancel) => Some(Cancelled),
            (Active | GuessesPaused | MatchStarted, Finalize) => Some(Finalized),
            _ => None,
        }
    }
}

/// Operator/creator cut of a pool's proceeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shares {
    pub total: Decimal,
    pub operator: Decimal,
    pub creator: Decimal,
    pub net: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub id: PoolId,
    pub creator: AccountId,
    pub stake_amount: Decimal,
    pub entry_code: String,
    pub fixture_ids: Vec<FixtureId>,
    pub refund_on_no_winner: bool,
    pub creator_fee_pct: Decimal,
    pub operator_fee_pct: Decimal,
    pub min_tickets: u32,
    pub status: PoolStatus,
    pub ticket_ids: Vec<TicketId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Percentage quantized to a 2-decimal factor, e.g. 5 -> 0.05
pub fn fee_factor(pct: Decimal) -> Decimal {
    (pct / Decimal::ONE_HUNDRED).round_dp(2)
}

/// Truncate to whole cents
pub fn to_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::ToZero)
}

impl Pool {
    pub fn ticket_count(&self) -> u32 {
        self.ticket_ids.len() as u32
    }

    pub fn total_stakes(&self) -> Decimal {
        self.stake_amount * Decimal::from(self.ticket_count())
    }

    /// Split of the pooled stakes. Shares are truncated to cents so that
    /// `operator + creator + net == total` always holds.
    pub fn shares(&self) -> Shares {
        let total = self.total_stakes();
        let operator = to_cents(fee_factor(self.operator_fee_pct) * total);
        let creator = to_cents(fee_factor(self.creator_fee_pct) * total);
        Shares { total, operator, creator, net: total - operator - creator }
    }

    /// What the winners would split if the pool settled now.
    pub fn potential_payout(&self) -> Decimal {
        let keep = fee_factor(Decimal::ONE_HUNDRED - self.operator_fee_pct - self.creator_fee_pct);
        to_cents(self.total_stakes() * keep)
    }

    /// Stored status with the "match started" overlay applied.
    pub fn effective_status<'a>(
        &self,
        fixtures: impl IntoIterator<Item = &'a Fixture>,
        now: DateTime<Utc>,
    ) -> PoolStatus {
        let open = matches!(self.status, PoolStatus::Active | PoolStatus::GuessesPaused);
        if open && fixtures.into_iter().any(|f| f.has_started(now)) {
            PoolStatus::MatchStarted
        } else {
            self.status
        }
    }
}
