#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use bolao::configure::{LedgerLimits, PoolRules, SettlementPolicy};
use bolao::db::LedgerDb;
use bolao::ledger::Ledger;
use bolao::models::{Account, Fixture, FixtureResult, GuessInput, Pool};
use bolao::settlement::{CreatePoolRequest, SettlementEngine};

pub fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub fn limits() -> LedgerLimits {
    LedgerLimits {
        min_external_deposit: d("5.00"),
        min_external_withdrawal: d("20.00"),
    }
}

pub fn ledger() -> Arc<Ledger> {
    Arc::new(Ledger::new(Arc::new(LedgerDb::temporary().unwrap()), limits()))
}

pub struct World {
    pub engine: Arc<SettlementEngine>,
    pub ledger: Arc<Ledger>,
    pub operator: Uuid,
}

impl World {
    pub fn new() -> Self {
        let ledger = ledger();
        let operator = Uuid::new_v4();
        let engine = SettlementEngine::new(
            ledger.clone(),
            PoolRules {
                min_stake: d("2.00"),
                max_stake: d("500.00"),
                min_creator_fee_pct: d("0"),
                max_creator_fee_pct: d("20"),
                operator_fee_pct: d("5"),
                kickoff_lead: Duration::minutes(5),
            },
            SettlementPolicy {
                operator_account: operator,
                finished_statuses: vec!["FT".to_string(), "AET".to_string(), "PEN".to_string()],
            },
        )
        .unwrap();
        Self { engine: Arc::new(engine), ledger, operator }
    }

    /// Account funded with an internal deposit
    pub fn funded(&self, amount: &str) -> Account {
        let account = self.ledger.open_account(None).unwrap();
        if d(amount) > Decimal::ZERO {
            self.ledger.deposit(account.id, d(amount), false, false).unwrap();
        }
        account
    }

    pub fn fixture(&self, external_id: &str) -> Fixture {
        self.ledger
            .db()
            .upsert_fixture(Fixture::new(external_id, "Home FC", "Away FC", Utc::now() + Duration::days(2)))
            .unwrap()
    }

    pub fn finish(&self, fixture: &Fixture, home: u32, away: u32) {
        self.ledger
            .db()
            .apply_fixture_result(&FixtureResult {
                external_id: fixture.external_id.clone(),
                status: "FT".to_string(),
                home_score: Some(home),
                away_score: Some(away),
            })
            .unwrap();
    }

    pub fn pool(&self, creator: &Account, fixtures: &[&Fixture], fee: &str, refund: bool, min_tickets: u32) -> Pool {
        self.engine
            .create_pool(CreatePoolRequest {
                creator: creator.id,
                stake_amount: d("10.00"),
                fixture_ids: fixtures.iter().map(|f| f.id).collect(),
                creator_fee_pct: d(fee),
                refund_on_no_winner: refund,
                min_tickets,
                entry_code: None,
            })
            .unwrap()
    }

    pub fn balance(&self, account: &Uuid) -> Decimal {
        self.ledger.balance(account).unwrap()
    }

    pub fn assert_replay(&self, account: &Uuid) {
        assert_eq!(self.ledger.replayed_balance(account).unwrap(), self.balance(account));
    }
}

pub fn guess(fixture: &Fixture, home: i64, away: i64) -> GuessInput {
    GuessInput { fixture_id: fixture.id, home_guess: home, away_guess: away }
}
