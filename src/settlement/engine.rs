//! Pool settlement engine
//!
//! Owns the pool lifecycle: creation, ticket purchase, pause/resume,
//! cancellation and final settlement. Every state change and the ledger
//! postings it implies commit together in one store unit, so a pool is paid
//! out at most once even when several triggers race.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::types::{
    generate_entry_code, Actor, CreatePoolRequest, PoolSummary, SettlementBranch, SettlementReport,
};
use crate::configure::{LedgerLimits, PoolRules, SettlementPolicy};
use crate::db::{abort, LedgerDb, Unit, UnitResult};
use crate::error::{BolaoError, BolaoResult};
use crate::ledger::{post_deposit, post_withdraw, Ledger};
use crate::models::{
    to_cents, AccountId, Fixture, FixtureId, Guess, GuessInput, Pool, PoolEvent, PoolId, PoolStatus,
    Ticket, Transaction,
};
use crate::{log_pool_closed, log_posting};

pub struct SettlementEngine {
    ledger: Arc<Ledger>,
    rules: PoolRules,
    policy: SettlementPolicy,
}

/// Credit `amount` as a pool payout; zero amounts are skipped.
fn pay(
    unit: &Unit,
    limits: &LedgerLimits,
    account: &AccountId,
    amount: Decimal,
    pool_id: PoolId,
    out: &mut Vec<Transaction>,
) -> UnitResult<()> {
    if amount > Decimal::ZERO {
        out.push(post_deposit(unit, limits, account, amount, false, true, Some(pool_id))?);
    }
    Ok(())
}

/// Even split truncated to cents, plus what is left over
fn split(net: Decimal, parts: usize) -> (Decimal, Decimal) {
    if parts == 0 {
        return (Decimal::ZERO, net);
    }
    let each = to_cents(net / Decimal::from(parts as u64));
    (each, net - each * Decimal::from(parts as u64))
}

fn load_tickets(unit: &Unit, pool: &Pool) -> UnitResult<Vec<Ticket>> {
    pool.ticket_ids.iter().map(|id| unit.ticket(id)).collect()
}

fn load_fixtures(unit: &Unit, pool: &Pool) -> UnitResult<HashMap<FixtureId, Fixture>> {
    let mut fixtures = HashMap::with_capacity(pool.fixture_ids.len());
    for id in &pool.fixture_ids {
        fixtures.insert(*id, unit.fixture(id)?);
    }
    Ok(fixtures)
}

/// Distinct owners of winning tickets, in purchase order
fn winning_owners(tickets: &[Ticket], fixtures: &HashMap<FixtureId, Fixture>) -> Vec<AccountId> {
    let mut seen = HashSet::new();
    tickets
        .iter()
        .filter(|ticket| ticket.won(fixtures))
        .map(|ticket| ticket.owner)
        .filter(|owner| seen.insert(*owner))
        .collect()
}

fn refund_all(
    unit: &Unit,
    limits: &LedgerLimits,
    pool: &Pool,
    tickets: &[Ticket],
) -> UnitResult<Vec<Transaction>> {
    let mut refunds = Vec::with_capacity(tickets.len());
    for ticket in tickets {
        pay(unit, limits, &ticket.owner, pool.stake_amount, pool.id, &mut refunds)?;
    }
    Ok(refunds)
}

impl SettlementEngine {
    /// Build the engine and make sure the operator account exists.
    pub fn new(ledger: Arc<Ledger>, rules: PoolRules, policy: SettlementPolicy) -> BolaoResult<Self> {
        ledger.ensure_account(policy.operator_account)?;
        Ok(Self { ledger, rules, policy })
    }

    fn db(&self) -> &LedgerDb {
        self.ledger.db()
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn policy(&self) -> &SettlementPolicy {
        &self.policy
    }

    pub fn pool(&self, pool_id: &PoolId) -> BolaoResult<Pool> {
        self.db()
            .pool(pool_id)?
            .ok_or_else(|| BolaoError::NotFound(format!("Pool {}", pool_id)))
    }

    // ---------------------------------------------------------------------
    // Creation and entries
    // ---------------------------------------------------------------------

    pub fn create_pool(&self, request: CreatePoolRequest) -> BolaoResult<Pool> {
        let rules = &self.rules;
        if request.stake_amount < rules.min_stake || request.stake_amount > rules.max_stake {
            return Err(BolaoError::InvalidPool(format!(
                "stake must be between {} and {}",
                rules.min_stake, rules.max_stake
            )));
        }
        if request.creator_fee_pct < rules.min_creator_fee_pct
            || request.creator_fee_pct > rules.max_creator_fee_pct
        {
            return Err(BolaoError::InvalidPool(format!(
                "creator fee must be between {}% and {}%",
                rules.min_creator_fee_pct, rules.max_creator_fee_pct
            )));
        }
        if request.fixture_ids.is_empty() {
            return Err(BolaoError::InvalidPool("a pool needs at least one fixture".to_string()));
        }
        let distinct: HashSet<_> = request.fixture_ids.iter().collect();
        if distinct.len() != request.fixture_ids.len() {
            return Err(BolaoError::InvalidPool("duplicate fixture".to_string()));
        }

        let entry_code = match &request.entry_code {
            Some(code) if !code.trim().is_empty() => code.trim().to_uppercase(),
            _ => generate_entry_code(),
        };
        let now = Utc::now();
        let pool = Pool {
            id: Uuid::new_v4(),
            creator: request.creator,
            stake_amount: request.stake_amount,
            entry_code,
            fixture_ids: request.fixture_ids.clone(),
            refund_on_no_winner: request.refund_on_no_winner,
            creator_fee_pct: request.creator_fee_pct,
            operator_fee_pct: rules.operator_fee_pct,
            min_tickets: request.min_tickets,
            status: PoolStatus::Active,
            ticket_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let earliest_kickoff = now + rules.kickoff_lead;

        self.db().atomic(|unit| {
            unit.account(&pool.creator)?;
            for fixture_id in &pool.fixture_ids {
                let fixture = unit.fixture(fixture_id)?;
                if fixture.kickoff <= earliest_kickoff {
                    return abort(BolaoError::InvalidPool(format!(
                        "{} x {} kicks off too soon",
                        fixture.home_team, fixture.away_team
                    )));
                }
            }
            unit.insert_pool(&pool)
        })?;

        log::info!(
            "Pool {} created by {} (code={}, stake={}, fixtures={})",
            pool.id,
            pool.creator,
            pool.entry_code,
            pool.stake_amount,
            pool.fixture_ids.len()
        );
        Ok(pool)
    }

    /// Buy one ticket: debit the stake and store the guesses, all or nothing.
    pub fn buy_ticket(&self, pool_id: PoolId, owner: AccountId, guesses: &[GuessInput]) -> BolaoResult<Ticket> {
        let now = Utc::now();
        let limits = self.ledger.limits();

        let (ticket, purchase) = self.db().atomic(|unit| {
            let mut pool = unit.pool(&pool_id)?;
            if !pool.status.accepts_entries() {
                return abort(BolaoError::PoolNotAcceptingEntries);
            }

            let purchase = post_withdraw(unit, limits, &owner, pool.stake_amount, false, true, Some(pool.id))?;

            if guesses.len() != pool.fixture_ids.len() {
                return abort(BolaoError::InvalidGuess(format!(
                    "expected {} guesses, got {}",
                    pool.fixture_ids.len(),
                    guesses.len()
                )));
            }
            let mut seen = HashSet::with_capacity(guesses.len());
            let mut validated = Vec::with_capacity(guesses.len());
            for input in guesses {
                let (Ok(home_guess), Ok(away_guess)) =
                    (u32::try_from(input.home_guess), u32::try_from(input.away_guess))
                else {
                    return abort(BolaoError::InvalidGuess("scores must be non-negative".to_string()));
                };
                if !pool.fixture_ids.contains(&input.fixture_id) {
                    return abort(BolaoError::InvalidGuess(format!(
                        "fixture {} is not part of this pool",
                        input.fixture_id
                    )));
                }
                if !seen.insert(input.fixture_id) {
                    return abort(BolaoError::InvalidGuess(format!(
                        "more than one guess for fixture {}",
                        input.fixture_id
                    )));
                }
                if unit.fixture(&input.fixture_id)?.has_started(now) {
                    return abort(BolaoError::PoolClosedForGuesses);
                }
                validated.push(Guess { fixture_id: input.fixture_id, home_guess, away_guess });
            }

            let ticket = Ticket {
                id: Uuid::new_v4(),
                pool_id: pool.id,
                owner,
                guesses: validated,
                created_at: now,
            };
            unit.put_ticket(&ticket)?;
            pool.ticket_ids.push(ticket.id);
            pool.updated_at = now;
            unit.put_pool(&pool)?;
            Ok((ticket, purchase))
        })?;

        if let Some(tx) = &purchase {
            log_posting!(tx);
        }
        log::info!("Ticket {} bought by {} in pool {}", ticket.id, owner, pool_id);
        Ok(ticket)
    }

    // ---------------------------------------------------------------------
    // Status changes
    // ---------------------------------------------------------------------

    fn creator_transition(&self, pool_id: PoolId, actor: Actor, event: PoolEvent) -> BolaoResult<Pool> {
        let pool = self.db().atomic(|unit| {
            let mut pool = unit.pool(&pool_id)?;
            if pool.creator != actor.account {
                return abort(BolaoError::Unauthorized);
            }
            let Some(next) = pool.status.transition(event) else {
                return abort(BolaoError::AlreadyTerminal);
            };
            if next != pool.status {
                pool.status = next;
                pool.updated_at = Utc::now();
                unit.put_pool(&pool)?;
            }
            Ok(pool)
        })?;
        log::info!("Pool {} {:?} -> {}", pool_id, event, pool.status);
        Ok(pool)
    }

    /// Stop accepting new tickets. Creator only.
    pub fn pause_guesses(&self, pool_id: PoolId, actor: Actor) -> BolaoResult<Pool> {
        self.creator_transition(pool_id, actor, PoolEvent::Pause)
    }

    pub fn resume_guesses(&self, pool_id: PoolId, actor: Actor) -> BolaoResult<Pool> {
        self.creator_transition(pool_id, actor, PoolEvent::Resume)
    }

    /// Cancel a pool and refund every ticket. Creator or admin.
    pub fn cancel(&self, pool_id: PoolId, actor: Actor) -> BolaoResult<SettlementReport> {
        let limits = self.ledger.limits();
        let report = self.db().atomic(|unit| {
            let mut pool = unit.pool(&pool_id)?;
            if !actor.is_admin && pool.creator != actor.account {
                return abort(BolaoError::Unauthorized);
            }
            let Some(next) = pool.status.transition(PoolEvent::Cancel) else {
                return abort(BolaoError::AlreadyTerminal);
            };

            let tickets = load_tickets(unit, &pool)?;
            let payouts = refund_all(unit, limits, &pool, &tickets)?;
            pool.status = next;
            pool.updated_at = Utc::now();
            unit.release_code(&pool)?;
            unit.put_pool(&pool)?;
            Ok(SettlementReport {
                pool_id,
                branch: SettlementBranch::Cancelled,
                status: pool.status,
                ticket_count: pool.ticket_count(),
                payouts,
            })
        })?;
        self.log_report(&report);
        Ok(report)
    }

    /// Settle a pool once every fixture has a final result.
    ///
    /// Safe to call any number of times: a pool that is still waiting for
    /// results or already terminal is returned unchanged.
    pub fn finalize(&self, pool_id: PoolId) -> BolaoResult<SettlementReport> {
        let limits = self.ledger.limits();
        let policy = &self.policy;

        let report = self.db().atomic(|unit| {
            let mut pool = unit.pool(&pool_id)?;
            if pool.status.is_terminal() {
                return Ok(SettlementReport::unchanged(
                    pool_id,
                    pool.status,
                    pool.ticket_count(),
                    SettlementBranch::AlreadyTerminal,
                ));
            }
            let fixtures = load_fixtures(unit, &pool)?;
            if !fixtures.values().all(|f| f.is_finished(&policy.finished_statuses)) {
                return Ok(SettlementReport::unchanged(
                    pool_id,
                    pool.status,
                    pool.ticket_count(),
                    SettlementBranch::AwaitingResults,
                ));
            }

            let tickets = load_tickets(unit, &pool)?;
            let mut payouts = Vec::new();
            let branch = if pool.ticket_count() < pool.min_tickets {
                payouts = refund_all(unit, limits, &pool, &tickets)?;
                pool.status = PoolStatus::Cancelled;
                unit.release_code(&pool)?;
                SettlementBranch::BelowMinimum
            } else {
                let shares = pool.shares();
                pay(unit, limits, &policy.operator_account, shares.operator, pool.id, &mut payouts)?;
                pay(unit, limits, &pool.creator, shares.creator, pool.id, &mut payouts)?;

                let winners = winning_owners(&tickets, &fixtures);
                let branch = if !winners.is_empty() {
                    let (each, rest) = split(shares.net, winners.len());
                    for winner in &winners {
                        pay(unit, limits, winner, each, pool.id, &mut payouts)?;
                    }
                    pay(unit, limits, &pool.creator, rest, pool.id, &mut payouts)?;
                    SettlementBranch::Winners
                } else if pool.refund_on_no_winner {
                    let (each, rest) = split(shares.net, tickets.len());
                    for ticket in &tickets {
                        pay(unit, limits, &ticket.owner, each, pool.id, &mut payouts)?;
                    }
                    pay(unit, limits, &pool.creator, rest, pool.id, &mut payouts)?;
                    SettlementBranch::RefundNoWinner
                } else {
                    pay(unit, limits, &pool.creator, shares.net, pool.id, &mut payouts)?;
                    SettlementBranch::CreatorTakesAll
                };
                pool.status = PoolStatus::Finalized;
                branch
            };

            pool.updated_at = Utc::now();
            unit.put_pool(&pool)?;
            Ok(SettlementReport {
                pool_id,
                branch,
                status: pool.status,
                ticket_count: pool.ticket_count(),
                payouts,
            })
        })?;

        self.log_report(&report);
        Ok(report)
    }

    fn log_report(&self, report: &SettlementReport) {
        if !report.settled() {
            log::debug!("Pool {} not settled: {}", report.pool_id, report.branch.as_ref());
            return;
        }
        for tx in &report.payouts {
            log_posting!(tx);
        }
        let event = match report.status {
            PoolStatus::Cancelled => "POOL_CANCELLED",
            _ => "POOL_SETTLED",
        };
        log_pool_closed!(event, report.pool_id, report.ticket_count, report.total_paid());
        log::info!("Pool {} closed via {}", report.pool_id, report.branch.as_ref());
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    fn fixtures_of(&self, pool: &Pool) -> BolaoResult<HashMap<FixtureId, Fixture>> {
        let mut fixtures = HashMap::with_capacity(pool.fixture_ids.len());
        for id in &pool.fixture_ids {
            if let Some(fixture) = self.db().fixture(id)? {
                fixtures.insert(*id, fixture);
            }
        }
        Ok(fixtures)
    }

    /// Stored status with the "match started" overlay
    pub fn status_effective(&self, pool_id: PoolId, now: DateTime<Utc>) -> BolaoResult<PoolStatus> {
        let pool = self.pool(&pool_id)?;
        let fixtures = self.fixtures_of(&pool)?;
        Ok(pool.effective_status(fixtures.values(), now))
    }

    pub fn summary(&self, pool_id: PoolId) -> BolaoResult<PoolSummary> {
        let pool = self.pool(&pool_id)?;
        let fixtures = self.fixtures_of(&pool)?;
        let tickets = self.db().tickets_for_pool(&pool)?;
        Ok(PoolSummary {
            pool_id,
            entry_code: pool.entry_code.clone(),
            status: pool.effective_status(fixtures.values(), Utc::now()),
            ticket_count: pool.ticket_count(),
            total_stakes: pool.total_stakes(),
            potential_payout: pool.potential_payout(),
            winners: winning_owners(&tickets, &fixtures),
        })
    }

    // ---------------------------------------------------------------------
    // Triggers
    // ---------------------------------------------------------------------

    /// Finalize every pool that references `fixture_id`. A failing pool is
    /// logged and does not stop the others.
    pub fn settle_fixture(&self, fixture_id: FixtureId) -> BolaoResult<Vec<SettlementReport>> {
        let pool_ids = self.db().pools_for_fixture(&fixture_id)?;
        Ok(self.finalize_each(pool_ids))
    }

    /// Finalize every open pool whose fixtures are all finished
    pub fn sweep(&self) -> BolaoResult<Vec<SettlementReport>> {
        let pool_ids = self.db().open_pools()?.into_iter().map(|p| p.id).collect();
        Ok(self.finalize_each(pool_ids))
    }

    fn finalize_each(&self, pool_ids: Vec<PoolId>) -> Vec<SettlementReport> {
        let mut settled = Vec::new();
        for pool_id in pool_ids {
            match self.finalize(pool_id) {
                Ok(report) if report.settled() => settled.push(report),
                Ok(_) => {}
                Err(e) => log::error!("Failed to finalize pool {}: {}", pool_id, e),
            }
        }
        settled
    }
}
