//! Wallet ledger
//!
//! Every balance change runs as one atomic unit that updates the account and
//! appends its transaction record. External cash-in/cash-out talk to the
//! payment gateway outside any unit and only book the result once the
//! provider has answered.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::configure::{GatewayConfig, LedgerLimits};
use crate::db::{abort, LedgerDb, Unit, UnitResult};
use crate::error::{BolaoError, BolaoResult};
use crate::gateway::PaymentGateway;
use crate::log_posting;
use crate::logging::LogEvent;
use crate::models::{
    Account, AccountId, BankAccount, ChargeIntent, GatewayInfo, PoolId, Transaction, TransactionId,
    TransactionKind, TransactionStatus,
};

/// Debit rule, applied inside the caller's unit.
///
/// The rule is always validated. `record_history == false` only skips the
/// transaction record; the caller books the movement itself.
pub fn post_withdraw(
    unit: &Unit,
    limits: &LedgerLimits,
    account_id: &AccountId,
    amount: Decimal,
    external: bool,
    record_history: bool,
    pool_id: Option<PoolId>,
) -> UnitResult<Option<Transaction>> {
    let mut account = unit.account(account_id)?;
    if !account.can_withdraw(amount, external, limits) {
        return abort(BolaoError::InsufficientFunds);
    }
    account.debit(amount);
    unit.put_account(&account)?;

    if !record_history {
        return Ok(None);
    }
    let mut tx = Transaction::new(*account_id, -amount, external, TransactionStatus::Confirmed);
    tx.pool_id = pool_id;
    unit.put_transaction(&tx)?;
    Ok(Some(tx))
}

/// Credit rule, applied inside the caller's unit.
///
/// `is_callback` skips the blocked and minimum checks; a negative amount is
/// always rejected. The record is always CONFIRMED: provider events that
/// leave a deposit in another state go through `confirm_payment`,
/// `expire_charge` and `fail_transfer`, which own the status change.
pub fn post_deposit(
    unit: &Unit,
    limits: &LedgerLimits,
    account_id: &AccountId,
    amount: Decimal,
    external: bool,
    is_callback: bool,
    pool_id: Option<PoolId>,
) -> UnitResult<Transaction> {
    let mut account = unit.account(account_id)?;
    if amount < Decimal::ZERO || (!is_callback && !account.can_deposit(amount, external, limits)) {
        return abort(BolaoError::InvalidDeposit);
    }
    account.credit(amount);
    unit.put_account(&account)?;

    let mut tx = Transaction::new(*account_id, amount, external, TransactionStatus::Confirmed);
    tx.pool_id = pool_id;
    unit.put_transaction(&tx)?;
    Ok(tx)
}

/// Turn an unbooked charge intent into the PENDING deposit it stands for
fn recover_charge(
    unit: &Unit,
    reference: &TransactionId,
    charge_id: &str,
    value: Decimal,
) -> UnitResult<Transaction> {
    let Some(intent) = unit.charge_intent(reference)? else {
        return abort(BolaoError::NotFound(format!("Charge {}", charge_id)));
    };
    unit.remove_charge_intent(reference)?;
    let mut tx = Transaction::new(intent.account_id, intent.amount, true, TransactionStatus::Pending)
        .with_gateway(GatewayInfo {
            gateway_id: charge_id.to_string(),
            due_date: None,
            value,
            net_value: value,
            invoice_url: None,
            billet_url: None,
        });
    tx.id = intent.reference;
    Ok(tx)
}

/// Debit a payout the provider has already accepted. No validation; an
/// account left below zero is blocked. Returns whether that happened.
fn force_debit(unit: &Unit, account_id: &AccountId, amount: Decimal) -> UnitResult<bool> {
    let mut account = unit.account(account_id)?;
    account.debit(amount);
    let overdrawn = account.balance < Decimal::ZERO;
    if overdrawn {
        account.blocked = true;
    }
    unit.put_account(&account)?;
    Ok(overdrawn)
}

/// How a gateway call went wrong. A timed-out call may still have reached
/// the provider.
enum GatewayFailure {
    Rejected(String),
    TimedOut(String),
}

impl From<GatewayFailure> for BolaoError {
    fn from(failure: GatewayFailure) -> Self {
        match failure {
            GatewayFailure::Rejected(msg) | GatewayFailure::TimedOut(msg) => BolaoError::GatewayUnavailable(msg),
        }
    }
}

pub struct Ledger {
    db: Arc<LedgerDb>,
    limits: LedgerLimits,
    gateway: Option<(Arc<dyn PaymentGateway>, GatewayConfig)>,
}

impl Ledger {
    pub fn new(db: Arc<LedgerDb>, limits: LedgerLimits) -> Self {
        Self { db, limits, gateway: None }
    }

    /// Attach the payment provider used for external cash-in/cash-out
    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>, config: GatewayConfig) -> Self {
        self.gateway = Some((gateway, config));
        self
    }

    pub fn db(&self) -> &Arc<LedgerDb> {
        &self.db
    }

    pub fn limits(&self) -> &LedgerLimits {
        &self.limits
    }

    // ---------------------------------------------------------------------
    // Accounts
    // ---------------------------------------------------------------------

    pub fn open_account(&self, customer_ref: Option<String>) -> BolaoResult<Account> {
        let account = Account::new(Uuid::new_v4(), customer_ref);
        self.db.atomic(|unit| unit.put_account(&account))?;
        log::info!("Opened account {}", account.id);
        Ok(account)
    }

    /// Create the account with a fixed id unless it already exists.
    pub fn ensure_account(&self, id: AccountId) -> BolaoResult<Account> {
        self.db.atomic(|unit| match unit.find_account(&id)? {
            Some(account) => Ok(account),
            None => {
                let account = Account::new(id, None);
                unit.put_account(&account)?;
                Ok(account)
            }
        })
    }

    pub fn set_blocked(&self, id: AccountId, blocked: bool) -> BolaoResult<Account> {
        let account = self.db.atomic(|unit| {
            let mut account = unit.account(&id)?;
            account.blocked = blocked;
            account.version += 1;
            unit.put_account(&account)?;
            Ok(account)
        })?;
        log::info!("Account {} blocked={}", id, blocked);
        Ok(account)
    }

    pub fn account(&self, id: &AccountId) -> BolaoResult<Account> {
        self.db
            .account(id)?
            .ok_or_else(|| BolaoError::NotFound(format!("Account {}", id)))
    }

    pub fn balance(&self, id: &AccountId) -> BolaoResult<Decimal> {
        Ok(self.account(id)?.balance)
    }

    /// Transactions of an account, oldest first
    pub fn history(&self, id: &AccountId) -> BolaoResult<Vec<Transaction>> {
        self.account(id)?;
        self.db.transactions_for(id)
    }

    /// Sum of the account's CONFIRMED transactions. Equal to the stored
    /// balance unless something bypassed the ledger.
    pub fn replayed_balance(&self, id: &AccountId) -> BolaoResult<Decimal> {
        Ok(self
            .history(id)?
            .iter()
            .filter(|tx| tx.is_confirmed())
            .map(|tx| tx.amount)
            .sum())
    }

    // ---------------------------------------------------------------------
    // Internal postings
    // ---------------------------------------------------------------------

    pub fn withdraw(
        &self,
        account_id: AccountId,
        amount: Decimal,
        external: bool,
        record_history: bool,
    ) -> BolaoResult<Option<Transaction>> {
        let tx = self.db.atomic(|unit| {
            post_withdraw(unit, &self.limits, &account_id, amount, external, record_history, None)
        })?;
        if let Some(tx) = &tx {
            log_posting!(tx);
        }
        Ok(tx)
    }

    pub fn deposit(
        &self,
        account_id: AccountId,
        amount: Decimal,
        external: bool,
        is_callback: bool,
    ) -> BolaoResult<Transaction> {
        let tx = self.db.atomic(|unit| {
            post_deposit(unit, &self.limits, &account_id, amount, external, is_callback, None)
        })?;
        log_posting!(tx);
        Ok(tx)
    }

    // ---------------------------------------------------------------------
    // External cash-in / cash-out
    // ---------------------------------------------------------------------

    fn gateway(&self) -> BolaoResult<(&Arc<dyn PaymentGateway>, Duration)> {
        match &self.gateway {
            Some((gateway, config)) => Ok((gateway, config.timeout)),
            None => Err(BolaoError::GatewayUnavailable("no payment gateway configured".to_string())),
        }
    }

    /// Await a gateway call under the configured timeout
    async fn call<T, F>(timeout: Duration, what: &str, fut: F) -> Result<T, GatewayFailure>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                log::error!("Gateway {} failed: {:#}", what, e);
                Err(GatewayFailure::Rejected(e.to_string()))
            }
            Err(_) => {
                log::error!("Gateway {} timed out after {:?}", what, timeout);
                Err(GatewayFailure::TimedOut(format!("{} timed out", what)))
            }
        }
    }

    /// Create a PIX charge and record it as a PENDING deposit.
    ///
    /// A charge intent keyed by the future transaction id is stored before
    /// the provider is called and dropped once the charge is booked. A
    /// payment that arrives in between, or after a timed-out call, is matched
    /// through that reference (see [`Ledger::confirm_payment`]). The balance
    /// only moves when the provider confirms the payment.
    pub async fn initiate_external_deposit(
        &self,
        account_id: AccountId,
        amount: Decimal,
    ) -> BolaoResult<Transaction> {
        let account = self.account(&account_id)?;
        if !account.can_deposit(amount, true, &self.limits) {
            return Err(BolaoError::InvalidDeposit);
        }
        let customer_ref = account.customer_ref.clone().ok_or_else(|| {
            BolaoError::GatewayUnavailable(format!("account {} has no gateway customer", account_id))
        })?;
        let (gateway, timeout) = self.gateway()?;

        let intent = ChargeIntent {
            reference: Uuid::new_v4(),
            account_id,
            amount,
            created_at: Utc::now(),
        };
        self.db.atomic(|unit| {
            unit.account(&account_id)?;
            unit.put_charge_intent(&intent)
        })?;

        let call = gateway.create_charge(&customer_ref, amount, intent.reference);
        let charge = match Self::call(timeout, "create_charge", call).await {
            Ok(charge) => charge,
            Err(GatewayFailure::Rejected(msg)) => {
                self.db.atomic(|unit| unit.remove_charge_intent(&intent.reference))?;
                return Err(BolaoError::GatewayUnavailable(msg));
            }
            Err(failure) => {
                log::warn!("Charge intent {} kept for reconciliation", intent.reference);
                return Err(failure.into());
            }
        };

        let mut tx = Transaction::new(account_id, amount, true, TransactionStatus::Pending)
            .with_gateway(charge.into());
        tx.id = intent.reference;

        let tx = self.db.atomic(|unit| {
            unit.remove_charge_intent(&intent.reference)?;
            // The payment may have been applied through the reference already
            if let Some(existing) = unit.transaction(&account_id, &tx.id)? {
                return Ok(existing);
            }
            unit.put_transaction(&tx)?;
            Ok(tx.clone())
        })?;

        log::info!(
            "{}",
            LogEvent::new("CHARGE_CREATED")
                .field("tx_id", tx.id.to_string())
                .field("account_id", account_id.to_string())
                .field("amount", amount.to_string())
                .field("gateway", gateway.name())
                .service("ledger")
                .build()
        );
        Ok(tx)
    }

    /// Send a PIX payout and book it as one CONFIRMED withdrawal.
    ///
    /// Once the provider has accepted the payout the debit is forced: should
    /// the balance have moved below zero in the meantime, the account is
    /// blocked for reconciliation.
    pub async fn initiate_external_withdrawal(
        &self,
        account_id: AccountId,
        amount: Decimal,
        destination: BankAccount,
    ) -> BolaoResult<Transaction> {
        let account = self.account(&account_id)?;
        if !account.can_withdraw(amount, true, &self.limits) {
            return Err(BolaoError::InsufficientFunds);
        }
        let (gateway, timeout) = self.gateway()?;

        let payout = Self::call(timeout, "create_payout", gateway.create_payout(amount, &destination)).await?;
        let info: GatewayInfo = payout.into();

        let (tx, overdrawn) = self.db.atomic(|unit| {
            let overdrawn = force_debit(unit, &account_id, amount)?;

            let mut tx = Transaction::new(account_id, -amount, true, TransactionStatus::Confirmed)
                .with_gateway(info.clone());
            tx.destination = Some(destination.clone());
            unit.put_transaction(&tx)?;
            Ok((tx, overdrawn))
        })?;

        if overdrawn {
            log::warn!(
                "Account {} overdrawn by payout {}; blocked for reconciliation",
                account_id,
                info.gateway_id
            );
        }
        log_posting!(tx);
        log::info!(
            "{}",
            LogEvent::new("PAYOUT_SENT")
                .field("tx_id", tx.id.to_string())
                .field("transfer_id", info.gateway_id.clone())
                .field("amount", amount.to_string())
                .service("ledger")
                .build()
        );
        Ok(tx)
    }

    /// Delete an unpaid charge at the provider and drop its PENDING record.
    pub async fn cancel_external_deposit(
        &self,
        account_id: AccountId,
        tx_id: TransactionId,
    ) -> BolaoResult<Transaction> {
        let tx = self
            .db
            .transaction(&account_id, &tx_id)?
            .ok_or_else(|| BolaoError::NotFound(format!("Transaction {}", tx_id)))?;
        let charge_id = match (&tx.status, &tx.gateway) {
            (TransactionStatus::Pending, Some(info)) => info.gateway_id.clone(),
            _ => return Err(BolaoError::InvalidDeposit),
        };

        let (gateway, timeout) = self.gateway()?;
        let deleted = Self::call(timeout, "delete_charge", gateway.delete_charge(&charge_id)).await?;
        if !deleted {
            return Err(BolaoError::GatewayUnavailable(format!("charge {} was not deleted", charge_id)));
        }

        Ok(self.expire_charge(&charge_id)?.unwrap_or(tx))
    }

    // ---------------------------------------------------------------------
    // Provider callbacks
    // ---------------------------------------------------------------------

    /// Apply a paid charge. Returns the transaction that was confirmed, or
    /// `None` when the charge was already settled.
    pub fn confirm_charge(&self, charge_id: &str, value: Decimal) -> BolaoResult<Option<Transaction>> {
        self.confirm_payment(charge_id, None, value)
    }

    /// Like [`Ledger::confirm_charge`], falling back to the charge intent
    /// named by `external_reference` when the charge id was never booked.
    pub fn confirm_payment(
        &self,
        charge_id: &str,
        external_reference: Option<&str>,
        value: Decimal,
    ) -> BolaoResult<Option<Transaction>> {
        if value < Decimal::ZERO {
            return Err(BolaoError::InvalidDeposit);
        }
        let reference = external_reference.and_then(|r| Uuid::parse_str(r).ok());
        let confirmed = self.db.atomic(|unit| {
            let mut pending = match unit.transaction_by_gateway_id(charge_id)? {
                Some(tx) => tx,
                None => match reference {
                    Some(reference) => recover_charge(unit, &reference, charge_id, value)?,
                    None => return abort(BolaoError::NotFound(format!("Charge {}", charge_id))),
                },
            };
            if pending.status != TransactionStatus::Pending || pending.kind != TransactionKind::Deposit {
                return Ok(None);
            }

            let mut account = unit.account(&pending.account_id)?;
            account.credit(value);
            unit.put_account(&account)?;

            if pending.amount == value {
                pending.status = TransactionStatus::Confirmed;
                unit.put_transaction(&pending)?;
                return Ok(Some(pending));
            }

            // Paid amount differs from the charge: book what actually arrived.
            pending.status = TransactionStatus::Removed;
            unit.put_transaction(&pending)?;
            let mut tx = Transaction::new(pending.account_id, value, true, TransactionStatus::Confirmed);
            tx.gateway = pending.gateway.clone();
            unit.put_transaction(&tx)?;
            Ok(Some(tx))
        })?;

        match &confirmed {
            Some(tx) => {
                log_posting!(tx);
            }
            None => log::debug!("Charge {} already settled", charge_id),
        }
        Ok(confirmed)
    }

    /// Drop an unpaid charge. No balance change.
    pub fn expire_charge(&self, charge_id: &str) -> BolaoResult<Option<Transaction>> {
        let removed = self.db.atomic(|unit| {
            let Some(mut tx) = unit.transaction_by_gateway_id(charge_id)? else {
                return abort(BolaoError::NotFound(format!("Charge {}", charge_id)));
            };
            if tx.status != TransactionStatus::Pending {
                return Ok(None);
            }
            tx.status = TransactionStatus::Removed;
            unit.put_transaction(&tx)?;
            Ok(Some(tx))
        })?;
        if let Some(tx) = &removed {
            log::info!("Charge {} expired; transaction {} removed", charge_id, tx.id);
        }
        Ok(removed)
    }

    /// Reverse a payout the provider could not deliver.
    pub fn fail_transfer(&self, transfer_id: &str) -> BolaoResult<Option<Transaction>> {
        let failed = self.db.atomic(|unit| {
            let Some(mut tx) = unit.transaction_by_gateway_id(transfer_id)? else {
                return abort(BolaoError::NotFound(format!("Transfer {}", transfer_id)));
            };
            if tx.status != TransactionStatus::Confirmed || tx.kind != TransactionKind::Withdrawal {
                return Ok(None);
            }
            let mut account = unit.account(&tx.account_id)?;
            account.credit(-tx.amount);
            unit.put_account(&account)?;

            tx.status = TransactionStatus::Failed;
            unit.put_transaction(&tx)?;
            Ok(Some(tx))
        })?;
        if let Some(tx) = &failed {
            log::warn!("Transfer {} failed; {} returned to {}", transfer_id, -tx.amount, tx.account_id);
            log_posting!(tx);
        }
        Ok(failed)
    }

    /// Acknowledge a delivered payout
    pub fn complete_transfer(&self, transfer_id: &str) -> BolaoResult<Transaction> {
        let tx = self
            .db
            .transaction_by_gateway_id(transfer_id)?
            .ok_or_else(|| BolaoError::NotFound(format!("Transfer {}", transfer_id)))?;
        log::info!("Transfer {} delivered ({})", transfer_id, tx.status);
        Ok(tx)
    }
}
