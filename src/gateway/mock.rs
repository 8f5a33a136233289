//! Mock gateway for testing
//!
//! Succeeds by default; failures and latency can be injected per operation.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use super::traits::{ChargeInfo, PaymentGateway, PayoutInfo};
use crate::models::BankAccount;

#[derive(Debug, Clone, Default)]
struct Behaviour {
    fail_charges: bool,
    fail_payouts: bool,
    delay: Option<Duration>,
}

pub struct MockGateway {
    name: String,
    behaviour: Mutex<Behaviour>,
    seq: AtomicU64,
    charges: Mutex<Vec<(String, Uuid, Decimal)>>,
    payouts: Mutex<Vec<(String, Decimal)>>,
    deleted: Mutex<Vec<String>>,
}

impl MockGateway {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            behaviour: Mutex::new(Behaviour::default()),
            seq: AtomicU64::new(1),
            charges: Mutex::new(Vec::new()),
            payouts: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub fn set_fail_charges(&self, fail: bool) {
        self.behaviour.lock().unwrap().fail_charges = fail;
    }

    pub fn set_fail_payouts(&self, fail: bool) {
        self.behaviour.lock().unwrap().fail_payouts = fail;
    }

    /// Make every call sleep before answering
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.behaviour.lock().unwrap().delay = delay;
    }

    /// (charge_id, reference, amount) of every charge created
    pub fn charges(&self) -> Vec<(String, Uuid, Decimal)> {
        self.charges.lock().unwrap().clone()
    }

    pub fn payouts(&self) -> Vec<(String, Decimal)> {
        self.payouts.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    async fn pause(&self) -> Behaviour {
        let behaviour = self.behaviour.lock().unwrap().clone();
        if let Some(delay) = behaviour.delay {
            tokio::time::sleep(delay).await;
        }
        behaviour
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_charge(
        &self,
        customer_ref: &str,
        amount: Decimal,
        reference: Uuid,
    ) -> Result<ChargeInfo> {
        log::debug!("[{}] create_charge({}, {}, ref={})", self.name, customer_ref, amount, reference);
        if self.pause().await.fail_charges {
            return Err(anyhow!("{}: charge rejected", self.name));
        }
        let charge_id = format!("pay_{}", self.seq.fetch_add(1, Ordering::SeqCst));
        self.charges.lock().unwrap().push((charge_id.clone(), reference, amount));
        Ok(ChargeInfo {
            invoice_url: format!("https://pay.example/i/{}", charge_id),
            billet_url: format!("https://pay.example/b/{}", charge_id),
            charge_id,
            due_date: (Utc::now() + ChronoDuration::days(1)).date_naive(),
            value: amount,
            net_value: amount,
        })
    }

    async fn create_payout(&self, amount: Decimal, destination: &BankAccount) -> Result<PayoutInfo> {
        log::debug!("[{}] create_payout({}, bank={})", self.name, amount, destination.bank_code);
        if self.pause().await.fail_payouts {
            return Err(anyhow!("{}: payout rejected", self.name));
        }
        let transfer_id = format!("tra_{}", self.seq.fetch_add(1, Ordering::SeqCst));
        self.payouts.lock().unwrap().push((transfer_id.clone(), amount));
        Ok(PayoutInfo { transfer_id, value: amount, net_value: amount })
    }

    async fn delete_charge(&self, charge_id: &str) -> Result<bool> {
        log::debug!("[{}] delete_charge({})", self.name, charge_id);
        self.pause().await;
        self.deleted.lock().unwrap().push(charge_id.to_string());
        Ok(true)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
