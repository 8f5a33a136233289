//! Payment gateway trait
//!
//! Defines the interface for the external provider that collects PIX charges
//! and sends PIX payouts.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{BankAccount, GatewayInfo};

/// Charge created at the provider for a cash-in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeInfo {
    pub charge_id: String,
    pub due_date: NaiveDate,
    pub value: Decimal,
    pub net_value: Decimal,
    pub invoice_url: String,
    pub billet_url: String,
}

/// Transfer created at the provider for a cash-out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutInfo {
    pub transfer_id: String,
    pub value: Decimal,
    pub net_value: Decimal,
}

impl From<ChargeInfo> for GatewayInfo {
    fn from(charge: ChargeInfo) -> Self {
        GatewayInfo {
            gateway_id: charge.charge_id,
            due_date: Some(charge.due_date),
            value: charge.value,
            net_value: charge.net_value,
            invoice_url: Some(charge.invoice_url),
            billet_url: Some(charge.billet_url),
        }
    }
}

impl From<PayoutInfo> for GatewayInfo {
    fn from(payout: PayoutInfo) -> Self {
        GatewayInfo {
            gateway_id: payout.transfer_id,
            due_date: None,
            value: payout.value,
            net_value: payout.net_value,
            invoice_url: None,
            billet_url: None,
        }
    }
}

/// Payment provider capability.
///
/// Any `Err` is treated by the ledger as "provider unavailable": no balance
/// changes are made for a failed call.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a PIX charge for `customer_ref`.
    ///
    /// `reference` is the id the pending transaction will carry; providers
    /// echo it back in callbacks and use it as an idempotency key.
    async fn create_charge(
        &self,
        customer_ref: &str,
        amount: Decimal,
        reference: Uuid,
    ) -> Result<ChargeInfo>;

    /// Send a PIX transfer to an external bank account
    async fn create_payout(&self, amount: Decimal, destination: &BankAccount) -> Result<PayoutInfo>;

    /// Delete an unpaid charge
    async fn delete_charge(&self, charge_id: &str) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
