use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use super::traits::{ChargeInfo, PaymentGateway, PayoutInfo};
use crate::models::BankAccount;

/// Ordered list of providers tried in sequence.
///
/// Charges and deletions fall through to the next provider on error. Payouts
/// only go to the primary: an error does not prove that no money was sent, so
/// retrying elsewhere could pay twice.
pub struct FailoverGateway {
    providers: Vec<Arc<dyn PaymentGateway>>,
}

impl FailoverGateway {
    pub fn new(providers: Vec<Arc<dyn PaymentGateway>>) -> Self {
        Self { providers }
    }

    fn primary(&self) -> Result<&Arc<dyn PaymentGateway>> {
        self.providers.first().ok_or_else(|| anyhow!("no payment provider configured"))
    }
}

#[async_trait]
impl PaymentGateway for FailoverGateway {
    async fn create_charge(
        &self,
        customer_ref: &str,
        amount: Decimal,
        reference: Uuid,
    ) -> Result<ChargeInfo> {
        let mut last_err = anyhow!("no payment provider configured");
        for provider in &self.providers {
            match provider.create_charge(customer_ref, amount, reference).await {
                Ok(charge) => return Ok(charge),
                Err(e) => {
                    log::warn!("Provider {} failed to create charge: {}", provider.name(), e);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    async fn create_payout(&self, amount: Decimal, destination: &BankAccount) -> Result<PayoutInfo> {
        self.primary()?.create_payout(amount, destination).await
    }

    async fn delete_charge(&self, charge_id: &str) -> Result<bool> {
        let mut last_err = anyhow!("no payment provider configured");
        for provider in &self.providers {
            match provider.delete_charge(charge_id).await {
                Ok(deleted) => return Ok(deleted),
                Err(e) => {
                    log::warn!("Provider {} failed to delete charge {}: {}", provider.name(), charge_id, e);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    fn name(&self) -> &str {
        "failover"
    }
}
