//! Provider callbacks
//!
//! The provider posts a JSON body tagged by `event`. Unknown event names
//! deserialize to [`WebhookEvent::Unknown`] and are acknowledged without
//! effect.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::BolaoResult;
use crate::ledger::Ledger;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub id: String,
    #[serde(default)]
    pub external_reference: Option<String>,
    pub value: Decimal,
    #[serde(default)]
    pub net_value: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPayload {
    pub id: String,
    #[serde(default)]
    pub value: Option<Decimal>,
    #[serde(default)]
    pub fail_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookEvent {
    PaymentReceived { payment: PaymentPayload },
    PaymentOverdue { payment: PaymentPayload },
    TransferFailed { transfer: TransferPayload },
    TransferDone { transfer: TransferPayload },
    #[serde(other)]
    Unknown,
}

impl WebhookEvent {
    pub fn from_json(body: &[u8]) -> anyhow::Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// What a callback did to the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied,
    /// Already applied earlier; redelivery is harmless
    Duplicate,
    Ignored,
}

pub struct WebhookHandler {
    ledger: Arc<Ledger>,
}

impl WebhookHandler {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    pub fn handle(&self, event: &WebhookEvent) -> BolaoResult<WebhookOutcome> {
        let outcome = match event {
            WebhookEvent::PaymentReceived { payment } => {
                let confirmed = self.ledger.confirm_payment(
                    &payment.id,
                    payment.external_reference.as_deref(),
                    payment.value,
                )?;
                applied(confirmed.is_some())
            }
            WebhookEvent::PaymentOverdue { payment } => {
                applied(self.ledger.expire_charge(&payment.id)?.is_some())
            }
            WebhookEvent::TransferFailed { transfer } => {
                log::warn!(
                    "Transfer {} failed: {}",
                    transfer.id,
                    transfer.fail_reason.as_deref().unwrap_or("no reason given")
                );
                applied(self.ledger.fail_transfer(&transfer.id)?.is_some())
            }
            WebhookEvent::TransferDone { transfer } => {
                self.ledger.complete_transfer(&transfer.id)?;
                WebhookOutcome::Applied
            }
            WebhookEvent::Unknown => WebhookOutcome::Ignored,
        };
        log::info!("Webhook {} -> {:?}", event_name(event), outcome);
        Ok(outcome)
    }
}

fn applied(changed: bool) -> WebhookOutcome {
    if changed {
        WebhookOutcome::Applied
    } else {
        WebhookOutcome::Duplicate
    }
}

fn event_name(event: &WebhookEvent) -> &'static str {
    match event {
        WebhookEvent::PaymentReceived { .. } => "PAYMENT_RECEIVED",
        WebhookEvent::PaymentOverdue { .. } => "PAYMENT_OVERDUE",
        WebhookEvent::TransferFailed { .. } => "TRANSFER_FAILED",
        WebhookEvent::TransferDone { .. } => "TRANSFER_DONE",
        WebhookEvent::Unknown => "UNKNOWN",
    }
}
