//! Structured money-movement events
//!
//! Every committed balance change is logged as one JSON line so the ledger
//! can be audited from logs alone.

use chrono::Utc;
use serde_json::{json, Value};

/// Structured log event builder
///
/// Usage:
/// ```
/// use bolao::logging::LogEvent;
///
/// let log_value = LogEvent::new("POSTING")
///     .field("account_id", "5b0f...")
///     .field("amount", "-10.00")
///     .service("ledger")
///     .build();
///
/// log::info!("{}", log_value);
/// ```
pub struct LogEvent {
    fields: serde_json::Map<String, Value>,
}

impl LogEvent {
    pub fn new(event: &str) -> Self {
        let mut fields = serde_json::Map::new();
        fields.insert("event".to_string(), json!(event));
        fields.insert("timestamp_ms".to_string(), json!(Utc::now().timestamp_millis()));

        Self { fields }
    }

    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn service(mut self, service: &str) -> Self {
        self.fields.insert("service".to_string(), json!(service));
        self
    }

    pub fn build(self) -> Value {
        Value::Object(self.fields)
    }
}

/// Log one committed ledger transaction
#[macro_export]
macro_rules! log_posting {
    ($tx:expr) => {
        log::info!(
            "{}",
            $crate::logging::LogEvent::new("POSTING")
                .field("tx_id", $tx.id.to_string())
                .field("account_id", $tx.account_id.to_string())
                .field("amount", $tx.amount.to_string())
                .field("kind", $tx.kind.as_ref())
                .field("status", $tx.status.as_ref())
                .service("ledger")
                .build()
        );
    };
}

/// Log a pool reaching a terminal status
#[macro_export]
macro_rules! log_pool_closed {
    ($event:expr, $pool_id:expr, $tickets:expr, $paid:expr) => {
        log::info!(
            "{}",
            $crate::logging::LogEvent::new($event)
                .field("pool_id", $pool_id.to_string())
                .field("tickets", $tickets)
                .field("paid", $paid.to_string())
                .service("settlement")
                .build()
        );
    };
}
