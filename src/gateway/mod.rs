pub mod failover;
pub mod mock;
pub mod traits;
pub mod webhook;

pub use failover::FailoverGateway;
pub use mock::MockGateway;
pub use traits::{ChargeInfo, PaymentGateway, PayoutInfo};
pub use webhook::{WebhookEvent, WebhookHandler, WebhookOutcome};
