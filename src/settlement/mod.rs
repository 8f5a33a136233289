pub mod engine;
pub mod types;
pub mod worker;

pub use engine::SettlementEngine;
pub use types::{
    generate_entry_code, Actor, CreatePoolRequest, PoolSummary, SettlementBranch, SettlementReport,
};
pub use worker::SweepWorker;
