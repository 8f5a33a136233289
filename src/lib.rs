pub mod configure;
pub mod db;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod logger;
pub mod logging;
pub mod models;
pub mod scheduler;
pub mod settlement;
pub mod sync;

pub use error::{BolaoError, BolaoResult, ErrorClass};
