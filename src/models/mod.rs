pub use account::*;
pub use fixture::*;
pub use pool::*;
pub use ticket::*;
pub use transaction::*;

pub mod account;
pub mod fixture;
pub mod pool;
pub mod ticket;
pub mod transaction;
