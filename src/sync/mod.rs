pub mod api_football;
pub mod source;

pub use api_football::ApiFootballSource;
pub use source::{FailoverSource, FixtureSyncSource, MockFixtureSource};
