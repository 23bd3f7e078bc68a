pub mod provider;
pub mod racing_api;

pub use provider::OddsFeed;
pub use racing_api::{normalize_snapshot, RacingApiClient};
