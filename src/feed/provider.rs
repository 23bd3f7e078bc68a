use async_trait::async_trait;

use crate::error::FeedError;

/// Trait that every odds feed must implement.
#[async_trait]
pub trait OddsFeed: Send + Sync {
    /// Return the raw snapshot of all races currently offered.
    async fn fetch_snapshot(&self) -> Result<serde_json::Value, FeedError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}
