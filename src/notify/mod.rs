pub mod discord;
pub mod log_sink;

pub use discord::DiscordWebhook;
pub use log_sink::LogSink;

use async_trait::async_trait;

use crate::error::SinkError;

/// Destination for formatted alert messages.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, message: &str) -> Result<(), SinkError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}
