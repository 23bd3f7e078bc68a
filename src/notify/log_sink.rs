use async_trait::async_trait;
use tracing::info;

use super::AlertSink;
use crate::error::SinkError;

/// Dry-run sink: alerts go to the log only.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn send(&self, message: &str) -> Result<(), SinkError> {
        info!("🟡 [dry run] alert:\n{}", message);
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}
