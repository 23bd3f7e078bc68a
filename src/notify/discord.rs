use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use super::AlertSink;
use crate::error::SinkError;

/// Discord caps message content at 2000 characters.
const MAX_CONTENT_CHARS: usize = 2000;

/// Posts alerts to a Discord channel through an incoming webhook.
#[derive(Clone)]
pub struct DiscordWebhook {
    http: Client,
    url: Url,
}

impl DiscordWebhook {
    pub fn new(webhook_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        let url = Url::parse(webhook_url).context("Invalid Discord webhook URL")?;
        Ok(DiscordWebhook { http, url })
    }
}

#[async_trait]
impl AlertSink for DiscordWebhook {
    fn name(&self) -> &str {
        "discord"
    }

    async fn send(&self, message: &str) -> Result<(), SinkError> {
        let body = serde_json::json!({ "content": truncate_content(message) });
        debug!("Posting alert to Discord ({} chars)", message.chars().count());

        let resp = self.http.post(self.url.clone()).json(&body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(SinkError::Status { status, body });
        }
        Ok(())
    }
}

fn truncate_content(message: &str) -> String {
    if message.chars().count() <= MAX_CONTENT_CHARS {
        return message.to_string();
    }
    let mut out: String = message.chars().take(MAX_CONTENT_CHARS - 1).collect();
    out.push('…');
    out
}
