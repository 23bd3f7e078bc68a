use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

mod bot;
mod config;
mod error;
mod feed;
mod models;
mod notify;

use bot::{run_poll_loop, EvEngine, PollSettings};
use config::Config;
use feed::{OddsFeed, RacingApiClient};
use notify::{AlertSink, DiscordWebhook, LogSink};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let api_key = config
        .racing_api_key
        .as_deref()
        .context("RACING_API_KEY is required")?;
    let feed: Arc<dyn OddsFeed> = Arc::new(RacingApiClient::new(
        &config.racing_api_url,
        api_key,
        Duration::from_secs(config.feed_timeout_secs),
    )?);

    let sink: Arc<dyn AlertSink> = match config.discord_webhook_url.as_deref() {
        Some(url) => {
            info!("🔴 LIVE mode – alerts will be posted to Discord");
            Arc::new(DiscordWebhook::new(
                url,
                Duration::from_secs(config.sink_timeout_secs),
            )?)
        }
        None => {
            info!("🟡 DRY RUN mode – DISCORD_WEBHOOK_URL not set, alerts are only logged");
            Arc::new(LogSink)
        }
    };

    info!(
        "Consensus: {:?} (books: {:?}, spread ≤ {}), staking: {:?}, min EV {:.1}%, lookahead {}h",
        config.consensus_mode,
        config.trusted_book_names(),
        config.consensus_spread_limit,
        config.staking_policy,
        config.min_ev * 100.0,
        config.max_lookahead_hours
    );

    let engine = EvEngine::from_config(&config);
    let settings = PollSettings::from_config(&config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut poller = tokio::spawn(run_poll_loop(engine, feed, sink, settings, shutdown_rx));

    // The loop only returns on shutdown; finishing early means it panicked
    let engine = tokio::select! {
        received = shutdown_signal() => {
            info!("{} received, finishing current poll", received);
            let _ = shutdown_tx.send(true);
            poller.await.context("Poll loop task panicked")?
        }
        joined = &mut poller => joined.context("Poll loop task panicked")?,
    };
    info!("Shutdown complete ({} alerts posted)", engine.posted().len());

    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM. A listener that cannot be installed never
/// fires, so it cannot stop the bot by itself.
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl-C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "Ctrl-C",
        _ = terminate => "SIGTERM",
    }
}
