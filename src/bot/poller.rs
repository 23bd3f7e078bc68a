use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{FeedError, SinkError};
use crate::feed::OddsFeed;
use crate::notify::AlertSink;

use super::engine::{EvEngine, PendingAlert, PollReport};

/// Timing for the poll loop and its outbound calls.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub feed_timeout: Duration,
    pub sink_timeout: Duration,
    pub sink_max_retries: u32,
    /// Base delay before the first delivery retry; doubles each attempt
    pub retry_backoff: Duration,
}

impl PollSettings {
    pub fn from_config(config: &Config) -> Self {
        PollSettings {
            interval: Duration::from_secs(config.poll_interval_secs),
            feed_timeout: Duration::from_secs(config.feed_timeout_secs),
            sink_timeout: Duration::from_secs(config.sink_timeout_secs),
            sink_max_retries: config.sink_max_retries,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Fetch, score and deliver once.
///
/// A feed failure aborts this poll only. Alerts that cannot be delivered are
/// released so a later poll can retry them.
pub async fn poll_once(
    engine: &mut EvEngine,
    feed: &dyn OddsFeed,
    sink: &dyn AlertSink,
    settings: &PollSettings,
    now: DateTime<Utc>,
) -> Result<PollReport, FeedError> {
    let raw = match tokio::time::timeout(settings.feed_timeout, feed.fetch_snapshot()).await {
        Ok(result) => result?,
        Err(_) => return Err(FeedError::Timeout(settings.feed_timeout)),
    };

    let (alerts, mut report) = engine.process_snapshot(&raw, now);

    for alert in alerts {
        match deliver(sink, &alert, settings).await {
            Ok(()) => {
                report.delivered += 1;
                info!(
                    "Alert sent via {}: {} / {} (EV {:.2}%)",
                    sink.name(),
                    alert.race_name,
                    alert.horse_name,
                    alert.ev * 100.0
                );
            }
            Err(e) => {
                report.delivery_failures += 1;
                engine.posted().release(&alert.key);
                error!(
                    "Alert for {} / {} not delivered, will retry next poll: {}",
                    alert.race_name, alert.horse_name, e
                );
            }
        }
    }

    Ok(report)
}

async fn deliver(
    sink: &dyn AlertSink,
    alert: &PendingAlert,
    settings: &PollSettings,
) -> Result<(), SinkError> {
    let mut attempt = 0u32;
    loop {
        let send = tokio::time::timeout(settings.sink_timeout, sink.send(&alert.message));
        let result = match send.await {
            Ok(r) => r,
            Err(_) => Err(SinkError::Timeout(settings.sink_timeout)),
        };
        match result {
            Ok(()) => return Ok(()),
            Err(e) if attempt < settings.sink_max_retries => {
                let delay = backoff_with_jitter(settings.retry_backoff, attempt);
                warn!(
                    "Delivery attempt {} via {} failed: {} (retrying in {:?})",
                    attempt + 1,
                    sink.name(),
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn backoff_with_jitter(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1u32 << attempt.min(8));
    let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis().min(1_000) as u64 / 2);
    exp + Duration::from_millis(jitter_ms)
}

/// Poll on a fixed interval until `shutdown` flips to `true` or its sender
/// is dropped.
///
/// Polls never overlap, and shutdown is only observed between polls, so an
/// in-flight poll always completes.
pub async fn run_poll_loop(
    mut engine: EvEngine,
    feed: Arc<dyn OddsFeed>,
    sink: Arc<dyn AlertSink>,
    settings: PollSettings,
    mut shutdown: watch::Receiver<bool>,
) -> EvEngine {
    info!(
        "Poll loop started (feed={}, sink={}, interval={:?})",
        feed.name(),
        sink.name(),
        settings.interval
    );

    let mut interval = tokio::time::interval(settings.interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = interval.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        match poll_once(&mut engine, feed.as_ref(), sink.as_ref(), &settings, Utc::now()).await {
            Ok(report) => info!(
                "Poll complete: races={} in_window={} malformed={} horses={} \
                 skipped(posted={} no_quotes={} consensus={} below_ev={} stake={}) \
                 alerts={} delivered={} failed={} posted_total={}",
                report.races,
                report.races_in_window,
                report.malformed,
                report.horses,
                report.already_posted,
                report.no_quotes,
                report.insufficient_consensus,
                report.below_threshold,
                report.non_positive_stake,
                report.alerts,
                report.delivered,
                report.delivery_failures,
                engine.posted().len()
            ),
            Err(e) if e.is_unavailable() => warn!("Poll aborted, odds feed unavailable: {}", e),
            Err(e) => error!("Poll aborted: {}", e),
        }
    }

    info!("Poll loop stopped");
    engine
}
