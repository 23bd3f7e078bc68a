use clap::Parser;
use chrono_tz::Tz;

use crate::bot::consensus::{ConsensusMode, DEFAULT_SPREAD_LIMIT};
use crate::bot::selector::DEFAULT_DISPLAY_LIMIT;
use crate::bot::staking::{StakeTier, StakingPolicy, StakingPolicyKind, DEFAULT_STAKE_TIERS};

/// Horse-racing positive-EV alert bot
#[derive(Parser, Debug, Clone)]
#[command(name = "racing-ev-bot", version, about)]
pub struct Config {
    /// Racing odds API endpoint
    #[arg(
        long,
        env = "RACING_API_URL",
        default_value = "https://api.example.com/au/racing/odds"
    )]
    pub racing_api_url: String,

    /// Racing odds API key
    #[arg(long, env = "RACING_API_KEY")]
    pub racing_api_key: Option<String>,

    /// Discord webhook for alerts. Alerts are only logged when unset.
    #[arg(long, env = "DISCORD_WEBHOOK_URL")]
    pub discord_webhook_url: Option<String>,

    /// Minimum expected value to alert on (e.g. 0.05 = 5%)
    #[arg(long, env = "MIN_EV", default_value = "0.05")]
    pub min_ev: f64,

    /// Ignore races starting more than this many hours from now
    #[arg(long, env = "MAX_LOOKAHEAD_HOURS", default_value = "24")]
    pub max_lookahead_hours: u32,

    /// Seconds between odds polls
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value = "900")]
    pub poll_interval_secs: u64,

    /// How the reference probability is derived
    #[arg(long, env = "CONSENSUS_MODE", value_enum, default_value = "trusted")]
    pub consensus_mode: ConsensusMode,

    /// Bookmakers whose prices form the consensus (comma separated)
    #[arg(
        long,
        env = "TRUSTED_BOOKS",
        value_delimiter = ',',
        default_value = "TAB,Sportsbet,Ladbrokes,Neds"
    )]
    pub trusted_books: Vec<String>,

    /// Maximum max/min ratio between trusted prices
    #[arg(long, env = "CONSENSUS_SPREAD_LIMIT", default_value_t = DEFAULT_SPREAD_LIMIT)]
    pub consensus_spread_limit: f64,

    /// Stake sizing policy
    #[arg(
        long,
        env = "STAKING_POLICY",
        value_enum,
        default_value = "fractional-kelly"
    )]
    pub staking_policy: StakingPolicyKind,

    /// Kelly multiplier for the fractional-kelly policy (0.0–1.0)
    #[arg(long, env = "KELLY_FRACTION", default_value = "0.1")]
    pub kelly_fraction: f64,

    /// EV buckets for the tiered policy, as min_ev:units pairs
    #[arg(
        long,
        env = "STAKE_TIERS",
        value_delimiter = ',',
        default_value = DEFAULT_STAKE_TIERS
    )]
    pub stake_tiers: Vec<StakeTier>,

    /// Tiered stake for bets above MIN_EV that miss every bucket
    #[arg(long, env = "TIER_FLOOR_UNITS", default_value = "0.5")]
    pub tier_floor_units: f64,

    /// Number of other bookmakers listed in an alert
    #[arg(
        long,
        env = "SUPPLEMENTARY_DISPLAY_LIMIT",
        default_value_t = DEFAULT_DISPLAY_LIMIT
    )]
    pub supplementary_display_limit: usize,

    /// Timezone of feed start times that carry no offset
    #[arg(long, env = "FEED_TIMEZONE", default_value = "Australia/Sydney")]
    pub feed_timezone: Tz,

    /// Timezone used to print start times in alerts
    #[arg(long, env = "DISPLAY_TIMEZONE", default_value = "Australia/Sydney")]
    pub display_timezone: Tz,

    /// Odds feed request timeout in seconds
    #[arg(long, env = "FEED_TIMEOUT_SECS", default_value = "10")]
    pub feed_timeout_secs: u64,

    /// Alert delivery timeout in seconds
    #[arg(long, env = "SINK_TIMEOUT_SECS", default_value = "10")]
    pub sink_timeout_secs: u64,

    /// Extra delivery attempts after a failed alert send
    #[arg(long, env = "SINK_MAX_RETRIES", default_value = "2")]
    pub sink_max_retries: u32,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.racing_api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => {}
            _ => anyhow::bail!("RACING_API_KEY is required"),
        }
        if !self.min_ev.is_finite() {
            anyhow::bail!("min_ev must be a finite number");
        }
        if self.max_lookahead_hours == 0 {
            anyhow::bail!("max_lookahead_hours must be positive");
        }
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be positive");
        }
        if !(self.consensus_spread_limit >= 1.0) {
            anyhow::bail!("consensus_spread_limit must be at least 1.0");
        }
        if self.consensus_mode == ConsensusMode::Trusted && self.trusted_book_names().len() < 2 {
            anyhow::bail!(
                "consensus_mode=trusted needs at least 2 TRUSTED_BOOKS; use --consensus-mode average otherwise"
            );
        }
        match self.staking_policy {
            StakingPolicyKind::FractionalKelly => {
                if !(self.kelly_fraction > 0.0 && self.kelly_fraction <= 1.0) {
                    anyhow::bail!("kelly_fraction must be in (0.0, 1.0]");
                }
            }
            StakingPolicyKind::Tiered => {
                if self.stake_tiers.iter().any(|t| !(t.units > 0.0)) {
                    anyhow::bail!("stake_tiers units must be positive");
                }
                if !(self.tier_floor_units >= 0.0) {
                    anyhow::bail!("tier_floor_units must not be negative");
                }
            }
        }
        if self.feed_timeout_secs == 0 || self.sink_timeout_secs == 0 {
            anyhow::bail!("feed and sink timeouts must be positive");
        }
        Ok(())
    }

    /// Trusted bookmaker names with blanks removed.
    pub fn trusted_book_names(&self) -> Vec<String> {
        self.trusted_books
            .iter()
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .collect()
    }

    pub fn staking(&self) -> StakingPolicy {
        match self.staking_policy {
            StakingPolicyKind::FractionalKelly => StakingPolicy::FractionalKelly {
                kelly_fraction: self.kelly_fraction,
            },
            StakingPolicyKind::Tiered => StakingPolicy::tiered(
                self.stake_tiers.clone(),
                self.tier_floor_units,
                self.min_ev,
            ),
        }
    }
}
