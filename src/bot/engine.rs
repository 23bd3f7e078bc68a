use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::feed::normalize_snapshot;
use crate::models::{BookmakerQuote, HorseEntry, Race};

use super::alerts::{format_alert, BetKey, PostedBets};
use super::consensus::{Consensus, ConsensusEstimator, InsufficientReason};
use super::selector::{select_best, Movement, MovementTracker};
use super::staking::{expected_value, StakingPolicy};

/// Tunables the engine needs on every poll.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub min_ev: f64,
    pub max_lookahead: Duration,
    pub display_limit: usize,
    pub feed_tz: Tz,
    pub display_tz: Tz,
}

/// Everything known about a qualifying bet for one poll.
#[derive(Debug, Clone, PartialEq)]
pub struct EvSignal {
    pub ev: f64,
    pub true_probability: f64,
    pub best_price: f64,
    pub best_book: String,
    pub stake: f64,
    pub supplementary: Vec<BookmakerQuote>,
    pub movements: Vec<Movement>,
}

/// Normal reasons a horse produces no alert.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Skip {
    AlreadyPosted,
    NoQuotes,
    Insufficient(InsufficientReason),
    BelowThreshold { ev: f64 },
    NonPositiveStake,
}

/// An alert whose key has been claimed but not yet delivered.
#[derive(Debug, Clone)]
pub struct PendingAlert {
    pub key: BetKey,
    pub race_name: String,
    pub horse_name: String,
    pub ev: f64,
    pub message: String,
}

/// Per-poll counters, logged once the poll completes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub races: usize,
    pub races_in_window: usize,
    pub malformed: usize,
    pub horses: usize,
    pub already_posted: usize,
    pub no_quotes: usize,
    pub insufficient_consensus: usize,
    pub below_threshold: usize,
    pub non_positive_stake: usize,
    pub alerts: usize,
    pub delivered: usize,
    pub delivery_failures: usize,
}

impl PollReport {
    fn record_skip(&mut self, skip: &Skip) {
        match skip {
            Skip::AlreadyPosted => self.already_posted += 1,
            Skip::NoQuotes => self.no_quotes += 1,
            Skip::Insufficient(_) => self.insufficient_consensus += 1,
            Skip::BelowThreshold { .. } => self.below_threshold += 1,
            Skip::NonPositiveStake => self.non_positive_stake += 1,
        }
    }
}

/// The EV signal engine. Owns the price history and the posted-bet set for
/// the lifetime of the process; create it once and reuse it for every poll.
pub struct EvEngine {
    settings: EngineSettings,
    estimator: ConsensusEstimator,
    staking: StakingPolicy,
    tracker: MovementTracker,
    posted: PostedBets,
}

impl EvEngine {
    pub fn new(
        settings: EngineSettings,
        estimator: ConsensusEstimator,
        staking: StakingPolicy,
    ) -> Self {
        EvEngine {
            settings,
            estimator,
            staking,
            tracker: MovementTracker::new(),
            posted: PostedBets::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let settings = EngineSettings {
            min_ev: config.min_ev,
            max_lookahead: Duration::hours(i64::from(config.max_lookahead_hours)),
            display_limit: config.supplementary_display_limit,
            feed_tz: config.feed_timezone,
            display_tz: config.display_timezone,
        };
        let estimator = ConsensusEstimator::new(
            config.consensus_mode,
            config.trusted_book_names(),
            config.consensus_spread_limit,
        );
        Self::new(settings, estimator, config.staking())
    }

    /// Shared handle on the posted-bet set, used to roll back failed sends.
    pub fn posted(&self) -> &PostedBets {
        &self.posted
    }

    /// Score one horse.
    ///
    /// Price history is updated for every quote, even when the horse is
    /// later skipped for consensus or EV reasons.
    pub fn evaluate_horse(&mut self, race: &Race, horse: &HorseEntry) -> Result<EvSignal, Skip> {
        if self.posted.is_posted(&BetKey::new(&race.id, &horse.id)) {
            return Err(Skip::AlreadyPosted);
        }

        let best = select_best(&horse.quotes, self.settings.display_limit).ok_or(Skip::NoQuotes)?;
        let movements = self.tracker.observe(&race.id, &horse.id, &horse.quotes);

        let true_probability = match self.estimator.estimate(&horse.quotes, &best) {
            Consensus::Estimate {
                true_probability,
                contributors,
                spread,
            } => {
                debug!(
                    race = %race.id,
                    horse = %horse.name,
                    contributors,
                    spread,
                    true_probability,
                    "Consensus estimate"
                );
                true_probability
            }
            Consensus::Insufficient(reason) => return Err(Skip::Insufficient(reason)),
        };

        let ev = expected_value(best.price, true_probability);
        if ev < self.settings.min_ev {
            return Err(Skip::BelowThreshold { ev });
        }

        let stake = self.staking.stake(ev, best.price);
        if stake <= 0.0 {
            return Err(Skip::NonPositiveStake);
        }

        Ok(EvSignal {
            ev,
            true_probability,
            best_price: best.price,
            best_book: best.bookmaker,
            stake,
            supplementary: best.supplementary,
            movements,
        })
    }

    /// Run one full pass over a raw feed snapshot.
    ///
    /// Each returned alert has already been claimed in the posted-bet set;
    /// the caller must `release` it if delivery fails.
    pub fn process_snapshot(
        &mut self,
        raw: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> (Vec<PendingAlert>, PollReport) {
        let snapshot = normalize_snapshot(raw, self.settings.feed_tz);
        let mut report = PollReport {
            races: snapshot.races.len(),
            malformed: snapshot.errors.len(),
            ..Default::default()
        };
        for e in &snapshot.errors {
            warn!("Skipping feed item: {}", e);
        }

        let mut alerts = Vec::new();
        for race in &snapshot.races {
            if !race.within_window(now, self.settings.max_lookahead) {
                continue;
            }
            report.races_in_window += 1;

            for horse in &race.horses {
                report.horses += 1;
                let signal = match self.evaluate_horse(race, horse) {
                    Ok(signal) => signal,
                    Err(skip) => {
                        debug!(race = %race.id, horse = %horse.name, ?skip, "No signal");
                        report.record_skip(&skip);
                        continue;
                    }
                };

                let key = BetKey::new(&race.id, &horse.id);
                if !self.posted.try_claim(&key) {
                    report.record_skip(&Skip::AlreadyPosted);
                    continue;
                }

                info!(
                    "EV signal: {} / {} @ {:.2} ({}) p={:.3} EV={:.2}% stake={}u",
                    race.name,
                    horse.name,
                    signal.best_price,
                    signal.best_book,
                    signal.true_probability,
                    signal.ev * 100.0,
                    signal.stake
                );
                alerts.push(PendingAlert {
                    message: format_alert(race, horse, &signal, now, self.settings.display_tz),
                    key,
                    race_name: race.name.clone(),
                    horse_name: horse.name.clone(),
                    ev: signal.ev,
                });
            }
        }

        report.alerts = alerts.len();
        (alerts, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::consensus::{ConsensusMode, DEFAULT_SPREAD_LIMIT};
    use crate::bot::staking::default_tiers;
    use approx::assert_relative_eq;
    use chrono::TimeZone;
    use chrono_tz::Australia::Sydney;
    use serde_json::json;

    fn settings() -> EngineSettings {
        EngineSettings {
            min_ev: 0.05,
            max_lookahead: Duration::hours(24),
            display_limit: 4,
            feed_tz: Sydney,
            display_tz: Sydney,
        }
    }

    fn engine(staking: StakingPolicy) -> EvEngine {
        let estimator = ConsensusEstimator::new(
            ConsensusMode::Trusted,
            ["TAB", "Sportsbet"],
            DEFAULT_SPREAD_LIMIT,
        );
        EvEngine::new(settings(), estimator, staking)
    }

    fn kelly() -> StakingPolicy {
        StakingPolicy::FractionalKelly { kelly_fraction: 0.1 }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 1, 0, 0).unwrap()
    }

    fn snapshot(odds: serde_json::Value) -> serde_json::Value {
        json!([{
            "id": "race-1",
            "name": "Randwick R1",
            "start_time": "2026-03-01T02:00:00Z",
            "horses": [{ "id": "h1", "name": "Fast Lad", "odds": odds }]
        }])
    }

    #[test]
    fn test_end_to_end_single_alert() {
        let mut engine = engine(kelly());
        let raw = snapshot(json!({ "TAB": 5.0, "Sportsbet": 5.2, "LongshotBook": 6.0 }));

        let (alerts, report) = engine.process_snapshot(&raw, now());
        assert_eq!(alerts.len(), 1);
        assert_eq!(report.alerts, 1);
        let true_prob = (0.2 + 1.0 / 5.2) / 2.0;
        assert_relative_eq!(alerts[0].ev, 6.0 * true_prob - 1.0, epsilon = 1e-9);
        assert_relative_eq!(alerts[0].ev, 0.177, epsilon = 1e-3);
        assert!(alerts[0].message.contains("📍 Best Book: LongshotBook"));
        assert!(alerts[0].message.contains("📊 EV: 17.69%"));
        assert!(alerts[0].message.contains("- Sportsbet: 5.20\n- TAB: 5.00"));

        let (alerts, report) = engine.process_snapshot(&raw, now());
        assert!(alerts.is_empty());
        assert_eq!(report.already_posted, 1);
    }

    #[test]
    fn test_dedup_ignores_later_ev_changes() {
        let mut engine = engine(kelly());
        let first = snapshot(json!({ "TAB": 5.0, "Sportsbet": 5.2, "LongshotBook": 6.0 }));
        let second = snapshot(json!({ "TAB": 5.0, "Sportsbet": 5.2, "OtherBook": 7.5 }));

        let (a1, _) = engine.process_snapshot(&first, now());
        let (a2, _) = engine.process_snapshot(&second, now());
        assert_eq!(a1.len() + a2.len(), 1);
        assert_eq!(a1.len(), 1);
    }

    #[test]
    fn test_worked_example_tiered_vs_kelly() {
        // Trusted 5.0/5.0 → p = 0.2; best 6.0 → EV = 0.2
        let raw = snapshot(json!({ "TAB": 5.0, "Sportsbet": 5.0, "LongshotBook": 6.0 }));
        let race_horse = normalize_snapshot(&raw, Sydney).races.remove(0);
        let horse = &race_horse.horses[0];

        let signal = engine(kelly()).evaluate_horse(&race_horse, horse).unwrap();
        assert_relative_eq!(signal.ev, 0.2, epsilon = 1e-9);
        assert_relative_eq!(signal.stake, 0.5);

        let tiered = StakingPolicy::tiered(default_tiers(), 0.5, 0.05);
        let signal = engine(tiered).evaluate_horse(&race_horse, horse).unwrap();
        assert_relative_eq!(signal.stake, 3.0);
    }

    #[test]
    fn test_movement_surfaces_on_later_alert() {
        let mut engine = engine(kelly());
        // First poll: no edge, but history is recorded
        let quiet = snapshot(json!({ "TAB": 5.0, "Sportsbet": 5.2, "LongshotBook": 5.1 }));
        let (alerts, report) = engine.process_snapshot(&quiet, now());
        assert!(alerts.is_empty());
        assert_eq!(report.below_threshold, 1);

        let drift = snapshot(json!({ "TAB": 5.0, "Sportsbet": 5.2, "LongshotBook": 6.0 }));
        let (alerts, _) = engine.process_snapshot(&drift, now());
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0]
            .message
            .contains("LongshotBook moved: 5.10 → 6.00"));
        assert!(!alerts[0].message.contains("TAB moved"));
    }

    #[test]
    fn test_consensus_skips_are_counted() {
        let mut engine = engine(kelly());
        let raw = json!([{
            "id": "race-1",
            "name": "Randwick R1",
            "start_time": "2026-03-01T02:00:00Z",
            "horses": [
                { "id": "h1", "name": "One Trusted", "odds": { "TAB": 5.0, "X": 9.0 } },
                { "id": "h2", "name": "Wide", "odds": { "TAB": 4.0, "Sportsbet": 5.0, "X": 9.0 } },
                { "id": "h3", "name": "Scratched", "odds": {} }
            ]
        }]);
        let (alerts, report) = engine.process_snapshot(&raw, now());
        assert!(alerts.is_empty());
        assert_eq!(report.horses, 3);
        assert_eq!(report.insufficient_consensus, 2);
        assert_eq!(report.no_quotes, 1);
    }

    #[test]
    fn test_repeated_trusted_book_is_one_contributor() {
        let mut engine = engine(kelly());
        let raw = snapshot(json!([
            { "bookmaker": "TAB", "price": 5.0 },
            { "bookmaker": "TAB", "price": 5.4 },
            { "bookmaker": "LongshotBook", "price": 6.0 }
        ]));
        let (alerts, report) = engine.process_snapshot(&raw, now());
        assert!(alerts.is_empty());
        assert_eq!(report.insufficient_consensus, 1);

        // Second book arrives; the earlier poll left no phantom TAB movement
        let raw = snapshot(json!([
            { "bookmaker": "TAB", "price": 5.0 },
            { "bookmaker": "TAB", "price": 5.4 },
            { "bookmaker": "Sportsbet", "price": 5.2 },
            { "bookmaker": "LongshotBook", "price": 6.0 }
        ]));
        let (alerts, _) = engine.process_snapshot(&raw, now());
        assert_eq!(alerts.len(), 1);
        assert!(!alerts[0].message.contains("Movement"));
        assert!(alerts[0].message.ends_with("Other books:\n- Sportsbet: 5.20\n- TAB: 5.00"));
    }

    #[test]
    fn test_races_outside_window_are_ignored() {
        let mut engine = engine(kelly());
        let raw = json!([
            {
                "id": "past", "name": "Past", "start_time": "2026-03-01T00:30:00Z",
                "horses": [{ "id": "h1", "name": "A", "odds": { "TAB": 5.0, "Sportsbet": 5.2, "L": 6.0 } }]
            },
            {
                "id": "far", "name": "Far", "start_time": "2026-03-03T00:00:00Z",
                "horses": [{ "id": "h1", "name": "A", "odds": { "TAB": 5.0, "Sportsbet": 5.2, "L": 6.0 } }]
            },
            { "id": "bad", "name": "Bad", "start_time": "soon" }
        ]);
        let (alerts, report) = engine.process_snapshot(&raw, now());
        assert!(alerts.is_empty());
        assert_eq!(report.races, 2);
        assert_eq!(report.races_in_window, 0);
        assert_eq!(report.malformed, 1);
    }

    #[test]
    fn test_released_key_can_alert_again() {
        let mut engine = engine(kelly());
        let raw = snapshot(json!({ "TAB": 5.0, "Sportsbet": 5.2, "LongshotBook": 6.0 }));
        let (alerts, _) = engine.process_snapshot(&raw, now());
        engine.posted().release(&alerts[0].key);
        let (alerts, _) = engine.process_snapshot(&raw, now());
        assert_eq!(alerts.len(), 1);
    }

    #[test]
    fn test_average_mode_from_config() {
        let config = <Config as clap::Parser>::try_parse_from([
            "racing-ev-bot",
            "--racing-api-key",
            "k",
            "--consensus-mode",
            "average",
        ])
        .unwrap();
        let mut engine = EvEngine::from_config(&config);
        // reference = (4.0 + 5.0)/2 = 4.5 → EV = 6.0/4.5 − 1 = 33%
        let raw = snapshot(json!({ "A": 4.0, "B": 6.0, "C": 5.0 }));
        let (alerts, _) = engine.process_snapshot(&raw, now());
        assert_eq!(alerts.len(), 1);
        assert_relative_eq!(alerts[0].ev, 6.0 / 4.5 - 1.0, epsilon = 1e-9);
    }
}
