use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use super::engine::EvSignal;
use crate::models::{HorseEntry, Race};

/// Dedup key: one alert per horse per race, whichever bookmaker is best.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BetKey {
    pub race_id: String,
    pub horse_id: String,
}

impl BetKey {
    pub fn new(race_id: &str, horse_id: &str) -> Self {
        BetKey {
            race_id: race_id.to_string(),
            horse_id: horse_id.to_string(),
        }
    }
}

/// Every (race, horse) already alerted in this process.
///
/// Cloning shares the same set, so several senders can race on `try_claim`
/// and still post once.
#[derive(Debug, Clone, Default)]
pub struct PostedBets {
    inner: Arc<Mutex<HashSet<BetKey>>>,
}

impl PostedBets {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<BetKey>> {
        // Single insert/remove per critical section: a poisoned set is intact
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_posted(&self, key: &BetKey) -> bool {
        self.lock().contains(key)
    }

    /// Atomically mark `key` as posted. Returns `false` if it already was.
    pub fn try_claim(&self, key: &BetKey) -> bool {
        self.lock().insert(key.clone())
    }

    /// Undo a claim whose alert was never delivered.
    pub fn release(&self, key: &BetKey) {
        self.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Render the chat message for a qualifying horse.
pub fn format_alert(
    race: &Race,
    horse: &HorseEntry,
    signal: &EvSignal,
    now: DateTime<Utc>,
    display_tz: Tz,
) -> String {
    let local_start = race.start_time.with_timezone(&display_tz);
    let mut msg = String::new();

    // Writing to a String cannot fail
    let _ = writeln!(
        msg,
        "🏇 **{}** ({})",
        race.name,
        local_start.format("%d/%m %H:%M")
    );
    let _ = writeln!(msg, "🐎 {}", horse.name);
    let _ = writeln!(msg, "📍 Best Book: {}", signal.best_book);
    let _ = writeln!(msg, "💰 Odds: {:.2}", signal.best_price);
    let _ = writeln!(msg, "📊 EV: {:.2}%", signal.ev * 100.0);
    let _ = writeln!(msg, "📈 Stake: {:.2} Units", signal.stake);
    let _ = writeln!(msg, "⏱️ {}", time_to_start(race.start_time, now));

    if !signal.movements.is_empty() {
        msg.push_str("\nMovement:\n");
        for m in &signal.movements {
            let arrow = if m.shortened() { "🔻" } else { "🔺" };
            let _ = writeln!(msg, "{} {}", arrow, m);
        }
    }

    if !signal.supplementary.is_empty() {
        msg.push_str("\nOther books:\n");
        for q in &signal.supplementary {
            let _ = writeln!(msg, "- {}: {:.2}", q.bookmaker, q.price);
        }
    }

    msg.trim_end().to_string()
}

fn time_to_start(start: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let mins = (start - now).num_minutes();
    if mins < 0 {
        return "Jumped".to_string();
    }
    let (h, m) = (mins / 60, mins % 60);
    if h > 0 {
        format!("Jumps in {}h {:02}m", h, m)
    } else {
        format!("Jumps in {}m", m)
    }
}
