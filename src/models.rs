use chrono::{DateTime, Utc};

/// A race as reported by the odds feed for one poll
#[derive(Debug, Clone, PartialEq)]
pub struct Race {
    /// Feed race ID, stable across polls
    pub id: String,
    pub name: String,
    /// Scheduled jump time, normalised to UTC
    pub start_time: DateTime<Utc>,
    pub horses: Vec<HorseEntry>,
}

/// A runner and every price the feed currently shows for it
#[derive(Debug, Clone, PartialEq)]
pub struct HorseEntry {
    pub id: String,
    pub name: String,
    /// Quotes in feed-arrival order
    pub quotes: Vec<BookmakerQuote>,
}

/// One bookmaker's win price for a horse
#[derive(Debug, Clone, PartialEq)]
pub struct BookmakerQuote {
    pub bookmaker: String,
    /// Decimal odds, always > 1.0
    pub price: f64,
}

impl BookmakerQuote {
    pub fn new(bookmaker: impl Into<String>, price: f64) -> Self {
        BookmakerQuote {
            bookmaker: bookmaker.into(),
            price,
        }
    }

    /// Break-even win probability represented by this price
    pub fn implied_probability(&self) -> f64 {
        1.0 / self.price
    }
}

/// Canonical form of a bookmaker name; two quotes with the same key come
/// from the same book.
pub fn normalize_book(name: &str) -> String {
    name.trim().to_lowercase()
}

impl Race {
    /// Whether the race jumps inside `[now, now + lookahead]`. A horizon past
    /// the end of the calendar has no upper bound.
    pub fn within_window(&self, now: DateTime<Utc>, lookahead: chrono::Duration) -> bool {
        now <= self.start_time
            && now
                .checked_add_signed(lookahead)
                .map_or(true, |end| self.start_time <= end)
    }
}
