use std::collections::HashMap;
use std::fmt;

use crate::models::BookmakerQuote;

/// Default number of runner-up prices shown in an alert.
pub const DEFAULT_DISPLAY_LIMIT: usize = 4;

/// The best price on offer for a horse and the runner-up prices for display.
#[derive(Debug, Clone, PartialEq)]
pub struct BestPrice {
    /// Position of the winning quote in feed order
    pub index: usize,
    pub bookmaker: String,
    pub price: f64,
    /// Other quotes, highest price first, at most `display_limit` long
    pub supplementary: Vec<BookmakerQuote>,
}

/// Pick the highest price across every bookmaker.
///
/// On ties the earliest quote in feed order wins. Returns `None` for a horse
/// with no quotes.
pub fn select_best(quotes: &[BookmakerQuote], display_limit: usize) -> Option<BestPrice> {
    let mut best: Option<(usize, &BookmakerQuote)> = None;
    for (i, q) in quotes.iter().enumerate() {
        match best {
            Some((_, b)) if q.price <= b.price => {}
            _ => best = Some((i, q)),
        }
    }
    let (index, top) = best?;

    let mut supplementary: Vec<BookmakerQuote> = quotes
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .map(|(_, q)| q.clone())
        .collect();
    // Stable sort: equal prices keep feed order
    supplementary.sort_by(|a, b| b.price.total_cmp(&a.price));
    supplementary.truncate(display_limit);

    Some(BestPrice {
        index,
        bookmaker: top.bookmaker.clone(),
        price: top.price,
        supplementary,
    })
}

/// A bookmaker's price changed since the previous poll.
#[derive(Debug, Clone, PartialEq)]
pub struct Movement {
    pub bookmaker: String,
    pub previous: f64,
    pub current: f64,
}

impl Movement {
    pub fn shortened(&self) -> bool {
        self.current < self.previous
    }
}

impl fmt::Display for Movement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} moved: {:.2} → {:.2}",
            self.bookmaker, self.previous, self.current
        )
    }
}

type PriceKey = (String, String, String);

/// Last observed price per (race, horse, bookmaker) for the process lifetime.
#[derive(Debug, Default)]
pub struct MovementTracker {
    last_price: HashMap<PriceKey, f64>,
}

impl MovementTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current quotes and report every price that differs from
    /// the previous observation.
    ///
    /// Stored prices are always overwritten, so the next poll diffs against
    /// this one.
    pub fn observe(
        &mut self,
        race_id: &str,
        horse_id: &str,
        quotes: &[BookmakerQuote],
    ) -> Vec<Movement> {
        let mut moves = Vec::new();
        for q in quotes {
            let key = (
                race_id.to_string(),
                horse_id.to_string(),
                q.bookmaker.clone(),
            );
            if let Some(prev) = self.last_price.insert(key, q.price) {
                if prev != q.price {
                    moves.push(Movement {
                        bookmaker: q.bookmaker.clone(),
                        previous: prev,
                        current: q.price,
                    });
                }
            }
        }
        moves
    }

    #[cfg(test)]
    fn tracked_prices(&self) -> usize {
        self.last_price.len()
    }
}
