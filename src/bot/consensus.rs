//! Reference ("true") win probability from other bookmakers' prices.

use std::collections::HashSet;

use clap::ValueEnum;

use super::selector::BestPrice;
use crate::models::{normalize_book, BookmakerQuote};

/// Default max/min ratio tolerated between trusted prices.
pub const DEFAULT_SPREAD_LIMIT: f64 = 1.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConsensusMode {
    /// Mean implied probability across an allow-list of bookmakers
    Trusted,
    /// Inverse of the mean of every price except the best one
    Average,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsufficientReason {
    TooFewTrusted,
    SpreadTooWide,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Consensus {
    Estimate {
        true_probability: f64,
        /// Number of prices that went into the estimate
        contributors: usize,
        /// max/min of the contributing prices
        spread: f64,
    },
    Insufficient(InsufficientReason),
}

#[derive(Debug, Clone)]
pub struct ConsensusEstimator {
    mode: ConsensusMode,
    /// Lowercased bookmaker names
    trusted_books: HashSet<String>,
    spread_limit: f64,
}

impl ConsensusEstimator {
    pub fn new<I, S>(mode: ConsensusMode, trusted_books: I, spread_limit: f64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ConsensusEstimator {
            mode,
            trusted_books: trusted_books
                .into_iter()
                .map(|b| normalize_book(b.as_ref()))
                .filter(|b| !b.is_empty())
                .collect(),
            spread_limit,
        }
    }

    pub fn is_trusted(&self, bookmaker: &str) -> bool {
        self.trusted_books.contains(&normalize_book(bookmaker))
    }

    /// Estimate the win probability for one horse.
    ///
    /// `best` is only consulted in `Average` mode, where the best price is
    /// excluded from the reference.
    pub fn estimate(&self, quotes: &[BookmakerQuote], best: &BestPrice) -> Consensus {
        match self.mode {
            ConsensusMode::Trusted => self.trusted_estimate(quotes),
            ConsensusMode::Average => average_estimate(quotes, best),
        }
    }

    fn trusted_estimate(&self, quotes: &[BookmakerQuote]) -> Consensus {
        let trusted: Vec<&BookmakerQuote> = quotes
            .iter()
            .filter(|q| self.is_trusted(&q.bookmaker))
            .collect();

        if trusted.len() < 2 {
            return Consensus::Insufficient(InsufficientReason::TooFewTrusted);
        }

        let prices: Vec<f64> = trusted.iter().map(|q| q.price).collect();
        let spread = spread(&prices);
        if spread > self.spread_limit {
            return Consensus::Insufficient(InsufficientReason::SpreadTooWide);
        }

        // Average in probability space, not price space
        let true_probability = running_mean(trusted.iter().map(|q| q.implied_probability()));

        Consensus::Estimate {
            true_probability,
            contributors: trusted.len(),
            spread,
        }
    }
}

fn average_estimate(quotes: &[BookmakerQuote], best: &BestPrice) -> Consensus {
    let mut others: Vec<f64> = quotes
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != best.index)
        .map(|(_, q)| q.price)
        .collect();
    if others.is_empty() {
        // A lone quote is its own reference (EV = 0)
        others.push(best.price);
    }

    let reference_odds = others.iter().sum::<f64>() / others.len() as f64;
    Consensus::Estimate {
        true_probability: 1.0 / reference_odds,
        contributors: others.len(),
        spread: spread(&others),
    }
}

/// Incremental mean; identical inputs come back bit-for-bit unchanged.
fn running_mean(values: impl Iterator<Item = f64>) -> f64 {
    let mut mean = 0.0;
    for (i, v) in values.enumerate() {
        mean += (v - mean) / (i + 1) as f64;
    }
    mean
}

fn spread(prices: &[f64]) -> f64 {
    let max = prices.iter().copied().fold(f64::MIN, f64::max);
    let min = prices.iter().copied().fold(f64::MAX, f64::min);
    max / min
}
