//! Expected value and stake sizing for a win bet at decimal odds.
//!
//! EV per unit staked:
//!   EV = price · p − 1
//! where
//!   price = best decimal odds on offer (stake included)
//!   p     = consensus estimate of the win probability
//!
//! Stakes are expressed in units. Two policies are available and exactly one
//! is active: a fractional-Kelly derived stake with a 0.5u floor, or fixed
//! unit sizes chosen by EV bucket.
use std::str::FromStr;

use clap::ValueEnum;

/// Calculate the expected value per unit staked.
pub fn expected_value(best_price: f64, true_probability: f64) -> f64 {
    best_price * true_probability - 1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StakingPolicyKind {
    FractionalKelly,
    Tiered,
}

/// Tier buckets used when none are configured, highest first.
pub const DEFAULT_STAKE_TIERS: &str = "0.12:3.0,0.08:2.0,0.05:1.0";

/// One EV bucket: bets with `ev >= min_ev` get `units`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StakeTier {
    pub min_ev: f64,
    pub units: f64,
}

impl FromStr for StakeTier {
    type Err = String;

    /// Parses `"<min_ev>:<units>"`, e.g. `"0.12:3.0"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ev, units) = s
            .split_once(':')
            .ok_or_else(|| format!("stake tier '{}' must look like <min_ev>:<units>", s))?;
        let min_ev = ev
            .trim()
            .parse()
            .map_err(|e| format!("bad min_ev in tier '{}': {}", s, e))?;
        let units = units
            .trim()
            .parse()
            .map_err(|e| format!("bad units in tier '{}': {}", s, e))?;
        Ok(StakeTier { min_ev, units })
    }
}

/// The configured staking policy.
#[derive(Debug, Clone, PartialEq)]
pub enum StakingPolicy {
    FractionalKelly {
        kelly_fraction: f64,
    },
    Tiered {
        /// Sorted by `min_ev`, highest first
        tiers: Vec<StakeTier>,
        /// Stake for bets that clear `min_ev` but no tier
        floor_units: f64,
        min_ev: f64,
    },
}

impl StakingPolicy {
    pub fn tiered(mut tiers: Vec<StakeTier>, floor_units: f64, min_ev: f64) -> Self {
        tiers.sort_by(|a, b| b.min_ev.total_cmp(&a.min_ev));
        StakingPolicy::Tiered {
            tiers,
            floor_units,
            min_ev,
        }
    }

    /// Stake in units for a bet with the given EV at `best_price`.
    ///
    /// A result `<= 0.0` means the bet is not actionable.
    pub fn stake(&self, ev: f64, best_price: f64) -> f64 {
        match self {
            StakingPolicy::FractionalKelly { kelly_fraction } => {
                kelly_units(ev, best_price, *kelly_fraction)
            }
            StakingPolicy::Tiered {
                tiers,
                floor_units,
                min_ev,
            } => tiered_units(ev, tiers, *floor_units, *min_ev),
        }
    }
}

/// Fractional-Kelly style stake in units, floored at 0.5u and rounded to 2 dp.
///
/// Note the loss term is `1 − EV`, not `1 − p`.
pub fn kelly_units(ev: f64, best_price: f64, kelly_fraction: f64) -> f64 {
    let b = best_price - 1.0;
    let q = 1.0 - ev;
    let kelly = if b > 0.0 { (ev * b - q) / b } else { 0.0 };
    let stake = (kelly * kelly_fraction).max(0.5);
    (stake * 100.0).round() / 100.0
}

/// Unit size of the first tier the EV clears.
pub fn tiered_units(ev: f64, tiers: &[StakeTier], floor_units: f64, min_ev: f64) -> f64 {
    tiers
        .iter()
        .find(|t| ev >= t.min_ev)
        .map(|t| t.units)
        .unwrap_or(if ev >= min_ev { floor_units } else { 0.0 })
}

#[cfg(test)]
pub fn default_tiers() -> Vec<StakeTier> {
    DEFAULT_STAKE_TIERS
        .split(',')
        .map(|t| t.parse().expect("default tier parses"))
        .collect()
}
