//! Payout odds for a touch bet.
//!
//! odds = max((1 / p) * (1 - edge), floor)
//!
//! where p is the hit probability clamped to [0.001, 0.999]. The lower clamp
//! keeps 1/p bounded, the upper one stops near-certain cells from paying
//! almost nothing.
//!
//! Pure functions, no side effects, no allocations.

use crate::config::OddsConfig;
use crate::state::{GridCell, HitResult, OddsResult};

pub const MIN_HIT_PROBABILITY: f64 = 0.001;
pub const MAX_HIT_PROBABILITY: f64 = 0.999;

#[inline]
pub fn clamp_probability(p: f64) -> f64 {
    p.clamp(MIN_HIT_PROBABILITY, MAX_HIT_PROBABILITY)
}

/// Convert a clamped hit probability to a payout multiplier.
#[inline]
pub fn compute_odds(hit_probability: f64, config: &OddsConfig) -> f64 {
    let p = clamp_probability(hit_probability);
    ((1.0 / p) * (1.0 - config.house_edge)).max(config.min_payout)
}

/// Apply the boundary clamp once, between aggregation and odds conversion.
#[inline]
pub fn hit_result(cell: &GridCell, raw_probability: f64) -> HitResult {
    HitResult {
        time_start: cell.time_start_ms,
        price_start: cell.price_start,
        hit_probability: clamp_probability(raw_probability),
    }
}

#[inline]
pub fn odds_result(hit: &HitResult, config: &OddsConfig) -> OddsResult {
    OddsResult {
        time_start: hit.time_start,
        price_start: hit.price_start,
        hit_probability: hit.hit_probability,
        odds: compute_odds(hit.hit_probability, config),
    }
}
