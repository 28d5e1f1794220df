pub mod grid;
pub mod kernel;
pub mod propagator;
pub mod aggregate;
pub mod barrier;
pub mod volatility;

use crate::errors::EngineResult;
use crate::state::{GridCell, MarketState};

/// All hit-probability models implement this trait.
/// hit_probability() must be a pure function: deterministic output from inputs only.
/// Send + Sync required so a model can be moved onto the blocking pool.
pub trait HitModel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Probability that the price path touches `cell` inside its time window.
    /// Returns a value in [0, 1]; the odds layer applies the tighter clamp.
    fn hit_probability(&self, market: &MarketState, cell: &GridCell) -> EngineResult<f64>;
}
