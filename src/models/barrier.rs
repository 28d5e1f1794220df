use crate::config::EstimatorConfig;
use crate::errors::EngineResult;
use crate::models::aggregate;
use crate::models::grid::LogPriceGrid;
use crate::models::kernel::DiffusionKernel;
use crate::models::propagator::SurvivalDistribution;
use crate::models::HitModel;
use crate::state::{GridCell, MarketState};

/// Absorbing-barrier estimator for "touch this cell" bets.
///
/// Log-price follows driftless Gaussian steps with per-step sigma. Survival
/// weights are diffused from `step_start` to `step_end` with the cell's
/// log-price band absorbing, then integrated against the log-price density at
/// `step_start`:
///
/// P(hit) = 1 - dx * sum g0(x_i) * R_m(x_i)
///
/// Cost is O(N * band * m) per cell.
pub struct AbsorbingBarrierModel {
    config: EstimatorConfig,
}

impl AbsorbingBarrierModel {
    pub fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }
}

impl HitModel for AbsorbingBarrierModel {
    #[inline]
    fn name(&self) -> &'static str {
        "Absorbing-Barrier"
    }

    fn hit_probability(&self, market: &MarketState, cell: &GridCell) -> EngineResult<f64> {
        let (step_start, step_end) = cell.step_window(market.current_time_ms, self.config.step_ms);

        let steps = if step_end < step_start {
            tracing::warn!(
                time_start = cell.time_start_ms,
                step_start,
                step_end,
                "cell closes before its first step, propagating zero steps"
            );
            0
        } else {
            (step_end - step_start) as u64
        };

        let sigma = market.volatility;
        if sigma == 0.0 {
            return Ok(deterministic_hit(market.spot_price, cell, step_start, step_end));
        }

        let ln_spot = market.ln_spot();
        let grid = LogPriceGrid::build(ln_spot, sigma, step_end.max(step_start), cell.log_bounds(), &self.config)?;
        let Some(barrier) = grid.barrier else {
            tracing::debug!(
                price_start = cell.price_start,
                price_gap = cell.price_gap,
                step_end,
                "cell outside reachable window"
            );
            return Ok(0.0);
        };

        let kernel = DiffusionKernel::build(grid.len(), grid.dx, sigma, self.config.kernel_cutoff_sds)?;

        let mut survival = SurvivalDistribution::new(grid.len(), grid.barrier_indices(barrier.0, barrier.1));
        survival.propagate(&kernel, grid.dx, steps);

        let var_start = sigma * sigma * step_start as f64;
        aggregate::hit_probability(&grid, survival.values(), ln_spot, var_start, barrier)
    }
}

/// Zero-volatility path: the price never leaves spot, so the cell is hit
/// exactly when it contains spot and its step window is non-empty.
#[inline]
pub fn deterministic_hit(spot: f64, cell: &GridCell, step_start: i64, step_end: i64) -> f64 {
    if step_end >= step_start && cell.contains_price(spot) {
        1.0
    } else {
        0.0
    }
}
