use crate::errors::{EngineError, EngineResult};
use crate::models::grid::LogPriceGrid;
use statrs::distribution::{Continuous, Normal};

/// Variance floor for the starting density, avoids a zero-width Gaussian.
const MIN_START_VARIANCE: f64 = 1e-16;

/// Reduce final survival weights to a hit probability in `[0, 1]`.
///
/// survival = dx * sum over points outside (a, b) of g0(x) * R(x)
///
/// where g0 is the log-price density at `step_start`, sampled as a true
/// continuous density and not renormalised over the grid.
pub fn hit_probability(
    grid: &LogPriceGrid,
    survival: &[f64],
    ln_spot: f64,
    var_start: f64,
    barrier: (f64, f64),
) -> EngineResult<f64> {
    let sd_start = var_start.max(MIN_START_VARIANCE).sqrt();
    let density = Normal::new(ln_spot, sd_start)
        .map_err(|e| EngineError::Model(format!("start density normal({ln_spot}, {sd_start}): {e}")))?;

    let (a, b) = barrier;
    let mass: f64 = grid
        .xs
        .iter()
        .zip(survival)
        .filter(|&(&x, _)| x <= a || x >= b)
        .map(|(&x, &r)| density.pdf(x) * r)
        .sum();
    let survived = grid.dx * mass;

    let hit = 1.0 - survived;
    if !hit.is_finite() {
        return Err(EngineError::Model(format!("non-finite hit probability (survival={survived})")));
    }
    Ok(hit.clamp(0.0, 1.0))
}
