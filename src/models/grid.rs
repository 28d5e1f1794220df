use crate::config::EstimatorConfig;
use crate::errors::{EngineError, EngineResult};

/// Minimum margin kept around the barrier, in log-price units.
const MIN_BARRIER_MARGIN: f64 = 1e-6;

/// Barrier margin in per-step sigmas.
const BARRIER_MARGIN_SIGMAS: f64 = 5.0;

/// Target grid spacing as a fraction of one-step sigma.
const DX_PER_SIGMA: f64 = 0.1;

/// Coarsest spacing allowed, in one-step sigmas. Beyond this the sampled
/// kernel stops integrating to one and survival weight drifts every step.
pub const MAX_DX_PER_SIGMA: f64 = 0.5;

/// Hard ceiling on grid points. A horizon that needs more fails the cell.
pub const MAX_GRID_POINTS: usize = 4096;

/// Uniform log-price sampling grid.
///
/// Spans `std_multiplier` total standard deviations either side of the
/// starting log-price plus a barrier margin. The barrier is clipped to that
/// window, so a distant cell never stretches the grid: the part of it beyond
/// the window is unreachable at this resolution.
#[derive(Debug, Clone)]
pub struct LogPriceGrid {
    pub xs: Vec<f64>,
    pub dx: f64,
    pub low: f64,
    pub high: f64,
    /// Barrier clipped to `[low, high]`, `None` when it lies wholly outside.
    pub barrier: Option<(f64, f64)>,
}

impl LogPriceGrid {
    /// Build the grid for one cell evaluation. `sigma` must be positive.
    ///
    /// Point count comes from the sizing policy, raised when needed so that
    /// `dx <= MAX_DX_PER_SIGMA * sigma`. Since the start density has at least
    /// one step of variance, this also resolves it.
    pub fn build(
        ln_spot: f64,
        sigma: f64,
        step_end: i64,
        barrier: (f64, f64),
        config: &EstimatorConfig,
    ) -> EngineResult<Self> {
        if sigma.is_nan() || sigma <= 0.0 {
            return Err(EngineError::Model(format!("grid needs positive sigma, got {sigma}")));
        }
        let (a, b) = barrier;

        let total_std = (sigma * sigma * step_end.max(1) as f64).sqrt();
        let margin = (BARRIER_MARGIN_SIGMAS * sigma).max(MIN_BARRIER_MARGIN);
        let half_width = config.std_multiplier * total_std + margin;

        let low = ln_spot - half_width;
        let high = ln_spot + half_width;

        let span = high - low;
        if !span.is_finite() || span <= 0.0 {
            return Err(EngineError::Model(format!("degenerate grid span [{low}, {high}]")));
        }

        let n = config.grid_sizing.clamp(point_count(span, sigma * DX_PER_SIGMA));
        let n = n.max(point_count(span, sigma * MAX_DX_PER_SIGMA));
        if n > MAX_GRID_POINTS {
            return Err(EngineError::Model(format!(
                "{n} grid points needed to resolve sigma={sigma} over {step_end} steps (max {MAX_GRID_POINTS})"
            )));
        }

        let dx = span / (n - 1) as f64;
        let xs = (0..n).map(|i| low + i as f64 * dx).collect();

        let barrier = (a <= high && b >= low).then(|| (a.max(low), b.min(high)));

        Ok(Self { xs, dx, low, high, barrier })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.xs.len()
    }

    /// Inclusive index range of grid points inside `[a, b]`, if any.
    pub fn barrier_indices(&self, a: f64, b: f64) -> Option<(usize, usize)> {
        let first = self.xs.iter().position(|&x| x >= a)?;
        let last = self.xs.iter().rposition(|&x| x <= b)?;
        (first <= last).then_some((first, last))
    }
}

/// Points needed to cover `span` at spacing `dx`, saturating on overflow.
fn point_count(span: f64, dx: f64) -> usize {
    let intervals = (span / dx).ceil();
    if intervals.is_finite() && intervals < (usize::MAX - 1) as f64 {
        intervals as usize + 1
    } else {
        usize::MAX
    }
}
