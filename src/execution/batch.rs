use crate::config::OddsConfig;
use crate::errors::{EngineError, EngineResult};
use crate::execution::odds;
use crate::models::HitModel;
use crate::state::{GridCell, MarketState, OddsRecord, OddsRequest, OddsResult, WorkerState};
use portable_atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Result of one batch. `Failed` carries no partial results.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// All cells in nested (time, price) order. When `truncated`, only a
    /// prefix of that order was evaluated before the budget or a cancel.
    Done { results: Vec<OddsResult>, truncated: bool },
    Failed { reason: String },
}

impl BatchOutcome {
    #[inline]
    pub fn state(&self) -> WorkerState {
        match self {
            BatchOutcome::Done { .. } => WorkerState::Done,
            BatchOutcome::Failed { .. } => WorkerState::Failed,
        }
    }

    /// Wire response: one record per evaluated cell, `[]` on failure.
    pub fn into_wire(self) -> Vec<OddsRecord> {
        match self {
            BatchOutcome::Done { results, .. } => results.iter().map(OddsRecord::from).collect(),
            BatchOutcome::Failed { .. } => Vec::new(),
        }
    }
}

/// Stop conditions checked between cells.
pub struct BatchLimits<'a> {
    pub budget: Option<Duration>,
    pub cancel: &'a AtomicBool,
}

/// Validate a request into the shared market state and its cells.
/// Cells are ordered by time tick, then price tick.
pub fn resolve_request(request: &OddsRequest) -> EngineResult<(MarketState, Vec<GridCell>)> {
    let init_time = request
        .init_time
        .ok_or_else(|| EngineError::InvalidInput("initTime missing".into()))?;
    let volatility = request
        .volatility
        .ok_or_else(|| EngineError::InvalidInput("volatility missing".into()))?;
    let market = MarketState::new(request.init_price, init_time, volatility)?;

    let time_gap = to_millis(request.time_gap, "timeGap")?;

    let mut cells = Vec::with_capacity(request.cell_count());
    for &t in &request.time_ticks {
        let time_start = to_millis(t, "timeTicks")?;
        for &p in &request.price_ticks {
            cells.push(GridCell::new(time_start, time_gap, p, request.price_gap)?);
        }
    }
    Ok((market, cells))
}

fn to_millis(value: f64, field: &str) -> EngineResult<i64> {
    if !value.is_finite() || value.abs() > i64::MAX as f64 {
        return Err(EngineError::InvalidInput(format!("{field} is not a valid timestamp: {value}")));
    }
    Ok(value.round() as i64)
}

/// Evaluate every cell of the request. Any error aborts the whole batch.
/// Returns the results and whether evaluation stopped early.
pub fn evaluate_batch(
    request: &OddsRequest,
    model: &dyn HitModel,
    odds_cfg: &OddsConfig,
    limits: &BatchLimits<'_>,
) -> EngineResult<(Vec<OddsResult>, bool)> {
    let (market, cells) = resolve_request(request)?;
    let deadline = limits.budget.map(|b| Instant::now() + b);

    let mut results = Vec::with_capacity(cells.len());
    let total = cells.len();

    for (idx, cell) in cells.iter().enumerate() {
        if limits.cancel.load(Ordering::Relaxed) {
            return Ok((results, true));
        }

        let raw = model.hit_probability(&market, cell)?;
        if !raw.is_finite() {
            return Err(EngineError::Model(format!(
                "{} returned {raw} for cell t={} p={}",
                model.name(),
                cell.time_start_ms,
                cell.price_start
            )));
        }

        let hit = odds::hit_result(cell, raw);
        results.push(odds::odds_result(&hit, odds_cfg));

        let remaining = total - idx - 1;
        if remaining > 0 && deadline.is_some_and(|d| Instant::now() >= d) {
            tracing::warn!(evaluated = idx + 1, remaining, "batch budget exhausted, skipping remaining cells");
            return Ok((results, true));
        }
    }

    Ok((results, false))
}

/// Run a batch and contain every failure as `BatchOutcome::Failed`.
pub fn run_batch(
    batch_id: uuid::Uuid,
    request: &OddsRequest,
    model: &dyn HitModel,
    odds_cfg: &OddsConfig,
    limits: &BatchLimits<'_>,
) -> BatchOutcome {
    let started = Instant::now();

    match evaluate_batch(request, model, odds_cfg, limits) {
        Ok((results, truncated)) => {
            tracing::info!(
                batch_id = %batch_id,
                model = model.name(),
                cells = results.len(),
                requested = request.cell_count(),
                truncated,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "batch complete"
            );
            BatchOutcome::Done { results, truncated }
        }
        Err(e) => {
            tracing::error!(batch_id = %batch_id, error = %e, "batch failed");
            BatchOutcome::Failed { reason: e.to_string() }
        }
    }
}
