use crate::errors::{EngineError, EngineResult};
use std::str::FromStr;
use std::time::Duration;

/// How many log-price points the discretizer starts from. The grid adds
/// points beyond this when a long horizon needs them to keep `dx` within
/// half a sigma.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GridSizing {
    /// 71-point grid, matching odds already served to existing clients.
    Legacy,
    /// Resolution-driven count clamped to `[min, max]`.
    Bounded { min: usize, max: usize },
}

impl GridSizing {
    pub const LEGACY_POINTS: usize = 71;

    /// Clamp the resolution-driven point count.
    #[inline]
    pub fn clamp(&self, computed: usize) -> usize {
        match *self {
            GridSizing::Legacy => Self::LEGACY_POINTS,
            GridSizing::Bounded { min, max } => computed.max(min).min(max).max(2),
        }
    }
}

/// Numerical settings for the barrier-hit estimator.
#[derive(Debug, Clone, Copy)]
pub struct EstimatorConfig {
    /// Simulation step in milliseconds. Volatility is quoted per step.
    pub step_ms: i64,
    pub grid_sizing: GridSizing,
    /// Grid half-width around the starting log-price, in total standard deviations.
    pub std_multiplier: f64,
    /// Kernel lags beyond this many sigmas are treated as zero.
    pub kernel_cutoff_sds: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            step_ms: 500,
            grid_sizing: GridSizing::Bounded { min: 200, max: 400 },
            std_multiplier: 8.0,
            kernel_cutoff_sds: 8.0,
        }
    }
}

/// Payout settings.
#[derive(Debug, Clone, Copy)]
pub struct OddsConfig {
    pub house_edge: f64,
    pub min_payout: f64,
}

impl Default for OddsConfig {
    fn default() -> Self {
        Self {
            house_edge: 0.03,
            min_payout: 1.02,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub estimator: EstimatorConfig,
    pub odds: OddsConfig,
    /// Wall-clock budget per batch. `None` disables the budget.
    pub batch_budget: Option<Duration>,
    pub worker_queue: usize,
    pub vol_ewma_lambda: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            estimator: EstimatorConfig::default(),
            odds: OddsConfig::default(),
            batch_budget: Some(Duration::from_millis(2000)),
            worker_queue: 64,
            vol_ewma_lambda: 0.94,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> EngineResult<Self> {
        dotenvy::dotenv().ok();

        let step_ms: i64 = env_parse("ODDS_STEP_MS", "500")?;
        if step_ms <= 0 {
            return Err(EngineError::Config(format!("ODDS_STEP_MS must be positive, got {step_ms}")));
        }

        let house_edge: f64 = env_parse("ODDS_HOUSE_EDGE", "0.03")?;
        if !(0.0..1.0).contains(&house_edge) {
            return Err(EngineError::Config(format!("ODDS_HOUSE_EDGE out of [0, 1): {house_edge}")));
        }

        let min_payout: f64 = env_parse("ODDS_MIN_PAYOUT", "1.02")?;

        let grid_sizing = match env_var_or("GRID_SIZING", "bounded").to_ascii_lowercase().as_str() {
            "legacy" => GridSizing::Legacy,
            "bounded" => {
                let min: usize = env_parse("GRID_MIN_POINTS", "200")?;
                let max: usize = env_parse("GRID_MAX_POINTS", "400")?;
                if min < 2 || max < min {
                    return Err(EngineError::Config(format!(
                        "GRID_MIN_POINTS/GRID_MAX_POINTS invalid: min={min} max={max}"
                    )));
                }
                GridSizing::Bounded { min, max }
            }
            other => return Err(EngineError::Config(format!("GRID_SIZING: unknown mode {other}"))),
        };

        let std_multiplier: f64 = env_parse("GRID_STD_MULTIPLIER", "8")?;
        let kernel_cutoff_sds: f64 = env_parse("KERNEL_CUTOFF_SDS", "8")?;
        if std_multiplier <= 0.0 || kernel_cutoff_sds <= 0.0 {
            return Err(EngineError::Config(
                "GRID_STD_MULTIPLIER and KERNEL_CUTOFF_SDS must be positive".into(),
            ));
        }

        let budget_ms: u64 = env_parse("BATCH_BUDGET_MS", "2000")?;
        let worker_queue: usize = env_parse("WORKER_QUEUE", "64")?;
        let vol_ewma_lambda: f64 = env_parse("VOL_EWMA_LAMBDA", "0.94")?;
        if !(0.0..1.0).contains(&vol_ewma_lambda) {
            return Err(EngineError::Config(format!("VOL_EWMA_LAMBDA out of [0, 1): {vol_ewma_lambda}")));
        }

        Ok(Self {
            estimator: EstimatorConfig {
                step_ms,
                grid_sizing,
                std_multiplier,
                kernel_cutoff_sds,
            },
            odds: OddsConfig { house_edge, min_payout },
            batch_budget: (budget_ms > 0).then(|| Duration::from_millis(budget_ms)),
            worker_queue: worker_queue.max(1),
            vol_ewma_lambda,
        })
    }
}

fn env_parse<T>(key: &str, default: &str) -> EngineResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_var_or(key, default)
        .trim()
        .parse::<T>()
        .map_err(|e| EngineError::Config(format!("{key}: {e}")))
}

fn env_var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
