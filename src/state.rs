use portable_atomic::AtomicU64;
use crate::errors::{EngineError, EngineResult};

// ── Market + Cell Values ──

/// Spot, clock and per-step log-return volatility shared by a batch.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct MarketState {
    pub spot_price: f64,
    pub current_time_ms: i64,
    pub volatility: f64,
}

impl MarketState {
    pub fn new(spot_price: f64, current_time_ms: i64, volatility: f64) -> EngineResult<Self> {
        if !spot_price.is_finite() || spot_price <= 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "spot price must be positive and finite, got {spot_price}"
            )));
        }
        if !volatility.is_finite() || volatility < 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "volatility must be non-negative and finite, got {volatility}"
            )));
        }
        Ok(Self {
            spot_price,
            current_time_ms,
            volatility,
        })
    }

    #[inline]
    pub fn ln_spot(&self) -> f64 {
        self.spot_price.ln()
    }
}

/// One (time, price) rectangle whose first-touch probability is priced.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct GridCell {
    pub time_start_ms: i64,
    pub time_gap_ms: i64,
    pub price_start: f64,
    pub price_gap: f64,
}

impl GridCell {
    pub fn new(time_start_ms: i64, time_gap_ms: i64, price_start: f64, price_gap: f64) -> EngineResult<Self> {
        if time_gap_ms <= 0 {
            return Err(EngineError::InvalidInput(format!("time gap must be positive, got {time_gap_ms}")));
        }
        if !price_start.is_finite() || price_start <= 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "cell price start must be positive and finite, got {price_start}"
            )));
        }
        if !price_gap.is_finite() || price_gap <= 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "price gap must be positive and finite, got {price_gap}"
            )));
        }
        Ok(Self {
            time_start_ms,
            time_gap_ms,
            price_start,
            price_gap,
        })
    }

    #[inline]
    pub fn price_end(&self) -> f64 {
        self.price_start + self.price_gap
    }

    /// Barrier bounds `[a, b]` in log-price.
    #[inline]
    pub fn log_bounds(&self) -> (f64, f64) {
        (self.price_start.ln(), self.price_end().ln())
    }

    #[inline]
    pub fn contains_price(&self, price: f64) -> bool {
        price >= self.price_start && price <= self.price_end()
    }

    /// Simulation step window `(step_start, step_end)` relative to `now_ms`.
    /// `step_start` is floored at 1. `step_end` may be smaller than `step_start`
    /// for cells that close within the first step.
    pub fn step_window(&self, now_ms: i64, step_ms: i64) -> (i64, i64) {
        // Saturating: ticks anywhere in i64 must not overflow
        let close_ms = self.time_start_ms.saturating_add(self.time_gap_ms);
        let start = self.time_start_ms.saturating_sub(now_ms).div_euclid(step_ms).max(1);
        let end = close_ms.saturating_sub(now_ms).div_euclid(step_ms);
        (start, end)
    }
}

// ── Results ──

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct HitResult {
    pub time_start: i64,
    pub price_start: f64,
    /// Always within `[0.001, 0.999]`.
    pub hit_probability: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct OddsResult {
    pub time_start: i64,
    pub price_start: f64,
    pub hit_probability: f64,
    pub odds: f64,
}

// ── Wire Messages ──

/// One batch request, as posted by the front-end.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OddsRequest {
    pub time_ticks: Vec<f64>,
    pub time_gap: f64,
    pub price_ticks: Vec<f64>,
    pub price_gap: f64,
    pub init_price: f64,
    /// Current timestamp in ms. The host fills in the wall clock when absent.
    #[serde(default)]
    pub init_time: Option<i64>,
    /// Per-step volatility. The host falls back to its own estimate when absent.
    #[serde(default)]
    pub volatility: Option<f64>,
}

impl OddsRequest {
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.time_ticks.len() * self.price_ticks.len()
    }
}

/// Wire record. The `hit` key carries the payout multiplier, not a probability.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OddsRecord {
    pub price: f64,
    pub time: f64,
    #[serde(rename = "hit")]
    pub odds: f64,
}

impl From<&OddsResult> for OddsRecord {
    fn from(r: &OddsResult) -> Self {
        Self {
            price: r.price_start,
            time: r.time_start as f64,
            odds: r.odds,
        }
    }
}

/// Messages accepted by the stdin host, tagged by `type`.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HostMessage {
    #[serde(rename_all = "camelCase")]
    Price { price: f64, timestamp_ms: i64 },
    Odds(OddsRequest),
    /// Stop the batch currently computing. Produces no response line.
    Cancel,
}

// ── Worker State Machine ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Computing,
    Done,
    Failed,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Computing => write!(f, "computing"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ── Performance Counters (lock-free) ──

pub struct WorkerCounters {
    pub batches_completed: AtomicU64,
    pub batches_failed: AtomicU64,
    pub batches_truncated: AtomicU64,
    pub cells_evaluated: AtomicU64,
}

impl WorkerCounters {
    pub fn new() -> Self {
        Self {
            batches_completed: AtomicU64::new(0),
            batches_failed: AtomicU64::new(0),
            batches_truncated: AtomicU64::new(0),
            cells_evaluated: AtomicU64::new(0),
        }
    }
}

impl Default for WorkerCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_counters_start_at_zero() {
        let counters = WorkerCounters::default();
        assert_eq!(counters.batches_completed.load(Ordering::Relaxed), 0);
        assert_eq!(counters.batches_failed.load(Ordering::Relaxed), 0);
        assert_eq!(counters.batches_truncated.load(Ordering::Relaxed), 0);
        assert_eq!(counters.cells_evaluated.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_market_rejects_bad_inputs() {
        assert!(MarketState::new(0.0, 0, 0.01).is_err());
        assert!(MarketState::new(-5.0, 0, 0.01).is_err());
        assert!(MarketState::new(100.0, 0, -0.01).is_err());
        assert!(MarketState::new(100.0, 0, f64::NAN).is_err());
        assert!(MarketState::new(100.0, 0, 0.0).is_ok());
    }

    #[test]
    fn test_cell_rejects_bad_inputs() {
        assert!(GridCell::new(0, 0, 100.0, 1.0).is_err());
        assert!(GridCell::new(0, 500, 0.0, 1.0).is_err());
        assert!(GridCell::new(0, 500, 100.0, 0.0).is_err());
        assert!(GridCell::new(0, 500, 100.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_step_window() {
        let cell = GridCell::new(10_000, 5_000, 100.0, 1.0).unwrap();
        assert_eq!(cell.step_window(5_000, 500), (10, 20));
        // Starts now: floored at step 1
        assert_eq!(cell.step_window(10_000, 500), (1, 10));
        // Entirely in the past
        assert_eq!(cell.step_window(20_000, 500), (1, -10));
    }

    #[test]
    fn test_step_window_extreme_ticks_saturate() {
        let cell = GridCell::new(i64::MAX - 10, 1_000, 100.0, 1.0).unwrap();
        let (start, end) = cell.step_window(-1_000, 500);
        assert_eq!(start, i64::MAX / 500);
        assert_eq!(end, i64::MAX / 500);

        let cell = GridCell::new(i64::MIN + 10, 1_000, 100.0, 1.0).unwrap();
        let (start, end) = cell.step_window(1_000, 500);
        assert_eq!(start, 1);
        assert!(end < 0);
    }

    #[test]
    fn test_wire_record_uses_hit_key() {
        let r = OddsResult { time_start: 1_000, price_start: 100.5, hit_probability: 0.5, odds: 1.94 };
        let json = serde_json::to_value(OddsRecord::from(&r)).unwrap();
        assert_eq!(json["hit"], serde_json::json!(1.94));
        assert_eq!(json["time"], serde_json::json!(1000.0));
        assert!(json.get("odds").is_none());
    }

    #[test]
    fn test_host_message_parsing() {
        let price: HostMessage =
            serde_json::from_str(r#"{"type":"price","price":101.5,"timestampMs":42}"#).unwrap();
        assert!(matches!(price, HostMessage::Price { price, timestamp_ms: 42 } if price == 101.5));

        let odds: HostMessage = serde_json::from_str(
            r#"{"type":"odds","timeTicks":[1000],"timeGap":500,"priceTicks":[100],"priceGap":0.5,"initPrice":100,"volatility":0.001}"#,
        )
        .unwrap();
        match odds {
            HostMessage::Odds(req) => {
                assert_eq!(req.cell_count(), 1);
                assert_eq!(req.init_time, None);
                assert_eq!(req.volatility, Some(0.001));
            }
            other => panic!("expected odds message, got {other:?}"),
        }

        let cancel: HostMessage = serde_json::from_str(r#"{"type":"cancel"}"#).unwrap();
        assert!(matches!(cancel, HostMessage::Cancel));
    }
}
