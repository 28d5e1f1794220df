/// Minimum samples before the estimate is considered reliable
const MIN_SAMPLES: u64 = 20;

/// Per-step sigma is clamped to this range once seeded
const MIN_SIGMA: f64 = 1e-8;
const MAX_SIGMA: f64 = 1.0;

/// Per-step volatility estimator fed by a raw price stream.
///
/// Prices arrive at whatever cadence the feed delivers. Log returns are
/// taken between samples at least one step apart, rescaled to one step
/// (a return over `k` steps is divided by sqrt(k)), and folded into an EWMA.
pub struct VolatilityEngine {
    lambda: f64,
    step_ms: i64,
    prev_price: f64,
    prev_ts_ms: i64,
    ewma_var: f64,
    sample_count: u64,
}

impl VolatilityEngine {
    pub fn new(lambda: f64, step_ms: i64) -> Self {
        Self {
            lambda,
            step_ms: step_ms.max(1),
            prev_price: 0.0,
            prev_ts_ms: i64::MIN,
            ewma_var: 0.0,
            sample_count: 0,
        }
    }

    /// Process a new price observation. Updates the estimate in-place.
    pub fn update(&mut self, price: f64, timestamp_ms: i64) {
        if price <= 0.0 || !price.is_finite() {
            return;
        }

        if self.prev_price <= 0.0 {
            self.prev_price = price;
            self.prev_ts_ms = timestamp_ms;
            return;
        }

        if timestamp_ms <= self.prev_ts_ms {
            return;
        }

        let steps = (timestamp_ms - self.prev_ts_ms) / self.step_ms;
        if steps < 1 {
            // Same step; wait for the next boundary
            return;
        }

        let log_return = (price / self.prev_price).ln();
        self.prev_price = price;
        self.prev_ts_ms = timestamp_ms;

        if !log_return.is_finite() {
            return;
        }

        let r_sq = log_return * log_return / steps as f64;

        self.ewma_var = if self.sample_count == 0 {
            r_sq
        } else {
            self.lambda * self.ewma_var + (1.0 - self.lambda) * r_sq
        };
        self.sample_count += 1;
    }

    /// Current per-step sigma, clamped to a sane range.
    #[inline]
    pub fn per_step_sigma(&self) -> f64 {
        self.ewma_var.sqrt().clamp(MIN_SIGMA, MAX_SIGMA)
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.sample_count >= MIN_SAMPLES
    }

    #[inline]
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignores_bad_prices() {
        let mut v = VolatilityEngine::new(0.94, 500);
        v.update(-1.0, 0);
        v.update(f64::NAN, 500);
        v.update(100.0, 1_000);
        v.update(0.0, 1_500);
        assert_eq!(v.sample_count(), 0);
    }

    #[test]
    fn test_same_step_samples_skipped() {
        let mut v = VolatilityEngine::new(0.94, 500);
        v.update(100.0, 0);
        v.update(101.0, 200);
        v.update(101.0, 100);
        assert_eq!(v.sample_count(), 0);
        v.update(101.0, 500);
        assert_eq!(v.sample_count(), 1);
    }

    #[test]
    fn test_alternating_returns_recover_sigma() {
        let mut v = VolatilityEngine::new(0.94, 500);
        let up = 0.001_f64.exp();
        let mut price = 100.0;
        for i in 0..60 {
            v.update(price, i * 500);
            price = if i % 2 == 0 { price * up } else { price / up };
        }
        assert!(v.is_ready());
        let sigma = v.per_step_sigma();
        assert!((sigma - 0.001).abs() < 1e-5, "sigma={sigma}");
    }

    #[test]
    fn test_multi_step_gap_rescaled() {
        let mut v = VolatilityEngine::new(0.94, 500);
        v.update(100.0, 0);
        // 0.2% over four steps is 0.1% per step
        v.update(100.0 * 0.002_f64.exp(), 2_000);
        assert!((v.per_step_sigma() - 0.001).abs() < 1e-9, "sigma={}", v.per_step_sigma());
    }

    #[test]
    fn test_not_ready_before_min_samples() {
        let mut v = VolatilityEngine::new(0.94, 500);
        for i in 0..10 {
            v.update(100.0 + i as f64 * 0.01, i * 500);
        }
        assert!(!v.is_ready());
    }
}
