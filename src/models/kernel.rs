use crate::errors::{EngineError, EngineResult};
use statrs::distribution::{Continuous, Normal};

/// One-step Gaussian transition density sampled at every grid lag.
///
/// `weights[l]` holds the density at lag `(l - (n - 1)) * dx`, so the weight
/// from source `j` to destination `i` is `weights[i - j + n - 1]`. Lags past
/// `band` grid steps are left at zero and never visited.
#[derive(Debug, Clone)]
pub struct DiffusionKernel {
    weights: Vec<f64>,
    n: usize,
    band: usize,
}

impl DiffusionKernel {
    pub fn build(n: usize, dx: f64, sigma: f64, cutoff_sds: f64) -> EngineResult<Self> {
        if n < 2 || dx.is_nan() || dx <= 0.0 {
            return Err(EngineError::Model(format!("kernel needs n >= 2 and dx > 0, got n={n} dx={dx}")));
        }
        let normal = Normal::new(0.0, sigma)
            .map_err(|e| EngineError::Model(format!("kernel normal(0, {sigma}): {e}")))?;

        let reach = (cutoff_sds * sigma / dx).ceil();
        let band = if reach.is_finite() && reach < (n - 1) as f64 {
            reach as usize
        } else {
            n - 1
        };

        let centre = n - 1;
        let mut weights = vec![0.0; 2 * n - 1];
        for l in (centre - band)..=(centre + band) {
            let lag = (l as f64 - centre as f64) * dx;
            weights[l] = normal.pdf(lag);
        }

        Ok(Self { weights, n, band })
    }

    #[inline]
    pub fn band(&self) -> usize {
        self.band
    }

    /// Transition weight from source index `j` to destination index `i`.
    #[inline(always)]
    pub fn weight(&self, i: usize, j: usize) -> f64 {
        self.weights[i + self.n - 1 - j]
    }
}
