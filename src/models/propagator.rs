use crate::models::kernel::DiffusionKernel;

/// Survival weights on the log-price grid.
///
/// `values[i]` is the weight of "not yet absorbed" at grid point `i`. Starts
/// at 1 outside the barrier and 0 inside; the true starting density is only
/// applied at aggregation time.
#[derive(Debug, Clone)]
pub struct SurvivalDistribution {
    values: Vec<f64>,
    scratch: Vec<f64>,
    /// Inclusive absorbing index range, `None` when no grid point falls inside.
    barrier: Option<(usize, usize)>,
}

impl SurvivalDistribution {
    pub fn new(n: usize, barrier: Option<(usize, usize)>) -> Self {
        let mut values = vec![1.0; n];
        if let Some((lo, hi)) = barrier {
            values[lo..=hi].fill(0.0);
        }
        Self {
            values,
            scratch: vec![0.0; n],
            barrier,
        }
    }

    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// One diffusion step: banded convolution, scale by `dx`, absorb.
    pub fn step(&mut self, kernel: &DiffusionKernel, dx: f64) {
        let n = self.values.len();
        let band = kernel.band();

        for i in 0..n {
            let j_lo = i.saturating_sub(band);
            let j_hi = (i + band).min(n - 1);
            let mut acc = 0.0;
            for j in j_lo..=j_hi {
                let r = self.values[j];
                if r == 0.0 {
                    continue;
                }
                acc += r * kernel.weight(i, j);
            }
            self.scratch[i] = dx * acc;
        }

        if let Some((lo, hi)) = self.barrier {
            self.scratch[lo..=hi].fill(0.0);
        }

        std::mem::swap(&mut self.values, &mut self.scratch);
    }

    /// Advance `steps` diffusion steps. Zero steps leaves the weights untouched.
    pub fn propagate(&mut self, kernel: &DiffusionKernel, dx: f64, steps: u64) {
        for _ in 0..steps {
            self.step(kernel, dx);
        }
    }
}
