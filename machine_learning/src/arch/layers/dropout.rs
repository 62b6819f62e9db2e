use ndarray::ArrayD;
use rand::Rng;
use rand_distr::{Bernoulli, Distribution};

use super::Mode;
use crate::{MlErr, Result};

/// Zeroes each unit with probability `1 - keep_prob` while training, scaling the kept ones by
/// `1 / keep_prob` so the expected activation does not change. Evaluation is the identity.
#[derive(Clone, Debug)]
pub struct Dropout {
    keep_prob: f32,
}

impl Dropout {
    /// Creates a new `Dropout`.
    ///
    /// # Arguments
    /// * `keep_prob` - The probability of a unit being kept, in `(0, 1]`.
    ///
    /// # Returns
    /// A new `Dropout` or an error if `keep_prob` is out of range.
    pub fn new(keep_prob: f32) -> Result<Self> {
        if !(keep_prob > 0. && keep_prob <= 1.) {
            return Err(MlErr::InvalidParam(format!(
                "keep probability must be in (0, 1], got {keep_prob}"
            )));
        }

        Ok(Self { keep_prob })
    }

    pub fn keep_prob(&self) -> f32 {
        self.keep_prob
    }

    pub fn forward<R: Rng>(
        &self,
        mut x: ArrayD<f32>,
        mode: Mode,
        rng: &mut R,
    ) -> Result<ArrayD<f32>> {
        if mode == Mode::Eval || self.keep_prob == 1. {
            return Ok(x);
        }

        let keep = Bernoulli::new(self.keep_prob as f64)
            .map_err(|e| MlErr::InvalidParam(e.to_string()))?;
        let scale = 1. / self.keep_prob;

        x.map_inplace(|v| {
            *v = if keep.sample(&mut *rng) { *v * scale } else { 0. };
        });

        Ok(x)
    }
}
