use ndarray::{ArrayView4, prelude::*};

use crate::{MlErr, Result};

/// Max pooling over NHWC input with `VALID` padding: windows never leave the input.
#[derive(Clone, Debug)]
pub struct MaxPool2d {
    ksize: usize,
    stride: usize,
}

impl MaxPool2d {
    pub fn new(ksize: usize, stride: usize) -> Self {
        Self { ksize, stride }
    }

    /// Computes the spatial dimensions of the output for a `(height, width)` input.
    ///
    /// # Returns
    /// `None` if the window does not fit in the input.
    pub fn output_dim(&self, (h, w): (usize, usize)) -> Option<(usize, usize)> {
        let oh = h.checked_sub(self.ksize)? / self.stride + 1;
        let ow = w.checked_sub(self.ksize)? / self.stride + 1;
        Some((oh, ow))
    }

    pub fn forward(&self, x: ArrayView4<f32>) -> Result<Array4<f32>> {
        let (n, h, w, c) = x.dim();
        let (oh, ow) = self.output_dim((h, w)).ok_or_else(|| MlErr::Shape {
            what: "max pool input".into(),
            reason: format!("{h}x{w} is smaller than the {0}x{0} window", self.ksize),
        })?;

        let (k, stride) = (self.ksize, self.stride);
        let mut out = Array4::zeros((n, oh, ow, c));

        for ((b, oy, ox, ch), v) in out.indexed_iter_mut() {
            let (y0, x0) = (oy * stride, ox * stride);
            *v = x
                .slice(s![b, y0..y0 + k, x0..x0 + k, ch])
                .fold(f32::NEG_INFINITY, |m, &z| m.max(z));
        }

        Ok(out)
    }
}
