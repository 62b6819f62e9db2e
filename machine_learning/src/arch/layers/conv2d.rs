use ndarray::{Array2, ArrayView1, ArrayView2, ArrayView4, linalg, prelude::*};

use crate::{MlErr, Result, arch::activations::ActFn};

/// A 2D convolution over NHWC input with `SAME` zero padding.
///
/// The parameter slice holds the kernel in `[ksize, ksize, in_channels, filters]` order followed
/// by one bias per filter.
#[derive(Clone, Debug)]
pub struct Conv2d {
    in_channels: usize,
    filters: usize,
    ksize: usize,
    stride: usize,
    act_fn: Option<ActFn>,
    size: usize,
}

impl Conv2d {
    /// Creates a new `Conv2d`.
    ///
    /// # Arguments
    /// * `in_channels` - The depth of the input feature map.
    /// * `filters` - The amount of output channels.
    /// * `ksize` - The side of the square kernel.
    /// * `stride` - The step between consecutive kernel applications, in both axes.
    /// * `act_fn` - The activation applied to the output, if any.
    ///
    /// # Returns
    /// A new `Conv2d` instance.
    pub fn new(
        in_channels: usize,
        filters: usize,
        ksize: usize,
        stride: usize,
        act_fn: Option<ActFn>,
    ) -> Self {
        Self {
            in_channels,
            filters,
            ksize,
            stride,
            act_fn,
            size: (ksize * ksize * in_channels + 1) * filters,
        }
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the amount of kernel weights, the biases excluded.
    pub fn weights_size(&self) -> usize {
        self.size - self.filters
    }

    pub fn filters(&self) -> usize {
        self.filters
    }

    pub fn act_fn(&self) -> Option<ActFn> {
        self.act_fn
    }

    /// The fan in and fan out of the kernel, used to scale its initialization.
    pub fn fans(&self) -> (usize, usize) {
        let area = self.ksize * self.ksize;
        (area * self.in_channels, area * self.filters)
    }

    /// Computes the spatial dimensions of the output for a `(height, width)` input.
    pub fn output_dim(&self, (h, w): (usize, usize)) -> (usize, usize) {
        (h.div_ceil(self.stride), w.div_ceil(self.stride))
    }

    pub fn forward(&self, params: &[f32], x: ArrayView4<f32>) -> Result<Array4<f32>> {
        let (n, h, w, c) = x.dim();
        if c != self.in_channels {
            return Err(MlErr::SizeMismatch {
                what: "conv input channels",
                got: c,
                expected: self.in_channels,
            });
        }

        let k = self.ksize;
        let (oh, ow) = self.output_dim((h, w));
        let pad_top = (oh.saturating_sub(1) * self.stride + k).saturating_sub(h) / 2;
        let pad_left = (ow.saturating_sub(1) * self.stride + k).saturating_sub(w) / 2;

        let mut patches = Array2::zeros((n * oh * ow, k * k * c));
        for b in 0..n {
            for oy in 0..oh {
                for ox in 0..ow {
                    let row = (b * oh + oy) * ow + ox;
                    for ky in 0..k {
                        let Some(iy) = (oy * self.stride + ky).checked_sub(pad_top) else {
                            continue;
                        };
                        if iy >= h {
                            continue;
                        }

                        for kx in 0..k {
                            let Some(ix) = (ox * self.stride + kx).checked_sub(pad_left) else {
                                continue;
                            };
                            if ix >= w {
                                continue;
                            }

                            let col = (ky * k + kx) * c;
                            patches
                                .slice_mut(s![row, col..col + c])
                                .assign(&x.slice(s![b, iy, ix, ..]));
                        }
                    }
                }
            }
        }

        let (kernel, biases) = self.view_params(params)?;
        let mut z = Array2::zeros((n * oh * ow, self.filters));
        linalg::general_mat_mul(1.0, &patches, &kernel, 0.0, &mut z);
        z += &biases;

        if let Some(act_fn) = self.act_fn {
            z.mapv_inplace(|z| act_fn.f(z));
        }

        Ok(z.into_shape_with_order((n, oh, ow, self.filters))?)
    }

    /// Gives a view of the raw parameter slice as the kernel matrix and biases of this layer.
    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        if params.len() != self.size {
            return Err(MlErr::SizeMismatch {
                what: "conv params",
                got: params.len(),
                expected: self.size,
            });
        }

        let w_size = self.weights_size();
        let kernel =
            ArrayView2::from_shape((w_size / self.filters, self.filters), &params[..w_size])?;
        let biases = ArrayView1::from_shape(self.filters, &params[w_size..])?;
        Ok((kernel, biases))
    }
}
