use ndarray::{ArrayD, IxDyn};

use crate::{MlErr, Result};

/// Reshapes a batch of feature maps into `[batch, features]`.
#[derive(Clone, Debug)]
pub struct Flatten {
    batch: usize,
    features: usize,
}

impl Flatten {
    pub fn new(batch: usize, features: usize) -> Self {
        Self { batch, features }
    }

    pub fn features(&self) -> usize {
        self.features
    }

    pub fn forward(&self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let batch = x.shape().first().copied().unwrap_or_default();
        if batch != self.batch {
            return Err(MlErr::SizeMismatch {
                what: "batch",
                got: batch,
                expected: self.batch,
            });
        }

        let x = x.as_standard_layout().into_owned();
        Ok(x.into_shape_with_order(IxDyn(&[self.batch, self.features]))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_row_major_order() {
        let flatten = Flatten::new(2, 4);
        let x = ArrayD::from_shape_vec(IxDyn(&[2, 2, 1, 2]), (0..8).map(|v| v as f32).collect())
            .unwrap();

        let y = flatten.forward(x).unwrap();

        assert_eq!(y.shape(), &[2, 4]);
        assert_eq!(y[[1, 0]], 4.);
    }

    #[test]
    fn batch_must_match() {
        let flatten = Flatten::new(4, 2);
        let x = ArrayD::zeros(IxDyn(&[2, 4]));

        assert!(matches!(
            flatten.forward(x),
            Err(MlErr::SizeMismatch { what: "batch", got: 2, expected: 4 })
        ));
    }
}
