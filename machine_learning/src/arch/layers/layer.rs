use ndarray::{ArrayD, Ix2, Ix4};
use rand::Rng;

use super::{Conv2d, Dense, Dropout, Flatten, MaxPool2d};
use crate::{Result, arch::activations::ActFn};

/// Whether a forward pass is part of training or of evaluation. Only dropout cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    Train,
    #[default]
    Eval,
}

#[derive(Clone, Debug)]
pub enum Layer {
    Conv2d(Conv2d),
    MaxPool2d(MaxPool2d),
    Dropout(Dropout),
    Flatten(Flatten),
    Dense(Dense),
}

impl Layer {
    /// Returns the amount of parameters the layer takes from the network's buffer.
    pub fn size(&self) -> usize {
        match self {
            Layer::Conv2d(l) => l.size(),
            Layer::Dense(l) => l.size(),
            Layer::MaxPool2d(_) | Layer::Dropout(_) | Layer::Flatten(_) => 0,
        }
    }

    /// Returns how many of those parameters are weights, the rest being biases.
    pub fn weights_size(&self) -> usize {
        match self {
            Layer::Conv2d(l) => l.weights_size(),
            Layer::Dense(l) => l.weights_size(),
            Layer::MaxPool2d(_) | Layer::Dropout(_) | Layer::Flatten(_) => 0,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Layer::Conv2d(_) => "conv2d",
            Layer::MaxPool2d(_) => "max_pool2d",
            Layer::Dropout(_) => "dropout",
            Layer::Flatten(_) => "flatten",
            Layer::Dense(_) => "dense",
        }
    }

    pub fn act_fn(&self) -> Option<ActFn> {
        match self {
            Layer::Conv2d(l) => l.act_fn(),
            Layer::Dense(l) => l.act_fn(),
            Layer::MaxPool2d(_) | Layer::Dropout(_) | Layer::Flatten(_) => None,
        }
    }

    pub fn forward<R: Rng>(
        &self,
        params: &[f32],
        x: ArrayD<f32>,
        mode: Mode,
        rng: &mut R,
    ) -> Result<ArrayD<f32>> {
        let y = match self {
            Layer::Conv2d(l) => {
                let x = x.into_dimensionality::<Ix4>()?;
                l.forward(params, x.view())?.into_dyn()
            }
            Layer::MaxPool2d(l) => {
                let x = x.into_dimensionality::<Ix4>()?;
                l.forward(x.view())?.into_dyn()
            }
            Layer::Dense(l) => {
                let x = x.into_dimensionality::<Ix2>()?;
                l.forward(params, x.view())?.into_dyn()
            }
            Layer::Dropout(l) => l.forward(x, mode, rng)?,
            Layer::Flatten(l) => l.forward(x)?,
        };

        Ok(y)
    }
}
