use std::collections::HashSet;

use log::trace;
use ndarray::{ArrayD, ArrayViewD, IxDyn};
use rand::{SeedableRng, rngs::StdRng};

use super::layers::{Layer, Mode};
use crate::{
    MlErr, Result,
    summary::{SummaryWriter, tensor_summary},
    topology::Device,
};

/// A layer of a `Network` together with the name it was built under.
#[derive(Clone, Debug)]
pub struct NetLayer {
    name: String,
    layer: Layer,
    output_shape: Vec<Option<usize>>,
}

impl NetLayer {
    pub(crate) fn new(name: String, layer: Layer, output_shape: Vec<Option<usize>>) -> Self {
        Self {
            name,
            layer,
            output_shape,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layer(&self) -> &Layer {
        &self.layer
    }

    /// The shape of the layer's output as known when it was built.
    pub fn output_shape(&self) -> &[Option<usize>] {
        &self.output_shape
    }
}

/// Walks a flat parameter buffer handing out one slice per layer.
struct ParamCursor<'a> {
    params: &'a [f32],
    cursor: usize,
}

impl<'a> ParamCursor<'a> {
    fn new(params: &'a [f32]) -> Self {
        Self { params, cursor: 0 }
    }

    /// Tries to yield the next `size` parameters.
    fn next(&mut self, size: usize) -> Option<&'a [f32]> {
        let end = self.cursor + size;
        let slice = self.params.get(self.cursor..end)?;
        self.cursor = end;
        Some(slice)
    }
}

/// A feed forward network: information flows through its layers in the order they were built.
///
/// Every parameter lives in a single flat buffer, laid out layer after layer as weights followed
/// by biases.
#[derive(Debug)]
pub struct Network {
    device: Device,
    input_shape: Vec<Option<usize>>,
    layers: Vec<NetLayer>,
    params: Vec<f32>,
    summarized: HashSet<String>,
    rng: StdRng,
}

impl Network {
    pub(crate) fn new(
        device: Device,
        input_shape: Vec<Option<usize>>,
        layers: Vec<NetLayer>,
        params: Vec<f32>,
        summarized: HashSet<String>,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            device,
            input_shape,
            layers,
            params,
            summarized,
            rng,
        }
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn input_shape(&self) -> &[Option<usize>] {
        &self.input_shape
    }

    /// Returns the amount of parameters in the network.
    pub fn size(&self) -> usize {
        self.params.len()
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    /// Replaces every parameter of the network.
    ///
    /// # Arguments
    /// * `params` - The new parameters, laid out as the current ones.
    ///
    /// # Returns
    /// An error if `params` doesn't have exactly `size()` entries.
    pub fn set_params(&mut self, params: Vec<f32>) -> Result<()> {
        if params.len() != self.params.len() {
            return Err(MlErr::SizeMismatch {
                what: "params",
                got: params.len(),
                expected: self.params.len(),
            });
        }

        self.params = params;
        Ok(())
    }

    pub fn layers(&self) -> &[NetLayer] {
        &self.layers
    }

    /// Returns the layer built under `name`, if any.
    pub fn layer(&self, name: &str) -> Option<&NetLayer> {
        self.layers.iter().find(|layer| layer.name == name)
    }

    pub fn is_summarized(&self, name: &str) -> bool {
        self.summarized.contains(name)
    }

    /// Makes a forward pass through the network.
    ///
    /// # Arguments
    /// * `x` - A batch of NHWC images.
    /// * `mode` - Whether dropout is active.
    /// * `summaries` - Receives the summaries of every layer output registered for them.
    ///
    /// # Returns
    /// The logits for the given input or an error if its shape doesn't fit the network.
    pub fn forward<W>(
        &mut self,
        x: ArrayD<f32>,
        mode: Mode,
        summaries: &mut W,
    ) -> Result<ArrayD<f32>>
    where
        W: SummaryWriter + ?Sized,
    {
        self.check_input(x.shape())?;

        let Self {
            layers,
            params,
            summarized,
            rng,
            ..
        } = self;

        let mut front = ParamCursor::new(params.as_slice());
        let mut x = x;

        for net_layer in layers.iter() {
            let size = net_layer.layer.size();
            let layer_params = front.next(size).ok_or_else(|| MlErr::SizeMismatch {
                what: "params",
                got: params.len(),
                expected: front.cursor + size,
            })?;

            x = net_layer.layer.forward(layer_params, x, mode, rng)?;
            trace!(layer = net_layer.name.as_str(); "output shape {:?}", x.shape());

            if summarized.contains(&net_layer.name) {
                tensor_summary(summaries, &net_layer.name, x.view());
            }
        }

        Ok(x)
    }

    /// Writes the summaries of every weight and bias tensor, named `{layer}/weights` and
    /// `{layer}/biases`.
    pub fn summarize_weights<W>(&self, summaries: &mut W) -> Result<()>
    where
        W: SummaryWriter + ?Sized,
    {
        let mut front = ParamCursor::new(&self.params);

        for net_layer in &self.layers {
            let size = net_layer.layer.size();
            let layer_params = front.next(size).ok_or_else(|| MlErr::SizeMismatch {
                what: "params",
                got: self.params.len(),
                expected: front.cursor + size,
            })?;

            if size == 0 {
                continue;
            }

            let (weights, biases) = layer_params.split_at(net_layer.layer.weights_size());
            let weights = ArrayViewD::from_shape(IxDyn(&[weights.len()]), weights)?;
            let biases = ArrayViewD::from_shape(IxDyn(&[biases.len()]), biases)?;

            tensor_summary(summaries, &format!("{}/weights", net_layer.name), weights);
            tensor_summary(summaries, &format!("{}/biases", net_layer.name), biases);
        }

        Ok(())
    }

    fn check_input(&self, shape: &[usize]) -> Result<()> {
        let fits = shape.len() == self.input_shape.len()
            && shape
                .iter()
                .zip(&self.input_shape)
                .all(|(&got, expected)| expected.is_none_or(|e| e == got));

        if !fits {
            return Err(MlErr::Shape {
                what: "network input".into(),
                reason: format!("got {shape:?}, expected {:?}", self.input_shape),
            });
        }

        Ok(())
    }
}
