use std::collections::HashSet;

use log::debug;
use rand::{SeedableRng, rngs::StdRng};

use super::{BuildContext, Device, LayerFactory, Scope};
use crate::{
    MlErr, Result,
    arch::{
        NetLayer, Network,
        activations::ActFn,
        layers::{Conv2d, Dense, Dropout, Flatten, Layer, MaxPool2d},
    },
    initialization::{Init, ParamGen, RandParamGen},
};

/// The output of a layer built by a `NetFactory`.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    name: String,
    shape: Vec<Option<usize>>,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[Option<usize>] {
        &self.shape
    }
}

/// A `LayerFactory` that builds a runnable `Network`.
///
/// Shapes are inferred as layers are requested, so a layer that can't be applied to its input
/// fails right away with `MlErr::InvalidLayer`. Parameters are allocated on creation.
pub struct NetFactory {
    device: Device,
    init: Init,
    seed: Option<u64>,
    rng: StdRng,
    input_shape: Option<Vec<Option<usize>>>,
    layers: Vec<NetLayer>,
    names: HashSet<String>,
    params: Vec<f32>,
    summarized: HashSet<String>,
}

impl NetFactory {
    /// Creates a new `NetFactory`.
    ///
    /// # Arguments
    /// * `ctx` - Provides the device, the weight initialization and the seed of the build.
    pub fn new(ctx: &BuildContext) -> Self {
        let rng = match ctx.seed() {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            device: ctx.device(),
            init: ctx.defaults().init(),
            seed: ctx.seed(),
            rng,
            input_shape: None,
            layers: Vec::new(),
            names: HashSet::new(),
            params: Vec::new(),
            summarized: HashSet::new(),
        }
    }

    /// Declares the input of the network, a batch of NHWC images.
    pub fn input(&mut self, name: &str, shape: [Option<usize>; 4]) -> Node {
        let shape = shape.to_vec();
        self.input_shape = Some(shape.clone());

        Node {
            name: name.to_string(),
            shape,
        }
    }

    /// Consumes the factory, returning the network made of every layer built so far.
    ///
    /// # Returns
    /// An error if no input was declared.
    pub fn finish(self) -> Result<Network> {
        let input_shape = self.input_shape.ok_or_else(|| MlErr::Shape {
            what: "network input".into(),
            reason: "no input was declared".into(),
        })?;

        debug!(
            layers = self.layers.len(),
            params = self.params.len(),
            device:% = self.device;
            "network ready"
        );

        Ok(Network::new(
            self.device,
            input_shape,
            self.layers,
            self.params,
            self.summarized,
            self.seed,
        ))
    }

    /// Registers `layer` under `scope` and allocates its parameters.
    fn push(
        &mut self,
        scope: &Scope,
        layer: Layer,
        fans: (usize, usize),
        shape: Vec<Option<usize>>,
    ) -> Result<Node> {
        let name = scope.to_string();
        if self.names.contains(&name) {
            return Err(MlErr::invalid_layer(&name, "name already in use"));
        }

        if self.params.len().saturating_add(layer.size()) > MAX_PARAMS {
            return Err(MlErr::invalid_layer(&name, "too many parameters"));
        }

        let weights = layer.weights_size();
        let biases = layer.size() - weights;
        if weights > 0 {
            let (fan_in, fan_out) = fans;
            match self.init {
                Init::XavierUniform => {
                    RandParamGen::xavier_uniform(&mut self.rng, weights, fan_in, fan_out)?
                        .fill(&mut self.params, weights)?;
                }
                Init::Kaiming => {
                    RandParamGen::kaiming(&mut self.rng, weights, fan_in)?
                        .fill(&mut self.params, weights)?;
                }
            }
        }
        self.params.resize(self.params.len() + biases, 0.);

        debug!(layer = name.as_str(), kind = layer.kind(), params = layer.size(); "added layer");

        self.names.insert(name.clone());
        self.layers.push(NetLayer::new(name.clone(), layer, shape.clone()));
        Ok(Node { name, shape })
    }
}

/// The most parameters a single buffer can hold.
const MAX_PARAMS: usize = isize::MAX as usize / size_of::<f32>();

/// Counts the weights and biases of a layer feeding the product of `fan_in` values into each of
/// its `units`.
///
/// # Returns
/// An error if the count overflows or doesn't fit in a parameter buffer.
fn param_count(fan_in: &[usize], units: usize, scope: &Scope) -> Result<usize> {
    fan_in
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .and_then(|n| n.checked_add(1))
        .and_then(|n| n.checked_mul(units))
        .filter(|&n| n <= MAX_PARAMS)
        .ok_or_else(|| MlErr::invalid_layer(&scope.to_string(), "too many parameters"))
}

/// Returns the dimension `i` of `shape`, failing if it isn't statically known.
fn known(shape: &[Option<usize>], i: usize, scope: &Scope, what: &str) -> Result<usize> {
    shape
        .get(i)
        .copied()
        .flatten()
        .ok_or_else(|| MlErr::invalid_layer(&scope.to_string(), format!("unknown {what}")))
}

fn check_rank(shape: &[Option<usize>], rank: usize, scope: &Scope) -> Result<()> {
    if shape.len() != rank {
        return Err(MlErr::invalid_layer(
            &scope.to_string(),
            format!("expected a rank {rank} input, got {shape:?}"),
        ));
    }

    Ok(())
}

fn check_positive(value: usize, what: &str, scope: &Scope) -> Result<()> {
    if value == 0 {
        return Err(MlErr::invalid_layer(&scope.to_string(), format!("{what} must be positive")));
    }

    Ok(())
}

impl LayerFactory for NetFactory {
    type Tensor = Node;

    fn static_shape(&self, tensor: &Node) -> Vec<Option<usize>> {
        tensor.shape.clone()
    }

    fn conv2d(
        &mut self,
        input: Node,
        filters: usize,
        ksize: usize,
        stride: usize,
        act_fn: Option<ActFn>,
        scope: &Scope,
    ) -> Result<Node> {
        check_rank(&input.shape, 4, scope)?;
        check_positive(filters, "filters", scope)?;
        check_positive(ksize, "kernel size", scope)?;
        check_positive(stride, "stride", scope)?;

        let h = known(&input.shape, 1, scope, "height")?;
        let w = known(&input.shape, 2, scope, "width")?;
        let channels = known(&input.shape, 3, scope, "channels")?;
        param_count(&[ksize, ksize, channels], filters, scope)?;

        let conv = Conv2d::new(channels, filters, ksize, stride, act_fn);
        let (oh, ow) = conv.output_dim((h, w));
        let fans = conv.fans();
        let shape = vec![input.shape[0], Some(oh), Some(ow), Some(filters)];

        self.push(scope, Layer::Conv2d(conv), fans, shape)
    }

    fn max_pool2d(
        &mut self,
        input: Node,
        ksize: usize,
        stride: usize,
        scope: &Scope,
    ) -> Result<Node> {
        check_rank(&input.shape, 4, scope)?;
        check_positive(ksize, "kernel size", scope)?;
        check_positive(stride, "stride", scope)?;

        let h = known(&input.shape, 1, scope, "height")?;
        let w = known(&input.shape, 2, scope, "width")?;

        let pool = MaxPool2d::new(ksize, stride);
        let (oh, ow) = pool.output_dim((h, w)).ok_or_else(|| {
            MlErr::invalid_layer(
                &scope.to_string(),
                format!("a {ksize}x{ksize} window doesn't fit in a {h}x{w} input"),
            )
        })?;
        let shape = vec![input.shape[0], Some(oh), Some(ow), input.shape[3]];

        self.push(scope, Layer::MaxPool2d(pool), (0, 0), shape)
    }

    fn dropout(&mut self, input: Node, keep_prob: f32, scope: &Scope) -> Result<Node> {
        let dropout = Dropout::new(keep_prob)
            .map_err(|e| MlErr::invalid_layer(&scope.to_string(), e.to_string()))?;

        self.push(scope, Layer::Dropout(dropout), (0, 0), input.shape)
    }

    fn flatten(&mut self, input: Node, batch: usize, scope: &Scope) -> Result<Node> {
        if input.shape.len() < 2 {
            return Err(MlErr::invalid_layer(
                &scope.to_string(),
                format!("can't flatten {:?}", input.shape),
            ));
        }
        if input.shape[0].is_some_and(|b| b != batch) {
            return Err(MlErr::invalid_layer(
                &scope.to_string(),
                format!("batch {batch} doesn't match {:?}", input.shape),
            ));
        }

        let features = (1..input.shape.len()).try_fold(1usize, |acc, i| {
            let d = known(&input.shape, i, scope, "dimension")?;
            acc.checked_mul(d)
                .ok_or_else(|| MlErr::invalid_layer(&scope.to_string(), "too many features"))
        })?;

        let shape = vec![Some(batch), Some(features)];
        self.push(scope, Layer::Flatten(Flatten::new(batch, features)), (0, 0), shape)
    }

    fn fully_connected(
        &mut self,
        input: Node,
        size: usize,
        act_fn: Option<ActFn>,
        scope: &Scope,
    ) -> Result<Node> {
        check_rank(&input.shape, 2, scope)?;
        check_positive(size, "size", scope)?;

        let features = known(&input.shape, 1, scope, "features")?;
        param_count(&[features], size, scope)?;

        let dense = Dense::new((features, size), act_fn);
        let shape = vec![input.shape[0], Some(size)];

        self.push(scope, Layer::Dense(dense), (features, size), shape)
    }

    fn summarize(&mut self, tensor: &Node) {
        self.summarized.insert(tensor.name.clone());
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};

    use super::*;
    use crate::{
        arch::layers::Mode,
        summary::SummaryRecorder,
        topology::{LayerDefaults, ModelParams, build_topology},
    };

    fn params() -> ModelParams {
        ModelParams {
            filters_counts: vec![4, 8],
            conv_ksizes: vec![3],
            conv_strides: vec![],
            pool_ksizes: vec![2],
            pool_strides: vec![],
            fc_sizes: vec![16, 10],
            dropouts: vec![0.5],
        }
    }

    fn build(ctx: &BuildContext, params: &ModelParams) -> Result<(Network, Node)> {
        let mut factory = NetFactory::new(ctx);
        let images = factory.input("images", [Some(2), Some(8), Some(8), Some(3)]);
        let logits = build_topology(&mut factory, ctx, images, params)?;
        Ok((factory.finish()?, logits))
    }

    #[test]
    fn builds_the_classifier() {
        let ctx = BuildContext::new().with_seed(Some(7));
        let (network, logits) = build(&ctx, &params()).unwrap();

        assert_eq!(logits.name(), "logits");
        assert_eq!(logits.shape(), &[Some(2), Some(10)]);

        let names: Vec<_> = network.layers().iter().map(|l| l.name()).collect();
        assert_eq!(
            names,
            vec![
                "conv_layers/conv_layers_1/conv",
                "conv_layers/conv_layers_1/pool",
                "conv_layers/conv_layers_1/dropout",
                "conv_layers/conv_layers_2/conv",
                "conv_layers/conv_layers_2/pool",
                "conv_layers/conv_layers_2/dropout",
                "flatten",
                "fc_layers/fc_layers_1/fc",
                "fc_layers/fc_layers_1/dropout",
                "logits",
            ]
        );

        let pool = network.layer("conv_layers/conv_layers_2/pool").unwrap();
        assert_eq!(pool.output_shape(), &[Some(2), Some(2), Some(2), Some(8)]);
        assert_eq!(network.layer("flatten").unwrap().output_shape(), &[Some(2), Some(32)]);

        assert_eq!(network.size(), 112 + 296 + 528 + 170);
        assert!(network.layer("logits").unwrap().layer().act_fn().is_none());
        let fc = network.layer("fc_layers/fc_layers_1/fc").unwrap();
        assert_eq!(fc.layer().act_fn(), Some(ActFn::relu()));
        assert!(network.is_summarized("conv_layers/conv_layers_1/conv"));
        assert!(!network.is_summarized("flatten"));
    }

    #[test]
    fn two_conv_blocks_one_fc_block_and_linear_logits() {
        let params = ModelParams {
            filters_counts: vec![32, 64],
            conv_ksizes: vec![5],
            conv_strides: vec![],
            pool_ksizes: vec![2],
            pool_strides: vec![],
            fc_sizes: vec![128, 10],
            dropouts: vec![0.5],
        };
        let normalized = params.normalize().unwrap();
        assert_eq!(normalized.conv_ksizes(), &[5, 5]);
        assert_eq!(normalized.conv_strides(), &[1, 1]);
        assert_eq!(normalized.pool_ksizes(), &[2, 2]);
        assert_eq!(normalized.pool_strides(), &[2, 2]);
        assert_eq!(normalized.dropouts(), &[0.5, 1., 1.]);

        let ctx = BuildContext::new().with_seed(Some(0));
        let mut factory = NetFactory::new(&ctx);
        let images = factory.input("images", [Some(1), Some(32), Some(32), Some(3)]);
        let logits = build_topology(&mut factory, &ctx, images, &params).unwrap();
        let network = factory.finish().unwrap();

        let count = |kind: &str| {
            network
                .layers()
                .iter()
                .filter(|l| l.layer().kind() == kind)
                .count()
        };
        assert_eq!(count("conv2d"), 2);
        assert_eq!(count("max_pool2d"), 2);
        assert_eq!(count("dense"), 2);
        assert_eq!(count("dropout"), 3);

        assert_eq!(network.layer("flatten").unwrap().output_shape(), &[Some(1), Some(4096)]);
        assert_eq!(logits.shape(), &[Some(1), Some(10)]);
        assert!(network.layer("logits").unwrap().layer().act_fn().is_none());
        assert_eq!(network.size(), 2432 + 51264 + 524416 + 1290);
    }

    #[test]
    fn forward_produces_logits_and_summaries() {
        let ctx = BuildContext::new().with_seed(Some(3));
        let (mut network, _) = build(&ctx, &params()).unwrap();
        let mut summaries = SummaryRecorder::new();

        let x = ArrayD::from_elem(IxDyn(&[2, 8, 8, 3]), 0.5);
        let logits = network.forward(x, Mode::Eval, &mut summaries).unwrap();

        assert_eq!(logits.shape(), &[2, 10]);
        assert_eq!(summaries.summaries().len(), 12);
        assert!(summaries.histogram("conv_layers/conv_layers_1/conv").is_some());
        assert!(summaries.scalar("fc_layers/fc_layers_1/fc/sparsity").is_some());
        assert!(summaries.histogram("logits").is_some());

        let x = ArrayD::from_elem(IxDyn(&[2, 8, 8, 3]), 0.5);
        let logits = network.forward(x, Mode::Train, &mut summaries).unwrap();
        assert_eq!(logits.shape(), &[2, 10]);
    }

    #[test]
    fn seeded_builds_are_equal() {
        let ctx = BuildContext::new().with_seed(Some(11));
        let (a, _) = build(&ctx, &params()).unwrap();
        let (b, _) = build(&ctx, &params()).unwrap();

        assert_eq!(a.params(), b.params());
    }

    #[test]
    fn biases_start_at_zero() {
        let ctx = BuildContext::new()
            .with_seed(Some(5))
            .with_defaults(LayerDefaults::new(Some(ActFn::relu()), Init::Kaiming));
        let (network, _) = build(&ctx, &params()).unwrap();

        // first conv: 3 * 3 * 3 * 4 weights followed by 4 biases
        assert_eq!(&network.params()[108..112], &[0.; 4]);
        assert!(network.params()[..108].iter().any(|&w| w != 0.));
    }

    #[test]
    fn oversized_pool_is_rejected() {
        let ctx = BuildContext::new();
        let mut params = params();
        params.pool_ksizes = vec![3];
        params.pool_strides = vec![1];
        params.filters_counts = vec![4, 4, 4, 4];

        let err = build(&ctx, &params).unwrap_err();

        let MlErr::InvalidLayer { scope, .. } = err else {
            panic!("expected an invalid layer error, got {err}");
        };
        assert_eq!(scope, "conv_layers/conv_layers_4/pool");
    }

    #[test]
    fn bad_keep_prob_is_rejected() {
        let ctx = BuildContext::new();
        let mut params = params();
        params.dropouts = vec![1.5];

        let err = build(&ctx, &params).unwrap_err();

        let MlErr::InvalidLayer { scope, .. } = err else {
            panic!("expected an invalid layer error, got {err}");
        };
        assert_eq!(scope, "conv_layers/conv_layers_1/dropout");
    }

    #[test]
    fn huge_kernel_is_rejected() {
        let ctx = BuildContext::new();
        let mut params = params();
        params.conv_ksizes = vec![1 << 32];

        let err = build(&ctx, &params).unwrap_err();

        let MlErr::InvalidLayer { scope, reason } = err else {
            panic!("expected an invalid layer error, got {err}");
        };
        assert_eq!(scope, "conv_layers/conv_layers_1/conv");
        assert_eq!(reason, "too many parameters");
    }

    #[test]
    fn huge_fully_connected_is_rejected() {
        let ctx = BuildContext::new();
        let mut params = params();
        params.fc_sizes = vec![usize::MAX / 2, 10];

        let err = build(&ctx, &params).unwrap_err();

        let MlErr::InvalidLayer { scope, reason } = err else {
            panic!("expected an invalid layer error, got {err}");
        };
        assert_eq!(scope, "fc_layers/fc_layers_1/fc");
        assert_eq!(reason, "too many parameters");
    }

    #[test]
    fn huge_flatten_is_rejected() {
        let ctx = BuildContext::new();
        let mut factory = NetFactory::new(&ctx);
        let images = factory.input("images", [Some(1), Some(usize::MAX), Some(2), Some(1)]);

        let err = factory
            .flatten(images, 1, &Scope::root().child("flatten"))
            .unwrap_err();

        assert!(matches!(err, MlErr::InvalidLayer { reason, .. } if reason == "too many features"));
    }

    #[test]
    fn rejected_layer_leaves_no_params() {
        let ctx = BuildContext::new().with_seed(Some(1));
        let mut factory = NetFactory::new(&ctx);
        let images = factory.input("images", [Some(1), Some(4), Some(4), Some(1)]);
        let scope = Scope::root().child("conv");

        assert!(factory.conv2d(images.clone(), 1 << 40, 1 << 20, 1, None, &scope).is_err());
        let out = factory.conv2d(images, 2, 3, 1, None, &scope).unwrap();
        let network = factory.finish().unwrap();

        assert_eq!(out.shape(), &[Some(1), Some(4), Some(4), Some(2)]);
        assert_eq!(network.size(), (3 * 3 + 1) * 2);
        assert_eq!(&network.params()[18..], &[0.; 2]);
    }

    #[test]
    fn fully_connected_needs_a_flat_input() {
        let ctx = BuildContext::new();
        let mut factory = NetFactory::new(&ctx);
        let images = factory.input("images", [Some(1), Some(4), Some(4), Some(1)]);

        let err = factory
            .fully_connected(images, 10, None, &Scope::root().child("fc"))
            .unwrap_err();

        assert!(matches!(err, MlErr::InvalidLayer { scope, .. } if scope == "fc"));
    }

    #[test]
    fn conv_needs_known_channels() {
        let ctx = BuildContext::new();
        let mut factory = NetFactory::new(&ctx);
        let images = factory.input("images", [Some(1), Some(4), Some(4), None]);

        let err = factory
            .conv2d(images, 2, 3, 1, None, &Scope::root().child("conv"))
            .unwrap_err();

        assert!(matches!(err, MlErr::InvalidLayer { .. }));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let ctx = BuildContext::new();
        let mut factory = NetFactory::new(&ctx);
        let images = factory.input("images", [Some(1), Some(4), Some(4), Some(1)]);
        let scope = Scope::root().child("drop");

        let out = factory.dropout(images, 0.5, &scope).unwrap();
        let err = factory.dropout(out, 0.5, &scope).unwrap_err();

        assert!(matches!(err, MlErr::InvalidLayer { reason, .. } if reason == "name already in use"));
    }

    #[test]
    fn finish_requires_an_input() {
        let factory = NetFactory::new(&BuildContext::new());
        assert!(matches!(factory.finish(), Err(MlErr::Shape { .. })));
    }
}
