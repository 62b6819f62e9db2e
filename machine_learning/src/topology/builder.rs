use log::{debug, info};

use super::{BuildContext, ConvStage, FcStage, ModelParams, Scope};
use crate::{MlErr, Result, arch::activations::ActFn};

/// Whatever creates the layers of a topology and the tensors flowing between them.
///
/// Every method takes the full scope of the layer it creates, so names are unique within a
/// build. Errors are returned as is by `build_topology`.
pub trait LayerFactory {
    /// A handle to the output of a layer.
    type Tensor;

    /// Returns the shape of `tensor` as known at build time, `None` marking unknown dimensions.
    fn static_shape(&self, tensor: &Self::Tensor) -> Vec<Option<usize>>;

    /// A 2D convolution over NHWC input with `SAME` padding.
    fn conv2d(
        &mut self,
        input: Self::Tensor,
        filters: usize,
        ksize: usize,
        stride: usize,
        act_fn: Option<ActFn>,
        scope: &Scope,
    ) -> Result<Self::Tensor>;

    /// A max pool over NHWC input with `VALID` padding.
    fn max_pool2d(
        &mut self,
        input: Self::Tensor,
        ksize: usize,
        stride: usize,
        scope: &Scope,
    ) -> Result<Self::Tensor>;

    fn dropout(
        &mut self,
        input: Self::Tensor,
        keep_prob: f32,
        scope: &Scope,
    ) -> Result<Self::Tensor>;

    /// Reshapes `input` into `[batch, features]`.
    fn flatten(
        &mut self,
        input: Self::Tensor,
        batch: usize,
        scope: &Scope,
    ) -> Result<Self::Tensor>;

    fn fully_connected(
        &mut self,
        input: Self::Tensor,
        size: usize,
        act_fn: Option<ActFn>,
        scope: &Scope,
    ) -> Result<Self::Tensor>;

    /// Registers `tensor` for histogram and sparsity summaries.
    fn summarize(&mut self, tensor: &Self::Tensor);
}

/// Applies `block` once per entry of `args`, feeding each block the output of the previous one.
///
/// The blocks are scoped as `{name}_{i}`, counting from one, inside a `name` scope nested in
/// `parent`.
///
/// # Arguments
/// * `factory` - The layer factory.
/// * `input` - The input of the first block.
/// * `parent` - The scope the stack lives in.
/// * `name` - The name of the stack.
/// * `args` - The parameters of each block.
/// * `block` - Builds a single block.
///
/// # Returns
/// The output of the last block, `input` if `args` is empty.
pub fn stack<F, A, I, B>(
    factory: &mut F,
    input: F::Tensor,
    parent: &Scope,
    name: &str,
    args: I,
    mut block: B,
) -> Result<F::Tensor>
where
    F: LayerFactory,
    I: IntoIterator<Item = A>,
    B: FnMut(&mut F, F::Tensor, A, &Scope) -> Result<F::Tensor>,
{
    let scope = parent.child(name);
    let mut out = input;

    for (i, arg) in args.into_iter().enumerate() {
        let block_scope = scope.child(&format!("{name}_{}", i + 1));
        out = block(factory, out, arg, &block_scope)?;
    }

    Ok(out)
}

fn conv_pool_drop_2d<F: LayerFactory>(
    factory: &mut F,
    input: F::Tensor,
    stage: ConvStage,
    act_fn: Option<ActFn>,
    scope: &Scope,
) -> Result<F::Tensor> {
    debug!(scope:% = scope, filters = stage.filters, keep_prob = stage.keep_prob; "conv block");

    let out = factory.conv2d(
        input,
        stage.filters,
        stage.conv_ksize,
        stage.conv_stride,
        act_fn,
        &scope.child("conv"),
    )?;
    factory.summarize(&out);

    let out = factory.max_pool2d(out, stage.pool_ksize, stage.pool_stride, &scope.child("pool"))?;
    factory.summarize(&out);

    factory.dropout(out, stage.keep_prob, &scope.child("dropout"))
}

fn fc_drop<F: LayerFactory>(
    factory: &mut F,
    input: F::Tensor,
    stage: FcStage,
    act_fn: Option<ActFn>,
    scope: &Scope,
) -> Result<F::Tensor> {
    debug!(scope:% = scope, size = stage.size, keep_prob = stage.keep_prob; "fc block");

    let out = factory.fully_connected(input, stage.size, act_fn, &scope.child("fc"))?;
    factory.summarize(&out);

    factory.dropout(out, stage.keep_prob, &scope.child("dropout"))
}

/// Builds a convolutional classifier on top of `images`.
///
/// The network is a stack of convolution, max pool and dropout blocks, a flatten, a stack of
/// fully connected and dropout blocks and a final fully connected layer without activation nor
/// dropout. `params` is normalized first, so a bad configuration fails before any layer is
/// requested from `factory`.
///
/// # Arguments
/// * `factory` - Creates the layers.
/// * `ctx` - The root scope and layer defaults of the build.
/// * `images` - A batch of NHWC images.
/// * `params` - The description of the layer groups.
///
/// # Returns
/// The logits tensor, or an error if the parameters are invalid, the batch size of the
/// convolutional output is not known or the factory fails.
pub fn build_topology<F: LayerFactory>(
    factory: &mut F,
    ctx: &BuildContext,
    images: F::Tensor,
    params: &ModelParams,
) -> Result<F::Tensor> {
    let params = params.normalize()?;
    let act_fn = ctx.defaults().act_fn();
    let root = ctx.scope();

    debug!(
        conv_layers = params.conv_layers_count(),
        fc_layers = params.fc_sizes().len(),
        device:% = ctx.device();
        "building topology"
    );

    let net = stack(
        factory,
        images,
        root,
        "conv_layers",
        params.conv_stages(),
        |factory, x, stage, scope| conv_pool_drop_2d(factory, x, stage, act_fn, scope),
    )?;

    let shape = factory.static_shape(&net);
    let batch = shape.first().copied().flatten().ok_or_else(|| MlErr::Shape {
        what: root.name("flatten"),
        reason: format!("batch dimension of {shape:?} is not statically known"),
    })?;
    let net = factory.flatten(net, batch, &root.child("flatten"))?;

    let net = stack(
        factory,
        net,
        root,
        "fc_layers",
        params.fc_stages(),
        |factory, x, stage, scope| fc_drop(factory, x, stage, act_fn, scope),
    )?;

    let logits = factory.fully_connected(net, params.logits_size(), None, &root.child("logits"))?;
    factory.summarize(&logits);

    info!(
        logits:? = factory.static_shape(&logits);
        "built topology with {} conv and {} fc blocks",
        params.conv_layers_count(),
        params.fc_sizes().len() - 1
    );

    Ok(logits)
}
