use std::env;

use anyhow::{Context, bail};
use log::info;
use ndarray::{ArrayD, IxDyn};
use rand::{Rng, SeedableRng, rngs::StdRng};

use machine_learning::{
    arch::layers::Mode,
    summary::LogSummaries,
    topology::{BuildContext, ModelParams, NetFactory, build_topology},
};

const DEFAULT_BATCH_SIZE: usize = 16;
const IMAGE_SIZE: usize = 32;
const CHANNELS: usize = 3;

/// Parses the batch size, `DEFAULT_BATCH_SIZE` if it's not given.
fn batch_size(value: Option<&str>) -> anyhow::Result<usize> {
    let Some(value) = value else {
        return Ok(DEFAULT_BATCH_SIZE);
    };

    match value.parse() {
        Ok(0) | Err(_) => bail!("BATCH_SIZE must be a positive integer, got {value:?}"),
        Ok(batch) => Ok(batch),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let params = match env::var("MODEL_PARAMS") {
        Ok(path) => ModelParams::from_json_file(&path)
            .with_context(|| format!("failed to load model params from {path}"))?,
        Err(_) => ModelParams::cifar10(),
    };
    let batch = batch_size(env::var("BATCH_SIZE").ok().as_deref())?;
    let seed = env::var("SEED")
        .ok()
        .map(|seed| seed.parse::<u64>())
        .transpose()
        .context("SEED must be an unsigned integer")?;

    let ctx = BuildContext::new().with_seed(seed);
    let mut factory = NetFactory::new(&ctx);
    let images = factory.input(
        "images",
        [Some(batch), Some(IMAGE_SIZE), Some(IMAGE_SIZE), Some(CHANNELS)],
    );
    let logits = build_topology(&mut factory, &ctx, images, &params)?;
    let mut network = factory.finish()?;

    info!(
        layers = network.layers().len(),
        params = network.size(),
        logits:? = logits.shape();
        "network built on {}",
        network.device()
    );

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let len = batch
        .checked_mul(IMAGE_SIZE * IMAGE_SIZE * CHANNELS)
        .context("BATCH_SIZE is too large")?;
    let pixels = (0..len)
        .map(|_| rng.random::<f32>())
        .collect();
    let x = ArrayD::from_shape_vec(IxDyn(&[batch, IMAGE_SIZE, IMAGE_SIZE, CHANNELS]), pixels)?;

    let mut summaries = LogSummaries;
    network.summarize_weights(&mut summaries)?;
    let y = network.forward(x, Mode::Eval, &mut summaries)?;

    info!("logits shape {:?}", y.shape());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_defaults() {
        assert_eq!(batch_size(None).unwrap(), DEFAULT_BATCH_SIZE);
        assert_eq!(batch_size(Some("8")).unwrap(), 8);
    }

    #[test]
    fn batch_size_must_be_positive() {
        assert!(batch_size(Some("0")).is_err());
        assert!(batch_size(Some("-3")).is_err());
        assert!(batch_size(Some("many")).is_err());
    }
}
