use std::{env, path::PathBuf};

use anyhow::{Context, bail};
use log::info;

use cifar::{Split, convert, read_split};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let (Some(src), Some(out)) = (args.next(), args.next()) else {
        bail!("usage: cifar <batches_dir> <out_dir>");
    };
    let (src, out) = (PathBuf::from(src), PathBuf::from(out));

    convert(&src, &out)
        .with_context(|| format!("failed to convert the batches in {}", src.display()))?;

    let train = out.join(Split::Train.file_name());
    let batch = read_split(&train).with_context(|| format!("failed to read {}", train.display()))?;

    info!(images = batch.len(), file:% = train.display(); "ok");
    Ok(())
}
