use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info};
use ndarray::{Array1, Array4};
use safetensors::{Dtype, SafeTensors, serialize_to_file, tensor::TensorView};

use crate::{
    Batch, CifarErr, Result,
    batch::{CHANNELS, IMAGE_SIZE},
};

pub const TRAIN_BATCHES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
pub const TEST_BATCH: &str = "test_batch.bin";

pub const DATA: &str = "data";
pub const LABELS: &str = "labels";
pub const LAYOUT_KEY: &str = "layout";
pub const LAYOUT: &str = "NHWC";

/// One of the two halves of the dataset, each written to its own file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    /// The batch files of the binary distribution making up this split.
    pub fn batch_files(&self) -> &'static [&'static str] {
        match self {
            Split::Train => &TRAIN_BATCHES,
            Split::Test => &[TEST_BATCH],
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            Split::Train => "train.safetensors",
            Split::Test => "test.safetensors",
        }
    }
}

/// Reads every batch of `split` from the `src` directory, joined in order.
pub fn load_split<P: AsRef<Path>>(src: P, split: Split) -> Result<Batch> {
    let src = src.as_ref();
    let mut batches = Vec::with_capacity(split.batch_files().len());

    for file in split.batch_files() {
        let path = src.join(file);
        if !path.is_file() {
            return Err(CifarErr::MissingBatch(path));
        }

        batches.push(Batch::read(&path)?);
    }

    Batch::concat(&batches)
}

/// Writes `batch` as a safetensors file holding a `data` and a `labels` tensor, both `U8`.
pub fn write_split<P: AsRef<Path>>(batch: &Batch, path: P) -> Result<()> {
    let path = path.as_ref();
    let data = batch
        .data()
        .as_slice()
        .ok_or_else(|| CifarErr::Shape("images are not contiguous".into()))?;
    let labels = batch
        .labels()
        .as_slice()
        .ok_or_else(|| CifarErr::Shape("labels are not contiguous".into()))?;

    let tensors = [
        (DATA, TensorView::new(Dtype::U8, batch.data().shape().to_vec(), data)?),
        (LABELS, TensorView::new(Dtype::U8, vec![batch.len()], labels)?),
    ];
    let metadata = HashMap::from([(LAYOUT_KEY.to_string(), LAYOUT.to_string())]);

    serialize_to_file(tensors, &Some(metadata), path)?;

    debug!(file:% = path.display(), images = batch.len(); "wrote split");
    Ok(())
}

fn u8_tensor<'a>(tensors: &'a SafeTensors<'a>, name: &str) -> Result<TensorView<'a>> {
    let view = tensors
        .tensor(name)
        .map_err(|_| CifarErr::MissingTensor(name.to_string()))?;

    if view.dtype() != Dtype::U8 {
        return Err(CifarErr::WrongDtype {
            name: name.to_string(),
            dtype: format!("{:?}", view.dtype()),
        });
    }

    Ok(view)
}

/// Reads back a file written by `write_split`.
pub fn read_split<P: AsRef<Path>>(path: P) -> Result<Batch> {
    let buffer = fs::read(path)?;

    let (_, metadata) = SafeTensors::read_metadata(&buffer)?;
    let layout = metadata
        .metadata()
        .as_ref()
        .and_then(|m| m.get(LAYOUT_KEY))
        .map(String::as_str);
    if layout.is_some_and(|layout| layout != LAYOUT) {
        return Err(CifarErr::Shape(format!("unsupported layout {layout:?}")));
    }

    let tensors = SafeTensors::deserialize(&buffer)?;
    let data = u8_tensor(&tensors, DATA)?;
    let labels = u8_tensor(&tensors, LABELS)?;

    let &[n, h, w, c] = data.shape() else {
        return Err(CifarErr::Shape(format!("images of shape {:?}", data.shape())));
    };
    if (h, w, c) != (IMAGE_SIZE, IMAGE_SIZE, CHANNELS) {
        return Err(CifarErr::Shape(format!("images of shape {:?}", data.shape())));
    }

    let data = Array4::from_shape_vec((n, h, w, c), data.data().to_vec())?;
    let labels = Array1::from_vec(labels.data().to_vec());

    Batch::new(data, labels)
}

/// Converts the binary distribution in `src` into a train and a test file under `out`.
///
/// # Arguments
/// * `src` - The directory holding the batch files.
/// * `out` - The directory to write the splits in, created if missing.
///
/// # Returns
/// The paths of the written files, train first.
pub fn convert<P: AsRef<Path>, Q: AsRef<Path>>(src: P, out: Q) -> Result<Vec<PathBuf>> {
    let out = out.as_ref();
    fs::create_dir_all(out)?;

    let mut written = Vec::with_capacity(2);
    for split in [Split::Train, Split::Test] {
        let batch = load_split(&src, split)?;
        let path = out.join(split.file_name());
        write_split(&batch, &path)?;

        info!(split:? = split, images = batch.len(), file:% = path.display(); "converted");
        written.push(path);
    }

    Ok(written)
}
