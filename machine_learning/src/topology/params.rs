use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{ConfigErr, Result};

/// Per layer group description of a convolutional network.
///
/// Every list but `filters_counts` and `fc_sizes` may be shorter than the amount of stages it
/// describes, `normalize` fills in the missing entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// One entry per convolutional stage.
    pub filters_counts: Vec<usize>,
    pub conv_ksizes: Vec<usize>,
    #[serde(default)]
    pub conv_strides: Vec<usize>,
    pub pool_ksizes: Vec<usize>,
    #[serde(default)]
    pub pool_strides: Vec<usize>,
    /// Widths of the fully connected stages, the last one being the amount of classes.
    pub fc_sizes: Vec<usize>,
    /// Keep probabilities, first for the convolutional stages and then for the fully connected
    /// ones.
    #[serde(default)]
    pub dropouts: Vec<f32>,
}

impl ModelParams {
    /// A two stage network for 32x32 RGB images and 10 classes.
    pub fn cifar10() -> Self {
        Self {
            filters_counts: vec![32, 64],
            conv_ksizes: vec![5],
            conv_strides: vec![],
            pool_ksizes: vec![3],
            pool_strides: vec![2],
            fc_sizes: vec![384, 192, 10],
            dropouts: vec![0.9, 0.9, 0.5, 0.5],
        }
    }

    /// Reads a `ModelParams` from a json file.
    ///
    /// # Arguments
    /// * `path` - The path of the file.
    ///
    /// # Returns
    /// The parsed parameters or an error if the file can't be read or isn't valid json.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Expands every list to the amount of stages it describes.
    ///
    /// Kernel sizes and explicit strides repeat their last entry, an empty `conv_strides`
    /// becomes all ones and an empty `pool_strides` copies the pool kernel sizes. Missing
    /// dropouts are filled with `1`, that is, no dropout, whatever the last given value is.
    ///
    /// # Returns
    /// The normalized parameters or an error naming the first required list that is empty.
    pub fn normalize(&self) -> Result<NormalizedParams> {
        if self.filters_counts.is_empty() {
            return Err(ConfigErr::EmptyFiltersCounts.into());
        }
        if self.conv_ksizes.is_empty() {
            return Err(ConfigErr::EmptyConvKsizes.into());
        }
        if self.pool_ksizes.is_empty() {
            return Err(ConfigErr::EmptyPoolKsizes.into());
        }
        if self.fc_sizes.is_empty() {
            return Err(ConfigErr::EmptyFcSizes.into());
        }

        let conv_layers_count = self.filters_counts.len();

        let mut conv_ksizes = self.conv_ksizes.clone();
        repeat_last(&mut conv_ksizes, conv_layers_count);

        let mut pool_ksizes = self.pool_ksizes.clone();
        repeat_last(&mut pool_ksizes, conv_layers_count);

        let conv_strides = if self.conv_strides.is_empty() {
            vec![1; conv_layers_count]
        } else {
            let mut conv_strides = self.conv_strides.clone();
            repeat_last(&mut conv_strides, conv_layers_count);
            conv_strides
        };

        let pool_strides = if self.pool_strides.is_empty() {
            pool_ksizes.clone()
        } else {
            let mut pool_strides = self.pool_strides.clone();
            repeat_last(&mut pool_strides, conv_layers_count);
            pool_strides
        };

        let dropouts_count = conv_layers_count + self.fc_sizes.len() - 1;
        let mut dropouts = self.dropouts.clone();
        if dropouts.len() < dropouts_count {
            dropouts.resize(dropouts_count, 1.);
        }

        Ok(NormalizedParams {
            filters_counts: self.filters_counts.clone(),
            conv_ksizes,
            conv_strides,
            pool_ksizes,
            pool_strides,
            fc_sizes: self.fc_sizes.clone(),
            dropouts,
        })
    }
}

/// Grows `values` up to `len` entries by repeating its last one.
fn repeat_last<T: Copy>(values: &mut Vec<T>, len: usize) {
    let Some(&last) = values.last() else {
        return;
    };

    if values.len() < len {
        values.resize(len, last);
    }
}

/// The parameters of a single convolution, max pool and dropout block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvStage {
    pub filters: usize,
    pub conv_ksize: usize,
    pub conv_stride: usize,
    pub pool_ksize: usize,
    pub pool_stride: usize,
    pub keep_prob: f32,
}

/// The parameters of a single fully connected and dropout block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FcStage {
    pub size: usize,
    pub keep_prob: f32,
}

/// `ModelParams` with every list expanded to its stage count.
///
/// The four convolutional lists have one entry per convolutional stage and there are at least
/// as many dropouts as convolutional stages plus fully connected stages, logits excluded.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedParams {
    filters_counts: Vec<usize>,
    conv_ksizes: Vec<usize>,
    conv_strides: Vec<usize>,
    pool_ksizes: Vec<usize>,
    pool_strides: Vec<usize>,
    fc_sizes: Vec<usize>,
    dropouts: Vec<f32>,
}

impl NormalizedParams {
    pub fn conv_layers_count(&self) -> usize {
        self.filters_counts.len()
    }

    pub fn filters_counts(&self) -> &[usize] {
        &self.filters_counts
    }

    pub fn conv_ksizes(&self) -> &[usize] {
        &self.conv_ksizes
    }

    pub fn conv_strides(&self) -> &[usize] {
        &self.conv_strides
    }

    pub fn pool_ksizes(&self) -> &[usize] {
        &self.pool_ksizes
    }

    pub fn pool_strides(&self) -> &[usize] {
        &self.pool_strides
    }

    pub fn fc_sizes(&self) -> &[usize] {
        &self.fc_sizes
    }

    pub fn dropouts(&self) -> &[f32] {
        &self.dropouts
    }

    /// Iterates the convolutional stages, each paired with its own dropout.
    pub fn conv_stages(&self) -> impl Iterator<Item = ConvStage> + '_ {
        let n = self.conv_layers_count();

        self.filters_counts
            .iter()
            .zip(&self.conv_ksizes)
            .zip(&self.conv_strides)
            .zip(&self.pool_ksizes)
            .zip(&self.pool_strides)
            .zip(&self.dropouts[..n])
            .map(
                |(((((&filters, &conv_ksize), &conv_stride), &pool_ksize), &pool_stride), &keep_prob)| {
                    ConvStage {
                        filters,
                        conv_ksize,
                        conv_stride,
                        pool_ksize,
                        pool_stride,
                        keep_prob,
                    }
                },
            )
    }

    /// Iterates the fully connected stages but the logits one, each paired with the dropouts
    /// that follow the convolutional ones.
    pub fn fc_stages(&self) -> impl Iterator<Item = FcStage> + '_ {
        let hidden = &self.fc_sizes[..self.fc_sizes.len() - 1];

        hidden
            .iter()
            .zip(&self.dropouts[self.conv_layers_count()..])
            .map(|(&size, &keep_prob)| FcStage { size, keep_prob })
    }

    /// The width of the final, unactivated fully connected layer.
    pub fn logits_size(&self) -> usize {
        self.fc_sizes[self.fc_sizes.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MlErr;

    fn params() -> ModelParams {
        ModelParams {
            filters_counts: vec![32, 64],
            conv_ksizes: vec![5],
            conv_strides: vec![],
            pool_ksizes: vec![2],
            pool_strides: vec![],
            fc_sizes: vec![128, 10],
            dropouts: vec![0.5],
        }
    }

    #[test]
    fn single_kernel_sizes_broadcast() {
        let mut params = params();
        params.filters_counts = vec![8, 16, 32, 64];
        params.conv_ksizes = vec![3];
        params.pool_ksizes = vec![2];

        let normalized = params.normalize().unwrap();

        assert_eq!(normalized.conv_ksizes(), &[3, 3, 3, 3]);
        assert_eq!(normalized.pool_ksizes(), &[2, 2, 2, 2]);
    }

    #[test]
    fn short_lists_repeat_last_entry() {
        let mut params = params();
        params.filters_counts = vec![8, 16, 32];
        params.conv_ksizes = vec![7, 5];
        params.conv_strides = vec![2, 1];
        params.pool_ksizes = vec![3, 2];
        params.pool_strides = vec![1];

        let normalized = params.normalize().unwrap();

        assert_eq!(normalized.conv_ksizes(), &[7, 5, 5]);
        assert_eq!(normalized.conv_strides(), &[2, 1, 1]);
        assert_eq!(normalized.pool_ksizes(), &[3, 2, 2]);
        assert_eq!(normalized.pool_strides(), &[1, 1, 1]);
    }

    #[test]
    fn longer_lists_are_kept() {
        let mut params = params();
        params.conv_ksizes = vec![5, 3, 3];
        params.dropouts = vec![0.9, 0.8, 0.7, 0.6];

        let normalized = params.normalize().unwrap();

        assert_eq!(normalized.conv_ksizes(), &[5, 3, 3]);
        assert_eq!(normalized.dropouts(), &[0.9, 0.8, 0.7, 0.6]);
        assert_eq!(normalized.conv_stages().count(), 2);
        assert_eq!(normalized.fc_stages().count(), 1);
    }

    #[test]
    fn empty_conv_strides_default_to_one() {
        let mut params = params();
        params.filters_counts = vec![1, 2, 3];

        let normalized = params.normalize().unwrap();
        assert_eq!(normalized.conv_strides(), &[1, 1, 1]);
    }

    #[test]
    fn empty_pool_strides_copy_pool_kernels() {
        let mut params = params();
        params.pool_ksizes = vec![3, 2];

        let normalized = params.normalize().unwrap();

        assert_eq!(normalized.pool_strides(), normalized.pool_ksizes());
        assert_eq!(normalized.pool_strides(), &[3, 2]);
    }

    #[test]
    fn missing_dropouts_are_one() {
        let mut params = params();
        params.fc_sizes = vec![256, 128, 10];
        params.dropouts = vec![0.5, 0.25];

        let normalized = params.normalize().unwrap();
        assert_eq!(normalized.dropouts(), &[0.5, 0.25, 1., 1.]);

        params.dropouts = vec![];
        let normalized = params.normalize().unwrap();
        assert_eq!(normalized.dropouts(), &[1.; 4]);
    }

    #[test]
    fn input_is_left_untouched() {
        let params = params();
        let before = params.clone();

        params.normalize().unwrap();
        assert_eq!(params, before);
    }

    #[test]
    fn empty_required_lists() {
        let cases: [(fn(&mut ModelParams), ConfigErr, &str, &str); 4] = [
            (
                |p| p.filters_counts.clear(),
                ConfigErr::EmptyFiltersCounts,
                "filters_counts",
                "conv filter list empty",
            ),
            (
                |p| p.conv_ksizes.clear(),
                ConfigErr::EmptyConvKsizes,
                "conv_ksizes",
                "conv kernel list empty",
            ),
            (
                |p| p.pool_ksizes.clear(),
                ConfigErr::EmptyPoolKsizes,
                "pool_ksizes",
                "pool kernel list empty",
            ),
            (
                |p| p.fc_sizes.clear(),
                ConfigErr::EmptyFcSizes,
                "fc_sizes",
                "fc size list empty",
            ),
        ];

        for (clear, expected, field, msg) in cases {
            let mut params = params();
            clear(&mut params);

            let err = params.normalize().unwrap_err();
            let MlErr::Configuration(got) = err else {
                panic!("expected a configuration error, got {err}");
            };

            assert_eq!(got, expected);
            assert_eq!(got.field(), field);
            assert_eq!(got.to_string(), msg);
        }
    }

    #[test]
    fn two_stage_example() {
        let normalized = params().normalize().unwrap();

        assert_eq!(normalized.conv_ksizes(), &[5, 5]);
        assert_eq!(normalized.conv_strides(), &[1, 1]);
        assert_eq!(normalized.pool_ksizes(), &[2, 2]);
        assert_eq!(normalized.pool_strides(), &[2, 2]);
        assert_eq!(normalized.dropouts(), &[0.5, 1., 1.]);

        let conv: Vec<_> = normalized.conv_stages().collect();
        assert_eq!(
            conv[0],
            ConvStage {
                filters: 32,
                conv_ksize: 5,
                conv_stride: 1,
                pool_ksize: 2,
                pool_stride: 2,
                keep_prob: 0.5,
            }
        );
        assert_eq!(conv[1].filters, 64);
        assert_eq!(conv[1].keep_prob, 1.);

        let fc: Vec<_> = normalized.fc_stages().collect();
        assert_eq!(fc, vec![FcStage { size: 128, keep_prob: 1. }]);
        assert_eq!(normalized.logits_size(), 10);
    }

    #[test]
    fn json_omits_optional_lists() {
        let json = r#"{
            "filters_counts": [32, 64],
            "conv_ksizes": [5],
            "pool_ksizes": [2],
            "fc_sizes": [128, 10]
        }"#;

        let params: ModelParams = serde_json::from_str(json).unwrap();

        assert!(params.conv_strides.is_empty());
        assert!(params.pool_strides.is_empty());
        assert!(params.dropouts.is_empty());
    }

    #[test]
    fn json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, serde_json::to_string(&ModelParams::cifar10()).unwrap()).unwrap();

        let params = ModelParams::from_json_file(&path).unwrap();
        assert_eq!(params, ModelParams::cifar10());
    }

    #[test]
    fn missing_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModelParams::from_json_file(dir.path().join("nope.json")).unwrap_err();

        assert!(matches!(err, MlErr::Io(_)));
    }
}
