//! Side-channel summaries of the tensors flowing through a network.
//!
//! A summary never feeds back into the computation: writers only observe values.

use log::debug;
use ndarray::ArrayViewD;

/// Amount of uniform buckets a `Histogram` splits its range into.
pub const HISTOGRAM_BUCKETS: usize = 30;

/// The distribution of the values of a tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    min: f32,
    max: f32,
    mean: f32,
    count: usize,
    buckets: Vec<usize>,
}

impl Histogram {
    /// Creates a new `Histogram` from the values of a tensor.
    ///
    /// # Arguments
    /// * `values` - The tensor to summarize.
    ///
    /// # Returns
    /// A new `Histogram` instance, all zeros if `values` is empty.
    pub fn new(values: ArrayViewD<f32>) -> Self {
        let count = values.len();
        let mut buckets = vec![0; HISTOGRAM_BUCKETS];

        if count == 0 {
            return Self {
                min: 0.,
                max: 0.,
                mean: 0.,
                count,
                buckets,
            };
        }

        let min = values.fold(f32::INFINITY, |m, &v| m.min(v));
        let max = values.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        let mean = values.sum() / count as f32;
        let width = (max - min) / HISTOGRAM_BUCKETS as f32;

        for &v in values.iter() {
            let i = if width > 0. {
                (((v - min) / width) as usize).min(HISTOGRAM_BUCKETS - 1)
            } else {
                0
            };
            buckets[i] += 1;
        }

        Self {
            min,
            max,
            mean,
            count,
            buckets,
        }
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    pub fn mean(&self) -> f32 {
        self.mean
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn buckets(&self) -> &[usize] {
        &self.buckets
    }
}

/// Receives the summaries emitted while a network runs.
pub trait SummaryWriter {
    fn histogram(&mut self, name: &str, histogram: Histogram);
    fn scalar(&mut self, name: &str, value: f32);
}

/// Returns the fraction of elements of `values` that are exactly zero.
pub fn zero_fraction(values: ArrayViewD<f32>) -> f32 {
    if values.is_empty() {
        return 0.;
    }

    let zeros = values.iter().filter(|&&v| v == 0.).count();
    zeros as f32 / values.len() as f32
}

/// Records the histogram of a tensor under `name` and its sparsity under `{name}/sparsity`.
pub fn tensor_summary<W>(writer: &mut W, name: &str, values: ArrayViewD<f32>)
where
    W: SummaryWriter + ?Sized,
{
    writer.histogram(name, Histogram::new(values.view()));
    writer.scalar(&format!("{name}/sparsity"), zero_fraction(values));
}

/// Writes every summary as a `debug` log record.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSummaries;

impl SummaryWriter for LogSummaries {
    fn histogram(&mut self, name: &str, histogram: Histogram) {
        debug!(
            tensor = name,
            min = histogram.min(),
            max = histogram.max(),
            mean = histogram.mean(),
            count = histogram.count();
            "histogram"
        );
    }

    fn scalar(&mut self, name: &str, value: f32) {
        debug!(tensor = name, value = value; "scalar");
    }
}

/// Discards every summary.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSummaries;

impl SummaryWriter for NoopSummaries {
    fn histogram(&mut self, _name: &str, _histogram: Histogram) {}

    fn scalar(&mut self, _name: &str, _value: f32) {}
}

/// A single recorded summary.
#[derive(Debug, Clone, PartialEq)]
pub enum Summary {
    Histogram { name: String, histogram: Histogram },
    Scalar { name: String, value: f32 },
}

impl Summary {
    pub fn name(&self) -> &str {
        match self {
            Summary::Histogram { name, .. } | Summary::Scalar { name, .. } => name,
        }
    }
}

/// Keeps every summary in memory, in the order it was written.
#[derive(Debug, Default, Clone)]
pub struct SummaryRecorder {
    summaries: Vec<Summary>,
}

impl SummaryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summaries(&self) -> &[Summary] {
        &self.summaries
    }

    /// Returns the last scalar recorded under `name`.
    pub fn scalar(&self, name: &str) -> Option<f32> {
        self.summaries.iter().rev().find_map(|summary| match summary {
            Summary::Scalar { name: n, value } if n == name => Some(*value),
            _ => None,
        })
    }

    /// Returns the last histogram recorded under `name`.
    pub fn histogram(&self, name: &str) -> Option<&Histogram> {
        self.summaries.iter().rev().find_map(|summary| match summary {
            Summary::Histogram { name: n, histogram } if n == name => Some(histogram),
            _ => None,
        })
    }
}

impl SummaryWriter for SummaryRecorder {
    fn histogram(&mut self, name: &str, histogram: Histogram) {
        self.summaries.push(Summary::Histogram {
            name: name.to_string(),
            histogram,
        });
    }

    fn scalar(&mut self, name: &str, value: f32) {
        self.summaries.push(Summary::Scalar {
            name: name.to_string(),
            value,
        });
    }
}
