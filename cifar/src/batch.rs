use std::{fs, path::Path};

use log::debug;
use ndarray::{Array1, Array4, Axis, concatenate};

use crate::{CifarErr, Result};

pub const IMAGE_SIZE: usize = 32;
pub const CHANNELS: usize = 3;
pub const CLASSES: u8 = 10;

/// The bytes of a single image, channel first.
pub const IMAGE_BYTES: usize = CHANNELS * IMAGE_SIZE * IMAGE_SIZE;

/// A label byte followed by an image.
pub const RECORD_BYTES: usize = 1 + IMAGE_BYTES;

/// A set of labelled images, stored channel last as `[N, 32, 32, 3]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    data: Array4<u8>,
    labels: Array1<u8>,
}

impl Batch {
    /// Creates a new `Batch`.
    ///
    /// # Returns
    /// An error if `data` isn't `[N, 32, 32, 3]` with one label per image.
    pub fn new(data: Array4<u8>, labels: Array1<u8>) -> Result<Self> {
        let (n, h, w, c) = data.dim();
        if (h, w, c) != (IMAGE_SIZE, IMAGE_SIZE, CHANNELS) || n != labels.len() {
            return Err(CifarErr::Shape(format!(
                "{:?} images with {} labels",
                data.shape(),
                labels.len()
            )));
        }

        Ok(Self { data, labels })
    }

    /// Parses a batch of the binary distribution.
    ///
    /// # Arguments
    /// * `file` - The name of the batch, used in errors.
    /// * `bytes` - The contents of the batch file.
    ///
    /// # Returns
    /// The batch with its images transposed to channel last.
    pub fn from_bytes(file: &str, bytes: &[u8]) -> Result<Self> {
        if bytes.len() % RECORD_BYTES != 0 {
            return Err(CifarErr::Truncated {
                file: file.to_string(),
                len: bytes.len(),
            });
        }

        let n = bytes.len() / RECORD_BYTES;
        let mut labels = Vec::with_capacity(n);
        let mut pixels = Vec::with_capacity(n * IMAGE_BYTES);

        for (record, chunk) in bytes.chunks_exact(RECORD_BYTES).enumerate() {
            let label = chunk[0];
            if label >= CLASSES {
                return Err(CifarErr::InvalidLabel {
                    file: file.to_string(),
                    record,
                    label,
                });
            }

            labels.push(label);
            pixels.extend_from_slice(&chunk[1..]);
        }

        let chw = Array4::from_shape_vec((n, CHANNELS, IMAGE_SIZE, IMAGE_SIZE), pixels)?;
        let data = chw.permuted_axes([0, 2, 3, 1]).as_standard_layout().into_owned();

        Self::new(data, Array1::from_vec(labels))
    }

    /// Reads a batch file of the binary distribution.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let batch = Self::from_bytes(&path.display().to_string(), &bytes)?;

        debug!(file:% = path.display(), images = batch.len(); "read batch");
        Ok(batch)
    }

    /// Joins `batches` one after the other.
    pub fn concat(batches: &[Batch]) -> Result<Self> {
        if batches.is_empty() {
            return Err(CifarErr::Shape("no batches to join".into()));
        }

        let data: Vec<_> = batches.iter().map(|b| b.data.view()).collect();
        let labels: Vec<_> = batches.iter().map(|b| b.labels.view()).collect();

        Self::new(concatenate(Axis(0), &data)?, concatenate(Axis(0), &labels)?)
    }

    pub fn data(&self) -> &Array4<u8> {
        &self.data
    }

    pub fn labels(&self) -> &Array1<u8> {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// The value of channel `c` at `(y, x)` of the image `record`.
    pub(crate) fn pixel(record: usize, y: usize, x: usize, c: usize) -> u8 {
        ((c * IMAGE_SIZE * IMAGE_SIZE + y * IMAGE_SIZE + x + 7 * record) % 251) as u8
    }

    /// Builds the bytes of a batch file holding `labels.len()` records.
    pub(crate) fn records(labels: &[u8], first: usize) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(labels.len() * RECORD_BYTES);

        for (i, &label) in labels.iter().enumerate() {
            bytes.push(label);
            for c in 0..CHANNELS {
                for y in 0..IMAGE_SIZE {
                    for x in 0..IMAGE_SIZE {
                        bytes.push(pixel(first + i, y, x, c));
                    }
                }
            }
        }

        bytes
    }

    #[test]
    fn transposes_to_channel_last() {
        let batch = Batch::from_bytes("batch", &records(&[3, 9], 0)).unwrap();

        assert_eq!(batch.data().shape(), &[2, 32, 32, 3]);
        for (r, y, x, c) in [(0, 0, 0, 0), (0, 0, 1, 2), (1, 5, 17, 1), (1, 31, 31, 2)] {
            assert_eq!(batch.data()[[r, y, x, c]], pixel(r, y, x, c));
        }
    }

    #[test]
    fn labels_are_bytes() {
        let batch = Batch::from_bytes("batch", &records(&[0, 9, 4], 0)).unwrap();
        assert_eq!(batch.labels().to_vec(), vec![0u8, 9, 4]);
    }

    #[test]
    fn truncated_record() {
        let mut bytes = records(&[1, 2], 0);
        bytes.pop();

        let err = Batch::from_bytes("data_batch_1.bin", &bytes).unwrap_err();
        assert!(matches!(err, CifarErr::Truncated { len, .. } if len == 2 * RECORD_BYTES - 1));
    }

    #[test]
    fn label_out_of_range() {
        let err = Batch::from_bytes("batch", &records(&[1, 10], 0)).unwrap_err();
        assert!(matches!(err, CifarErr::InvalidLabel { record: 1, label: 10, .. }));
    }

    #[test]
    fn concat_keeps_order() {
        let a = Batch::from_bytes("a", &records(&[1], 0)).unwrap();
        let b = Batch::from_bytes("b", &records(&[2, 3], 1)).unwrap();

        let joined = Batch::concat(&[a, b]).unwrap();

        assert_eq!(joined.len(), 3);
        assert_eq!(joined.labels().to_vec(), vec![1, 2, 3]);
        assert_eq!(joined.data()[[2, 4, 6, 1]], pixel(2, 4, 6, 1));
    }

    #[test]
    fn concat_of_nothing() {
        assert!(matches!(Batch::concat(&[]), Err(CifarErr::Shape(_))));
    }
}
