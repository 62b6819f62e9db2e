//! Converts the binary CIFAR-10 distribution into channel last safetensors files.

pub mod batch;
pub mod convert;
mod error;

pub use batch::Batch;
pub use convert::{Split, convert, load_split, read_split, write_split};
pub use error::{CifarErr, Result};
