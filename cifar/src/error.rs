use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

use safetensors::SafeTensorError;

/// All errors that can occur while converting the dataset.
#[derive(Debug)]
pub enum CifarErr {
    Io(io::Error),
    /// A batch file of the distribution is not in the source directory.
    MissingBatch(PathBuf),
    /// The file doesn't hold a whole number of records.
    Truncated { file: String, len: usize },
    InvalidLabel { file: String, record: usize, label: u8 },
    Shape(String),
    SafeTensor(SafeTensorError),
    MissingTensor(String),
    WrongDtype { name: String, dtype: String },
}

pub type Result<T> = std::result::Result<T, CifarErr>;

impl Display for CifarErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CifarErr::Io(e) => write!(f, "io error: {e}"),
            CifarErr::MissingBatch(path) => write!(f, "missing batch file {}", path.display()),
            CifarErr::Truncated { file, len } => {
                write!(f, "{file} is truncated: {len} bytes is not a whole number of records")
            }
            CifarErr::InvalidLabel {
                file,
                record,
                label,
            } => write!(f, "{file}: record {record} has label {label}, expected 0..10"),
            CifarErr::Shape(reason) => write!(f, "invalid shape: {reason}"),
            CifarErr::SafeTensor(e) => write!(f, "safetensors error: {e}"),
            CifarErr::MissingTensor(name) => write!(f, "tensor {name} not found"),
            CifarErr::WrongDtype { name, dtype } => {
                write!(f, "tensor {name} has dtype {dtype}, expected U8")
            }
        }
    }
}

impl Error for CifarErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CifarErr::Io(e) => Some(e),
            CifarErr::SafeTensor(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CifarErr {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<SafeTensorError> for CifarErr {
    fn from(e: SafeTensorError) -> Self {
        Self::SafeTensor(e)
    }
}

impl From<ndarray::ShapeError> for CifarErr {
    fn from(e: ndarray::ShapeError) -> Self {
        Self::Shape(e.to_string())
    }
}
