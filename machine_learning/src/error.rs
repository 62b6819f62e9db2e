use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The list of a `ModelParams` that made it unusable for building a topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErr {
    EmptyFiltersCounts,
    EmptyConvKsizes,
    EmptyPoolKsizes,
    EmptyFcSizes,
}

impl ConfigErr {
    /// Returns the name of the offending `ModelParams` field.
    pub fn field(&self) -> &'static str {
        match self {
            ConfigErr::EmptyFiltersCounts => "filters_counts",
            ConfigErr::EmptyConvKsizes => "conv_ksizes",
            ConfigErr::EmptyPoolKsizes => "pool_ksizes",
            ConfigErr::EmptyFcSizes => "fc_sizes",
        }
    }
}

impl Display for ConfigErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfigErr::EmptyFiltersCounts => "conv filter list empty",
            ConfigErr::EmptyConvKsizes => "conv kernel list empty",
            ConfigErr::EmptyPoolKsizes => "pool kernel list empty",
            ConfigErr::EmptyFcSizes => "fc size list empty",
        };

        f.write_str(s)
    }
}

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    Configuration(ConfigErr),
    Shape {
        what: String,
        reason: String,
    },
    InvalidLayer {
        scope: String,
        reason: String,
    },
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    InvalidParam(String),
    Io(io::Error),
    Json(serde_json::Error),
}

impl MlErr {
    pub(crate) fn invalid_layer<S: Into<String>>(scope: &str, reason: S) -> Self {
        Self::InvalidLayer {
            scope: scope.to_string(),
            reason: reason.into(),
        }
    }
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::Configuration(e) => write!(f, "invalid configuration: {e}"),
            MlErr::Shape { what, reason } => write!(f, "invalid shape for {what}: {reason}"),
            MlErr::InvalidLayer { scope, reason } => write!(f, "invalid layer {scope}: {reason}"),
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch in {what}, got {got} and expected {expected}"
            ),
            MlErr::InvalidParam(msg) => write!(f, "invalid parameter: {msg}"),
            MlErr::Io(e) => write!(f, "io error: {e}"),
            MlErr::Json(e) => write!(f, "json error: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Io(e) => Some(e),
            MlErr::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigErr> for MlErr {
    fn from(value: ConfigErr) -> Self {
        Self::Configuration(value)
    }
}

impl From<io::Error> for MlErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for MlErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<ndarray::ShapeError> for MlErr {
    fn from(value: ndarray::ShapeError) -> Self {
        Self::Shape {
            what: "array".into(),
            reason: value.to_string(),
        }
    }
}
