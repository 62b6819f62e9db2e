pub mod arch;
pub mod error;
pub mod initialization;
pub mod summary;
pub mod topology;

pub use error::{ConfigErr, MlErr, Result};
