pub mod arch;
pub mod checkpoint;
pub mod dataset;
mod error;
pub mod initialization;
pub mod optimization;
pub mod parameters;
pub mod training;

pub use error::{MlErr, Result};
