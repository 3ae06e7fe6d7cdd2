use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

use crate::initialization::RandErr;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        a: &'static str,
        b: &'static str,
        got: usize,
        expected: usize,
    },
    UnknownOptimizer(String),
    DeviceUnavailable {
        requested: usize,
        available: usize,
    },
    NonFinite {
        param: String,
    },
    /// Some worker's gradient of the step couldn't be accumulated, nothing was applied.
    StepAborted,
    Restore {
        path: PathBuf,
        reason: String,
    },
    Checkpoint {
        path: PathBuf,
        source: io::Error,
    },
    Audio {
        path: PathBuf,
        reason: String,
    },
    EmptyCorpus(PathBuf),
    PipelineClosed,
    Hyperparams(String),
    Io(io::Error),
    Rand(RandErr),
}

impl MlErr {
    /// Whether this error happened while computing or applying a training step.
    pub fn is_computation(&self) -> bool {
        matches!(
            self,
            MlErr::NonFinite { .. } | MlErr::SizeMismatch { .. } | MlErr::StepAborted
        )
    }
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                a,
                b,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch between {a} and {b}, got {got} and expected {expected}"
            ),
            MlErr::UnknownOptimizer(name) => write!(
                f,
                "Unknown optimizer {name:?}, expected one of {:?}",
                crate::optimization::OptimizerFactory::NAMES
            ),
            MlErr::DeviceUnavailable {
                requested,
                available,
            } => write!(
                f,
                "Requested {requested} compute devices but only {available} are available"
            ),
            MlErr::NonFinite { param } => {
                write!(f, "The gradient of {param} holds non finite values")
            }
            MlErr::StepAborted => {
                f.write_str("The step was aborted, not every worker's gradient could be accumulated")
            }
            MlErr::Restore { path, reason } => {
                write!(f, "Failed to restore from {}: {reason}", path.display())
            }
            MlErr::Checkpoint { path, source } => {
                write!(f, "Failed to store checkpoint {}: {source}", path.display())
            }
            MlErr::Audio { path, reason } => {
                write!(f, "Failed to load audio {}: {reason}", path.display())
            }
            MlErr::EmptyCorpus(dir) => write!(f, "No audio files found in {}", dir.display()),
            MlErr::PipelineClosed => {
                f.write_str("Every audio producer exited, the queue can't be filled anymore")
            }
            MlErr::Hyperparams(reason) => write!(f, "Invalid network hyperparameters: {reason}"),
            MlErr::Io(e) => write!(f, "io error: {e}"),
            MlErr::Rand(e) => write!(f, "Invalid initialization: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Checkpoint { source, .. } => Some(source),
            MlErr::Io(e) => Some(e),
            MlErr::Rand(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for MlErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<RandErr> for MlErr {
    fn from(value: RandErr) -> Self {
        Self::Rand(value)
    }
}
