use std::{error::Error, fmt, io};

use machine_learning::MlErr;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, TrainErr>;

/// Training runtime failures.
#[derive(Debug)]
pub enum TrainErr {
    /// Invalid or conflicting settings, reported before any resource is touched.
    Config(String),
    /// A checkpoint exists but couldn't be restored.
    Restore(MlErr),
    /// A numerical failure during a step.
    Computation(MlErr),
    /// Ingestion or checkpoint storage failures.
    Runtime(MlErr),
    Io(io::Error),
    /// The parameter server refused the step, with its reason.
    Rejected(String),
    UnexpectedMessage {
        step: Option<u64>,
        got: &'static str,
    },
    ParamsLengthMismatch {
        got: usize,
        expected: usize,
    },
}

impl TrainErr {
    /// Whether the error happened before training started and nothing needs preserving.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

impl fmt::Display for TrainErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainErr::Config(reason) => f.write_str(reason),
            TrainErr::Restore(e) => write!(f, "restore error: {e}"),
            TrainErr::Computation(e) => write!(f, "computation error: {e}"),
            TrainErr::Runtime(e) => write!(f, "runtime error: {e}"),
            TrainErr::Io(e) => write!(f, "io error: {e}"),
            TrainErr::Rejected(reason) => write!(f, "rejected by the parameter server: {reason}"),
            TrainErr::UnexpectedMessage {
                step: Some(step),
                got,
            } => write!(f, "unexpected message after step {step}: got {got}"),
            TrainErr::UnexpectedMessage { step: None, got } => {
                write!(f, "unexpected message before the first step: got {got}")
            }
            TrainErr::ParamsLengthMismatch { got, expected } => {
                write!(f, "params length mismatch: got {got}, expected {expected}")
            }
        }
    }
}

impl Error for TrainErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TrainErr::Restore(e) | TrainErr::Computation(e) | TrainErr::Runtime(e) => Some(e),
            TrainErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TrainErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<MlErr> for TrainErr {
    fn from(value: MlErr) -> Self {
        match value {
            MlErr::UnknownOptimizer(_)
            | MlErr::DeviceUnavailable { .. }
            | MlErr::Hyperparams(_)
            | MlErr::EmptyCorpus(_) => Self::Config(value.to_string()),
            MlErr::Restore { .. } => Self::Restore(value),
            e if e.is_computation() => Self::Computation(e),
            e => Self::Runtime(e),
        }
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<TrainErr> for io::Error {
    fn from(value: TrainErr) -> Self {
        match value {
            TrainErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
