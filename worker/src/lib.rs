mod bootstrap;
pub mod config;
mod error;
pub mod loop_;
pub mod net;
pub mod progress;
mod source;
mod state;
pub mod worker;

pub use bootstrap::{bootstrap, start_pipeline};
pub use config::{JobName, Options, RestorePolicy, Role, TrainingConfig};
pub use error::{Result, TrainErr};
pub use loop_::{RunSummary, TrainingLoop};
pub use net::{PsClient, Received};
pub use source::BatchSource;
pub use state::{LoopState, TrainingContext};
pub use worker::DistributedWorker;
