pub mod service;
mod storage;
mod synchronization;

pub use service::{ParameterServer, Server, ServerBuilder, Session};
pub use storage::{ParameterHandle, ParameterStore};
pub use synchronization::{BarrierSync, Synchronizer};
