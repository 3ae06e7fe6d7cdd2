use serde::{Deserialize, Serialize};

use super::machine_learning::{OptimizerSpec, ParamSpec};

/// The session the chief worker asks the parameter server to run.
///
/// The parameters of the session are sent right after this spec as a
/// `Params` payload, in the order of `params`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSpec {
    /// The first step the workers will compute.
    pub start_step: u64,
    /// The last step of the session, inclusive.
    pub num_steps: u64,
    pub optimizer: OptimizerSpec,
    pub params: Vec<ParamSpec>,
}

impl SessionSpec {
    /// The total amount of `f32` values held by the session's parameters.
    pub fn total_len(&self) -> usize {
        self.params.iter().map(|p| p.len).sum()
    }
}
