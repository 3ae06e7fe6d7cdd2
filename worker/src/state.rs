use std::fmt;

use machine_learning::{
    Result,
    checkpoint::CheckpointManager,
    dataset::AudioBatch,
    parameters::{GradientSet, ModelParameters},
    training::{GradientAggregator, Towers},
};

use crate::progress::SummaryWriter;

/// The states of a training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Initializing,
    Running,
    Checkpointing,
    Stopping,
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopState::Initializing => "initializing",
            LoopState::Running => "running",
            LoopState::Checkpointing => "checkpointing",
            LoopState::Stopping => "stopping",
            LoopState::Stopped => "stopped",
        };

        f.write_str(name)
    }
}

/// Everything a run owns besides its input.
pub struct TrainingContext {
    pub params: ModelParameters,
    pub towers: Towers,
    pub aggregator: GradientAggregator,
    pub checkpoints: CheckpointManager,
    pub summaries: SummaryWriter,
    /// The first step this run will execute.
    pub start_step: u64,
}

impl TrainingContext {
    /// The last step already reflected by the parameters, `None` if nothing was trained yet.
    pub fn restored_step(&self) -> Option<u64> {
        self.start_step.checked_sub(1)
    }

    /// Runs every tower on `batch` and averages their gradients.
    ///
    /// # Returns
    /// The mean loss of the towers and the averaged gradient, or `NonFinite` if the
    /// gradient can't be applied by anyone.
    pub fn compute(&mut self, batch: &AudioBatch) -> Result<(f32, GradientSet)> {
        let (loss, grads) = self.towers.compute(&self.params, batch)?;
        let grads = GradientAggregator::average(self.params.layout(), &grads)?;
        GradientAggregator::validate(self.params.layout(), &grads)?;
        Ok((loss, grads))
    }

    /// Executes one whole training step over `batch`.
    ///
    /// # Returns
    /// The mean loss of the towers.
    pub fn step(&mut self, batch: &AudioBatch) -> Result<f32> {
        let (loss, grads) = self.compute(batch)?;
        self.aggregator.apply(&grads, &mut self.params)?;
        Ok(loss)
    }
}
