use std::time::Instant;

use log::{info, warn};
use machine_learning::MlErr;
use tokio::task;
use tokio_util::sync::CancellationToken;

use crate::{
    BatchSource, LoopState, Result, TrainErr, TrainingConfig, TrainingContext,
    progress::ProgressRecord,
};

/// What a finished run went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub first_step: u64,
    /// The last executed step, `None` if the run stopped before its first step.
    pub last_step: Option<u64>,
    /// The step of the last checkpoint written or restored.
    pub last_saved: Option<u64>,
}

/// Drives a standalone run: one step per batch, periodic checkpoints and a final one on exit.
pub struct TrainingLoop<'a, S: BatchSource> {
    config: &'a TrainingConfig,
    ctx: TrainingContext,
    source: S,
    token: CancellationToken,
    state: LoopState,
}

impl<'a, S: BatchSource> TrainingLoop<'a, S> {
    /// Creates a new `TrainingLoop`.
    ///
    /// # Arguments
    /// * `config` - The run configuration.
    /// * `ctx` - The bootstrapped context of the run.
    /// * `source` - Where the batches come from.
    /// * `token` - Cancelling it stops the run after the current step.
    pub fn new(
        config: &'a TrainingConfig,
        ctx: TrainingContext,
        source: S,
        token: CancellationToken,
    ) -> Self {
        Self {
            config,
            ctx,
            source,
            token,
            state: LoopState::Initializing,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn context(&self) -> &TrainingContext {
        &self.ctx
    }

    fn transition(&mut self, state: LoopState) {
        self.state = state;
        info!("training loop {state}");
    }

    /// Trains until the last step, an interrupt or an error.
    ///
    /// Whatever the reason the run stops for, a final checkpoint is written if the last
    /// executed step is past the last checkpoint, and the input is stopped.
    ///
    /// # Returns
    /// The summary of the run, or the error that stopped it.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let first_step = self.ctx.start_step;
        let mut last_saved = self.ctx.restored_step();
        let mut last_step = None;

        self.transition(LoopState::Running);
        let mut outcome = self.train(&mut last_step, &mut last_saved).await;

        self.transition(LoopState::Stopping);

        if let Some(step) = last_step.filter(|&step| Some(step) > last_saved) {
            match self.ctx.checkpoints.save(&self.ctx.params, step) {
                Ok(_) => last_saved = Some(step),
                Err(e) => {
                    warn!("final checkpoint failed: {e}");
                    outcome = outcome.and(Err(e.into()));
                }
            }
        }

        let stopped = task::block_in_place(|| self.source.stop());

        if let Err(e) = stopped {
            let closed = matches!(outcome, Err(TrainErr::Runtime(MlErr::PipelineClosed)));

            if outcome.is_ok() || closed {
                outcome = Err(e.into());
            }
        }

        self.transition(LoopState::Stopped);

        outcome.map(|_| RunSummary {
            first_step,
            last_step,
            last_saved,
        })
    }

    /// The running state, one step per iteration.
    async fn train(
        &mut self,
        last_step: &mut Option<u64>,
        last_saved: &mut Option<u64>,
    ) -> Result<()> {
        for step in self.ctx.start_step..=self.config.num_steps {
            let started = Instant::now();

            let batch = tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    info!(step = step; "interrupted");
                    return Ok(());
                }
                batch = self.source.next_batch(self.config.batch_size) => batch?,
            };

            let loss = task::block_in_place(|| self.ctx.step(&batch))?;
            *last_step = Some(step);

            let record = ProgressRecord {
                step,
                loss,
                duration: started.elapsed(),
            };

            println!("{record}");
            self.ctx.summaries.write(&record)?;

            if self.config.is_checkpoint_step(step) {
                self.transition(LoopState::Checkpointing);
                self.ctx.checkpoints.save(&self.ctx.params, step)?;
                *last_saved = Some(step);
                self.transition(LoopState::Running);
            }
        }

        Ok(())
    }
}
