use std::time::Instant;

use comms::specs::server::SessionSpec;
use log::{debug, info, warn};
use machine_learning::MlErr;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    task,
};
use tokio_util::sync::CancellationToken;

use crate::{
    BatchSource, LoopState, Result, RunSummary, TrainErr, TrainingConfig, TrainingContext,
    config::Role,
    net::{PsClient, Received},
    progress::ProgressRecord,
};

/// A step whose gradient was sent but whose update wasn't seen yet.
struct Pending {
    step: u64,
    loss: f32,
    started: Instant,
}

/// The steps a worker went through so far.
#[derive(Debug, Default)]
struct Progress {
    first_step: Option<u64>,
    last_step: Option<u64>,
    last_saved: Option<u64>,
}

/// Drives a worker of a distributed run.
///
/// The worker computes the gradient of every step the parameter server asks for, with
/// the parameters it was sent. A step is complete once the parameters of the next one
/// arrive, only then the chief records its progress and checkpoints it.
pub struct DistributedWorker<'a, S: BatchSource> {
    config: &'a TrainingConfig,
    ctx: TrainingContext,
    source: S,
    token: CancellationToken,
    state: LoopState,
}

impl<'a, S: BatchSource> DistributedWorker<'a, S> {
    /// Creates a new `DistributedWorker`.
    ///
    /// # Arguments
    /// * `config` - The run configuration, its role must be a worker.
    /// * `ctx` - The bootstrapped context of the run.
    /// * `source` - Where the batches come from.
    /// * `token` - Cancelling it makes the worker leave the session.
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

    fn is_chief(&self) -> bool {
        self.config.role.is_chief()
    }

    fn transition(&mut self, state: LoopState) {
        self.state = state;
        info!("training loop {state}");
    }

    /// Takes part in a session until its last step, a stop, an interrupt or an error.
    ///
    /// The worker always leaves the session before returning. The chief also writes a
    /// final checkpoint if the last complete step is past the last checkpoint.
    ///
    /// # Arguments
    /// * `client` - A connection to the parameter server.
    ///
    /// # Returns
    /// The summary of the run, or the error that stopped it.
    pub async fn run<R, W>(&mut self, client: &mut PsClient<R, W>) -> Result<RunSummary>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let mut progress = Progress {
            last_saved: self.ctx.restored_step(),
            ..Default::default()
        };

        self.transition(LoopState::Running);
        let mut outcome = self.train(client, &mut progress).await;

        self.transition(LoopState::Stopping);

        if let Err(e) = client.leave().await {
            warn!("leaving the session failed: {e}");
            outcome = outcome.and(Err(e));
        }

        let due = progress
            .last_step
            .filter(|&step| self.is_chief() && Some(step) > progress.last_saved);

        if let Some(step) = due {
            match self.ctx.checkpoints.save(&self.ctx.params, step) {
                Ok(_) => progress.last_saved = Some(step),
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
            first_step: progress.first_step.unwrap_or(self.ctx.start_step),
            last_step: progress.last_step,
            last_saved: progress.last_saved,
        })
    }

    /// The running state, one exchange with the parameter server per iteration.
    ///
    /// Receiving from the server is never raced against the token, a partially read
    /// message would leave the connection unusable for leaving the session. So an
    /// interrupt arriving after a gradient was sent is only noticed once the server
    /// answers, and the server answers once every peer sent its gradient of that step
    /// or the session is cancelled. A stalled peer delays the chief's final checkpoint
    /// by as much.
    ///
    /// A gradient with non finite values is never sent, the step fails with a
    /// `Computation` error instead.
    async fn train<R, W>(
        &mut self,
        client: &mut PsClient<R, W>,
        progress: &mut Progress,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        client.join(worker_index(&self.config.role)).await?;

        if self.is_chief() {
            let spec = SessionSpec {
                start_step: self.ctx.start_step,
                num_steps: self.config.num_steps,
                optimizer: self.config.optimizer.clone(),
                params: self.ctx.params.layout().specs().to_vec(),
            };

            client.init(spec, self.ctx.params.as_slice()).await?;
        }

        let mut pending = None;

        loop {
            let received = client
                .recv_params_into(self.ctx.params.as_mut_slice(), progress.last_step)
                .await?;

            let step = match received {
                Received::Params(step) => step,
                Received::Final(version) => {
                    self.complete(pending.take(), progress)?;
                    info!(version = version; "session finished");
                    return Ok(());
                }
                Received::Stop => {
                    info!("session stopped by the parameter server");
                    return Ok(());
                }
            };

            self.complete(pending.take(), progress)?;
            progress.first_step.get_or_insert(step);

            if self.token.is_cancelled() {
                info!(step = step; "interrupted");
                return Ok(());
            }

            let started = Instant::now();

            let batch = tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    info!(step = step; "interrupted");
                    return Ok(());
                }
                batch = self.source.next_batch(self.config.batch_size) => batch?,
            };

            let (loss, grads) = task::block_in_place(|| self.ctx.compute(&batch))?;
            client.send_grad(loss, &grads).await?;
            debug!(step = step, loss = loss; "gradient sent");

            pending = Some(Pending {
                step,
                loss,
                started,
            });
        }
    }

    /// Marks the pending step as complete, the parameters already reflect its update.
    fn complete(&mut self, pending: Option<Pending>, progress: &mut Progress) -> Result<()> {
        let Some(Pending {
            step,
            loss,
            started,
        }) = pending
        else {
            return Ok(());
        };

        progress.last_step = Some(step);

        if !self.is_chief() {
            return Ok(());
        }

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
            progress.last_saved = Some(step);
            self.transition(LoopState::Running);
        }

        Ok(())
    }
}

/// The id this process joins the session with.
fn worker_index(role: &Role) -> usize {
    match role {
        Role::Worker { task_index, .. } => *task_index,
        _ => 0,
    }
}
