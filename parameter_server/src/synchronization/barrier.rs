use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use machine_learning::{MlErr, Result, optimization::Optimizer, parameters::GradientSet};
use tokio::sync::Barrier;

use super::Synchronizer;
use crate::storage::ParameterHandle;

/// Synchronizes parameter updates across multiple workers using a barrier.
///
/// Every worker's gradient of a step is accumulated before the update, and every
/// worker pulls the same updated parameters.
///
/// If any gradient of a step is rejected the update isn't applied and the barrier is
/// poisoned, that step and every later one fail for all workers.
#[derive(Clone)]
pub struct BarrierSync {
    barrier: Arc<Barrier>,
    poisoned: Arc<AtomicBool>,
}

impl BarrierSync {
    /// Creates a new `BarrierSync` synchronizer.
    ///
    /// # Arguments
    /// * `barrier_size` - The amount of workers to wait on until updating the parameters of the model.
    pub fn new(barrier_size: usize) -> Self {
        Self {
            barrier: Arc::new(Barrier::new(barrier_size)),
            poisoned: Arc::new(AtomicBool::new(false)),
        }
    }

    fn poison(&self) {
        self.poisoned.store(true, Ordering::Release);
    }

    fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }
}

impl Synchronizer for BarrierSync {
    async fn step<O>(
        &self,
        handle: &ParameterHandle<O>,
        grads: &GradientSet,
        params: &mut [f32],
    ) -> Result<()>
    where
        O: Optimizer + Send,
    {
        let accumulated = handle.accumulate(grads).await;

        if accumulated.is_err() {
            self.poison();
        }

        let mut updated = Ok(());

        if self.barrier.wait().await.is_leader() {
            if self.is_poisoned() {
                handle.discard_grads().await;
            } else if let Err(e) = handle.update_params().await {
                self.poison();
                updated = Err(e);
            }
        }

        self.barrier.wait().await;
        accumulated?;
        updated?;

        if self.is_poisoned() {
            return Err(MlErr::StepAborted);
        }

        handle.pull_params(params).await
    }
}
