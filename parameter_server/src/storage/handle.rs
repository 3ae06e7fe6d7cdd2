use std::ops::Deref;

use machine_learning::{Result, optimization::Optimizer, parameters::GradientSet};
use tokio::task;

use super::ParameterStore;

/// The actual interface to interact with a `ParameterStore`.
///
/// It bridges the async runtime with the blocking CPU-bound implementation of the `ParameterStore`.
pub struct ParameterHandle<O: Optimizer>(ParameterStore<O>);

impl<O: Optimizer> Clone for ParameterHandle<O> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<O: Optimizer> Deref for ParameterHandle<O> {
    type Target = ParameterStore<O>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<O: Optimizer> ParameterHandle<O> {
    /// Creates a new `ParameterHandle`
    ///
    /// # Arguments
    /// * `store` - The underlying parameter store.
    pub fn new(store: ParameterStore<O>) -> Self {
        Self(store)
    }
}

impl<O: Optimizer + Send> ParameterHandle<O> {
    /// Async call to the synchronous implementation of `ParameterStore::accumulate`.
    ///
    /// # Arguments
    /// * `grads` - A worker's gradient.
    ///
    /// # Returns
    /// An error if the gradient doesn't fit the storage or isn't finite.
    pub async fn accumulate(&self, grads: &GradientSet) -> Result<()> {
        task::block_in_place(|| self.0.accumulate(grads))
    }

    /// Async call to the synchronous implementation of `ParameterStore::update_params`.
    pub async fn update_params(&self) -> Result<()> {
        task::block_in_place(|| self.0.update_params())
    }

    /// Async call to the synchronous implementation of `ParameterStore::discard_grads`.
    pub async fn discard_grads(&self) {
        task::block_in_place(|| self.0.discard_grads())
    }

    /// Async call to the synchronous implementation of `ParameterStore::pull_params`.
    ///
    /// # Arguments
    /// * `out` - A mutable slice where the parameters will be copied.
    ///
    /// # Returns
    /// A `SizeMismatch` error if `out` doesn't match the storage.
    pub async fn pull_params(&self, out: &mut [f32]) -> Result<()> {
        task::block_in_place(|| self.0.pull_params(out))
    }
}
