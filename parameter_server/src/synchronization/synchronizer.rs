use machine_learning::{Result, optimization::Optimizer, parameters::GradientSet};

use crate::storage::ParameterHandle;

/// Executes a single parameter update step.
///
/// A `Synchronizer` coordinates the application of gradients and produces updated model parameters.
#[allow(unused)]
#[trait_variant::make(Synchronizer: Send)]
pub trait SynchronizerTemplate: Clone {
    /// Should implement a step in the training process, meaning accumulating this gradient and updating the parameters.
    ///
    /// # Arguments
    /// * `handle` - The parameter handle holding the parameters of the model.
    /// * `grads` - The incoming gradient to accumulate.
    /// * `params` - Where to write the resultant parameters.
    ///
    /// # Returns
    /// An error if the gradient doesn't fit the storage, or if the step couldn't be
    /// applied because another worker's gradient didn't.
    async fn step<O>(
        &self,
        handle: &ParameterHandle<O>,
        grads: &GradientSet,
        params: &mut [f32],
    ) -> Result<()>
    where
        O: Optimizer + Send;
}
