use std::{fmt, sync::Arc};

use crate::{
    Result,
    dataset::AudioBatch,
    parameters::{GradientSet, ModelParameters, ParamLayout},
};

/// A compute device a tower is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Device(pub usize);

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu:{}", self.0)
    }
}

/// A model replica able to compute its loss and gradient over an audio batch.
///
/// It only owns scratch space, the parameters are always borrowed.
pub trait Network: Send {
    /// The device this replica is bound to.
    fn device(&self) -> Device;

    /// Computes the loss of `batch` and writes the gradient of every tensor that contributed to it.
    ///
    /// # Arguments
    /// * `params` - The shared model parameters.
    /// * `batch` - The audio segments to train on.
    /// * `grads` - Where to write the gradients, tensors without contribution are left as `None`.
    ///
    /// # Returns
    /// The loss, including the regularization term if any.
    fn loss_and_grad(
        &mut self,
        params: &ModelParameters,
        batch: &AudioBatch,
        grads: &mut GradientSet,
    ) -> Result<f32>;
}

/// Creates the replicas of a network architecture.
pub trait NetworkBuilder: Send + Sync {
    /// The trainable tensors of the architecture.
    fn layout(&self) -> Arc<ParamLayout>;

    /// The amount of past samples a prediction depends on.
    fn receptive_field(&self) -> usize;

    /// Creates a new replica bound to `device`.
    fn build(&self, device: Device) -> Box<dyn Network>;
}
