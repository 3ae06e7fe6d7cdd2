use super::{Optimizer, check_len};
use crate::Result;

/// RMSProp with momentum.
///
/// The running mean of the squared gradients starts at one, so the first updates are close to
/// plain momentum SGD.
#[derive(Debug)]
pub struct RmsProp {
    learning_rate: f32,
    decay: f32,
    momentum: f32,
    epsilon: f32,
    ms: Box<[f32]>,
    mom: Box<[f32]>,
}

impl RmsProp {
    /// Creates a new `RmsProp` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `decay` - The discount factor of the squared gradients' running mean.
    /// * `momentum`, `epsilon` - Hyperparameters to the optimization algorithm.
    pub fn new(len: usize, learning_rate: f32, decay: f32, momentum: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            decay,
            momentum,
            epsilon,
            ms: vec![1.; len].into_boxed_slice(),
            mom: vec![0.; len].into_boxed_slice(),
        }
    }
}

impl Optimizer for RmsProp {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_len(grad, params)?;

        let Self {
            learning_rate: lr,
            decay,
            momentum,
            epsilon: eps,
            ..
        } = *self;

        params
            .iter_mut()
            .zip(grad)
            .zip(self.ms.iter_mut())
            .zip(self.mom.iter_mut())
            .for_each(|(((p, g), ms), mom)| {
                *ms = decay * *ms + (1. - decay) * g.powi(2);
                *mom = momentum * *mom + lr * g / (*ms + eps).sqrt();
                *p -= *mom;
            });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_gradient_keeps_params() {
        let mut rms = RmsProp::new(3, 0.01, 0.9, 0.9, 1e-5);
        let mut params = [1., 2., 3.];

        rms.update_params(&[0.; 3], &mut params).unwrap();
        assert_eq!(params, [1., 2., 3.]);
    }

    #[test]
    fn moves_against_gradient() {
        let mut rms = RmsProp::new(1, 0.01, 0.9, 0., 1e-5);
        let mut params = [0.];

        rms.update_params(&[2.], &mut params).unwrap();
        let expected = -0.01 * 2. / (0.9f32 + 0.4 + 1e-5).sqrt();
        assert!((params[0] - expected).abs() < 1e-6);
    }
}
