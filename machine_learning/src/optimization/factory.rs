use comms::specs::machine_learning::OptimizerSpec;

use super::{Adam, GradientDescentWithMomentum, Optimizer, RmsProp};
use crate::{MlErr, Result};

const ADAM_BETA1: f32 = 0.9;
const ADAM_BETA2: f32 = 0.999;
const ADAM_EPSILON: f32 = 1e-4;
const RMS_PROP_DECAY: f32 = 0.9;
const RMS_PROP_EPSILON: f32 = 1e-5;

/// Resolves optimizer names into specs and specs into per tensor optimizers.
pub struct OptimizerFactory;

impl OptimizerFactory {
    /// The accepted optimizer names.
    pub const NAMES: [&str; 3] = ["adam", "sgd", "rmsprop"];

    /// Resolves an optimizer by name.
    ///
    /// # Arguments
    /// * `name` - One of `OptimizerFactory::NAMES`.
    /// * `learning_rate` - The learning rate of the optimizer.
    /// * `momentum` - The momentum, ignored by `adam`.
    ///
    /// # Returns
    /// The optimizer's spec or `UnknownOptimizer` for any other name.
    pub fn spec(name: &str, learning_rate: f32, momentum: f32) -> Result<OptimizerSpec> {
        let spec = match name {
            "adam" => OptimizerSpec::Adam {
                learning_rate,
                beta1: ADAM_BETA1,
                beta2: ADAM_BETA2,
                epsilon: ADAM_EPSILON,
            },
            "sgd" => OptimizerSpec::GradientDescentWithMomentum {
                learning_rate,
                momentum,
            },
            "rmsprop" => OptimizerSpec::RmsProp {
                learning_rate,
                decay: RMS_PROP_DECAY,
                momentum,
                epsilon: RMS_PROP_EPSILON,
            },
            other => return Err(MlErr::UnknownOptimizer(other.to_string())),
        };

        Ok(spec)
    }

    /// Builds a new optimizer for a tensor of `len` values.
    pub fn build(spec: &OptimizerSpec, len: usize) -> Box<dyn Optimizer + Send> {
        match *spec {
            OptimizerSpec::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => Box::new(Adam::new(len, learning_rate, beta1, beta2, epsilon)),
            OptimizerSpec::GradientDescentWithMomentum {
                learning_rate,
                momentum,
            } => Box::new(GradientDescentWithMomentum::new(len, learning_rate, momentum)),
            OptimizerSpec::RmsProp {
                learning_rate,
                decay,
                momentum,
                epsilon,
            } => Box::new(RmsProp::new(len, learning_rate, decay, momentum, epsilon)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_names() {
        for name in OptimizerFactory::NAMES {
            assert!(OptimizerFactory::spec(name, 1e-3, 0.9).is_ok());
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = OptimizerFactory::spec("adagrad", 1e-3, 0.9).unwrap_err();
        assert!(matches!(err, MlErr::UnknownOptimizer(name) if name == "adagrad"));
    }

    #[test]
    fn built_optimizer_checks_length() {
        let spec = OptimizerFactory::spec("sgd", 0.1, 0.).unwrap();
        let mut optimizer = OptimizerFactory::build(&spec, 2);
        let mut params = [1., 1.];

        optimizer.update_params(&[1., 2.], &mut params).unwrap();
        assert!((params[0] - 0.9).abs() < 1e-6);
        assert!((params[1] - 0.8).abs() < 1e-6);
        assert!(optimizer.update_params(&[1.], &mut params).is_err());
    }
}
