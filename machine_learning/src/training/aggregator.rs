use comms::specs::machine_learning::OptimizerSpec;

use crate::{
    MlErr, Result,
    optimization::{Optimizer, OptimizerFactory},
    parameters::{GradientSet, ModelParameters, ParamLayout},
};

/// Averages the gradients of the towers and applies them with one optimizer per tensor.
pub struct GradientAggregator {
    optimizers: Vec<Box<dyn Optimizer + Send>>,
}

impl GradientAggregator {
    /// Creates a new `GradientAggregator`.
    ///
    /// # Arguments
    /// * `spec` - The optimizer to use.
    /// * `layout` - The trainable tensors, each gets its own optimizer state.
    pub fn new(spec: &OptimizerSpec, layout: &ParamLayout) -> Self {
        let optimizers = layout
            .iter()
            .map(|(_, p)| OptimizerFactory::build(spec, p.len))
            .collect();

        Self { optimizers }
    }

    /// Averages the contributions of each tensor.
    ///
    /// A tensor is averaged only over the towers that produced a gradient for it,
    /// it stays `None` if no tower did.
    ///
    /// # Returns
    /// The averaged gradient or a `SizeMismatch` error if any gradient doesn't fit `layout`.
    pub fn average(layout: &ParamLayout, sets: &[GradientSet]) -> Result<GradientSet> {
        let mut avg = GradientSet::empty(layout.len());

        for (id, spec) in layout.iter() {
            let mut count = 0;
            let mut sum = vec![0.; spec.len];

            for set in sets {
                if set.len() != layout.len() {
                    return Err(MlErr::SizeMismatch {
                        a: "gradient set",
                        b: "layout",
                        got: set.len(),
                        expected: layout.len(),
                    });
                }

                let Some(grad) = set.get(id) else {
                    continue;
                };

                check_len(grad, spec.len)?;
                sum.iter_mut().zip(grad).for_each(|(acc, g)| *acc += g);
                count += 1;
            }

            if count > 0 {
                let scale = 1. / count as f32;
                sum.iter_mut().for_each(|g| *g *= scale);
                avg.set(id, sum.into_boxed_slice());
            }
        }

        Ok(avg)
    }

    /// Checks that every gradient of `grads` fits `layout` and holds finite values only.
    ///
    /// # Returns
    /// `SizeMismatch` or `NonFinite` naming the first offending tensor.
    pub fn validate(layout: &ParamLayout, grads: &GradientSet) -> Result<()> {
        if grads.len() != layout.len() {
            return Err(MlErr::SizeMismatch {
                a: "gradient set",
                b: "layout",
                got: grads.len(),
                expected: layout.len(),
            });
        }

        for (id, grad) in grads.iter() {
            let Some(grad) = grad else {
                continue;
            };

            let spec = layout.spec(id);
            check_len(grad, spec.len)?;

            if grad.iter().any(|g| !g.is_finite()) {
                return Err(MlErr::NonFinite {
                    param: spec.name.clone(),
                });
            }
        }

        Ok(())
    }

    /// Applies `grads` to `params`.
    ///
    /// Every gradient is validated before anything is updated, so on error neither the
    /// parameters nor the optimizers' state change. Tensors without gradient are skipped.
    ///
    /// # Returns
    /// `SizeMismatch` or `NonFinite` if a gradient can't be applied.
    pub fn apply(&mut self, grads: &GradientSet, params: &mut ModelParameters) -> Result<()> {
        if self.optimizers.len() != params.layout().len() {
            return Err(MlErr::SizeMismatch {
                a: "optimizers",
                b: "layout",
                got: self.optimizers.len(),
                expected: params.layout().len(),
            });
        }

        Self::validate(params.layout(), grads)?;

        for ((id, grad), optimizer) in grads.iter().zip(&mut self.optimizers) {
            if let Some(grad) = grad {
                optimizer.update_params(grad, params.get_mut(id))?;
            }
        }

        Ok(())
    }
}

fn check_len(grad: &[f32], expected: usize) -> Result<()> {
    if grad.len() != expected {
        return Err(MlErr::SizeMismatch {
            a: "gradient",
            b: "parameter",
            got: grad.len(),
            expected,
        });
    }

    Ok(())
}
