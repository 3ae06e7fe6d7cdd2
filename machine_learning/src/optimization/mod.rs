mod adam;
mod factory;
mod gradient_descent_with_momentum;
mod optimizer;
mod rms_prop;

pub use adam::Adam;
pub use factory::OptimizerFactory;
pub use gradient_descent_with_momentum::GradientDescentWithMomentum;
pub use optimizer::Optimizer;
pub use rms_prop::RmsProp;

use crate::{MlErr, Result};

/// Checks that a gradient and its parameters have the same length.
fn check_len(grad: &[f32], params: &[f32]) -> Result<()> {
    if grad.len() != params.len() {
        return Err(MlErr::SizeMismatch {
            a: "grad",
            b: "params",
            got: grad.len(),
            expected: params.len(),
        });
    }

    Ok(())
}
