mod constant;
mod error;
mod param_gen;
mod random;

use std::{cell::RefCell, rc::Rc};

use comms::specs::machine_learning::InitSpec;
use rand::{SeedableRng, rngs::StdRng};

pub use constant::ConstParamGen;
pub use error::{RandErr, Result};
pub use param_gen::ParamGen;
pub use random::RandParamGen;

use crate::parameters::ParamLayout;

/// Generates the initial values of every tensor described by `layout`.
///
/// # Arguments
/// * `layout` - The parameters to generate.
/// * `seed` - An optional seed, the same seed always yields the same values.
///
/// # Returns
/// The flat buffer of initial values or a `RandErr` if an init rule is invalid.
pub fn generate(layout: &ParamLayout, seed: Option<u64>) -> Result<Vec<f32>> {
    let rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let rng = Rc::new(RefCell::new(rng));

    let mut values = Vec::with_capacity(layout.total_len());

    for (_, spec) in layout.iter() {
        let len = spec.len;
        let sample = match spec.init {
            InitSpec::Const { value } => ConstParamGen::new(value, len).sample(len),
            InitSpec::Normal { mean, std_dev } => {
                RandParamGen::normal(rng.clone(), len, mean, std_dev)?.sample(len)
            }
            InitSpec::XavierUniform { fan_in, fan_out } => {
                RandParamGen::xavier_uniform(rng.clone(), len, fan_in, fan_out)?.sample(len)
            }
        };

        values.extend(sample.unwrap_or_default());
    }

    Ok(values)
}
