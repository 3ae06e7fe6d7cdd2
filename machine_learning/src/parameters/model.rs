use std::sync::Arc;

use super::{ParamId, ParamLayout};
use crate::{MlErr, Result, initialization};

/// The trainable state of a model, every tensor of `layout` stored in one flat buffer.
///
/// Towers only ever borrow it, there's a single copy per process.
#[derive(Debug, Clone)]
pub struct ModelParameters {
    layout: Arc<ParamLayout>,
    values: Box<[f32]>,
}

impl ModelParameters {
    /// Creates the parameters with every value set to zero.
    pub fn zeros(layout: Arc<ParamLayout>) -> Self {
        let values = vec![0.; layout.total_len()].into_boxed_slice();
        Self { layout, values }
    }

    /// Creates the parameters following each tensor's init rule.
    ///
    /// # Arguments
    /// * `layout` - The tensors to create.
    /// * `seed` - An optional seed for the random init rules.
    pub fn init(layout: Arc<ParamLayout>, seed: Option<u64>) -> Result<Self> {
        let values = initialization::generate(&layout, seed)?;
        Self::from_values(layout, values)
    }

    /// Wraps an already existing flat buffer.
    ///
    /// # Returns
    /// A `SizeMismatch` error if `values` doesn't match the length of the layout.
    pub fn from_values(layout: Arc<ParamLayout>, values: Vec<f32>) -> Result<Self> {
        if values.len() != layout.total_len() {
            return Err(MlErr::SizeMismatch {
                a: "values",
                b: "layout",
                got: values.len(),
                expected: layout.total_len(),
            });
        }

        Ok(Self {
            layout,
            values: values.into_boxed_slice(),
        })
    }

    pub fn layout(&self) -> &Arc<ParamLayout> {
        &self.layout
    }

    pub fn get(&self, id: ParamId) -> &[f32] {
        &self.values[self.layout.range(id)]
    }

    pub fn get_mut(&mut self, id: ParamId) -> &mut [f32] {
        let range = self.layout.range(id);
        &mut self.values[range]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.values
    }

    /// Overwrites every value with `values`.
    ///
    /// # Returns
    /// A `SizeMismatch` error if the lengths are different, nothing is written in that case.
    pub fn copy_from(&mut self, values: &[f32]) -> Result<()> {
        if values.len() != self.values.len() {
            return Err(MlErr::SizeMismatch {
                a: "values",
                b: "parameters",
                got: values.len(),
                expected: self.values.len(),
            });
        }

        self.values.copy_from_slice(values);
        Ok(())
    }
}
