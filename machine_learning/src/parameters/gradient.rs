use super::{ParamId, ParamLayout};
use crate::{MlErr, Result};

/// The gradient of one tower for one step, one optional entry per tensor.
///
/// `None` means the tensor had no contribution, which is different from a zero gradient.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientSet {
    slots: Vec<Option<Box<[f32]>>>,
}

impl GradientSet {
    /// Creates a gradient set without any contribution.
    ///
    /// # Arguments
    /// * `len` - The amount of tensors of the model.
    pub fn empty(len: usize) -> Self {
        Self {
            slots: vec![None; len],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, id: ParamId) -> Option<&[f32]> {
        self.slots[id.index()].as_deref()
    }

    pub fn set(&mut self, id: ParamId, grad: Box<[f32]>) {
        self.slots[id.index()] = Some(grad);
    }

    /// Returns the gradient of `id`, creating a zeroed one of `len` values if it had no contribution yet.
    pub fn get_or_zeroed(&mut self, id: ParamId, len: usize) -> &mut [f32] {
        self.slots[id.index()].get_or_insert_with(|| vec![0.; len].into_boxed_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParamId, Option<&[f32]>)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, s)| (ParamId::new(i), s.as_deref()))
    }

    /// Flattens the set into presence flags and the concatenation of the present gradients.
    pub fn to_flat(&self) -> (Vec<u32>, Vec<f32>) {
        let present = self.slots.iter().map(|s| s.is_some() as u32).collect();
        let grad = self.slots.iter().flatten().flat_map(|g| g.iter().copied()).collect();
        (present, grad)
    }

    /// Rebuilds a set from the output of `to_flat`.
    ///
    /// # Arguments
    /// * `layout` - The layout of the model, gives the length of each present gradient.
    /// * `present` - One flag per tensor.
    /// * `grad` - The present gradients, one after the other.
    ///
    /// # Returns
    /// A `SizeMismatch` error if the flags or the values don't add up to `layout`.
    pub fn from_flat(layout: &ParamLayout, present: &[u32], grad: &[f32]) -> Result<Self> {
        if present.len() != layout.len() {
            return Err(MlErr::SizeMismatch {
                a: "presence flags",
                b: "layout",
                got: present.len(),
                expected: layout.len(),
            });
        }

        let expected: usize = layout
            .iter()
            .zip(present)
            .filter(|(_, flag)| **flag != 0)
            .map(|((_, spec), _)| spec.len)
            .sum();

        if grad.len() != expected {
            return Err(MlErr::SizeMismatch {
                a: "gradient",
                b: "present tensors",
                got: grad.len(),
                expected,
            });
        }

        let mut offset = 0;
        let slots = layout
            .iter()
            .zip(present)
            .map(|((_, spec), flag)| {
                (*flag != 0).then(|| {
                    let slice = &grad[offset..offset + spec.len];
                    offset += spec.len;
                    Box::from(slice)
                })
            })
            .collect();

        Ok(Self { slots })
    }
}
