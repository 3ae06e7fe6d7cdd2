use std::ops::Range;

use comms::specs::machine_learning::ParamSpec;

/// The index of a trainable tensor inside a `ParamLayout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(usize);

impl ParamId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

/// The ordered description of every trainable tensor of a model.
///
/// The tensors are laid out one after the other inside a single flat buffer,
/// in the order they were given.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamLayout {
    specs: Vec<ParamSpec>,
    offsets: Vec<usize>,
    total: usize,
}

impl ParamLayout {
    /// Creates a new `ParamLayout`.
    ///
    /// # Arguments
    /// * `specs` - The tensors of the model, in order.
    pub fn new(specs: Vec<ParamSpec>) -> Self {
        let mut offsets = Vec::with_capacity(specs.len());
        let mut total = 0;

        for spec in &specs {
            offsets.push(total);
            total += spec.len;
        }

        Self {
            specs,
            offsets,
            total,
        }
    }

    /// The amount of tensors.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// The amount of `f32` values across all tensors.
    pub fn total_len(&self) -> usize {
        self.total
    }

    /// The region of the flat buffer where the tensor `id` lives.
    ///
    /// # Panics
    /// If `id` doesn't belong to this layout.
    pub fn range(&self, id: ParamId) -> Range<usize> {
        let start = self.offsets[id.0];
        start..start + self.specs[id.0].len
    }

    pub fn spec(&self, id: ParamId) -> &ParamSpec {
        &self.specs[id.0]
    }

    pub fn specs(&self) -> &[ParamSpec] {
        &self.specs
    }

    /// Looks up a tensor by name.
    pub fn find(&self, name: &str) -> Option<ParamId> {
        self.specs.iter().position(|s| s.name == name).map(ParamId)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParamId, &ParamSpec)> {
        self.specs.iter().enumerate().map(|(i, s)| (ParamId(i), s))
    }
}

#[cfg(test)]
mod tests {
    use comms::specs::machine_learning::InitSpec;

    use super::*;

    fn spec(name: &str, len: usize) -> ParamSpec {
        ParamSpec {
            name: name.into(),
            len,
            init: InitSpec::Const { value: 0. },
        }
    }

    #[test]
    fn offsets_follow_order() {
        let layout = ParamLayout::new(vec![spec("a", 3), spec("b", 0), spec("c", 2)]);

        assert_eq!(layout.total_len(), 5);
        assert_eq!(layout.range(ParamId::new(0)), 0..3);
        assert_eq!(layout.range(ParamId::new(1)), 3..3);
        assert_eq!(layout.range(ParamId::new(2)), 3..5);
        assert_eq!(layout.find("c"), Some(ParamId::new(2)));
        assert_eq!(layout.find("d"), None);
    }
}
