use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use machine_learning::{
    MlErr, Result,
    optimization::Optimizer,
    parameters::{GradientSet, ParamLayout},
};
use rayon::prelude::*;

use super::ParameterShard;

/// The primary storage of parameters and accumulated gradients, one shard per tensor.
///
/// These methods are private to the module, they become available
/// through the async interface of a `ParameterHandle`.
#[derive(Debug)]
pub struct ParameterStore<O: Optimizer> {
    layout: Arc<ParamLayout>,
    shards: Arc<[ParameterShard<O>]>,
    version: Arc<AtomicU64>,
}

impl<O: Optimizer> Clone for ParameterStore<O> {
    fn clone(&self) -> Self {
        Self {
            layout: Arc::clone(&self.layout),
            shards: Arc::clone(&self.shards),
            version: Arc::clone(&self.version),
        }
    }
}

impl<O: Optimizer> ParameterStore<O> {
    /// Creates a new `ParameterStore`.
    ///
    /// # Arguments
    /// * `layout` - The tensors to store.
    /// * `params` - The initial values, laid out as `layout` says.
    /// * `version` - The amount of updates `params` already went through.
    /// * `optimizer_factory` - An `Optimizer` factory closure, called once per tensor with its length.
    ///
    /// # Returns
    /// A `SizeMismatch` error if `params` doesn't match `layout`.
    pub fn new<F>(
        layout: Arc<ParamLayout>,
        params: &[f32],
        version: u64,
        mut optimizer_factory: F,
    ) -> Result<Self>
    where
        F: FnMut(usize) -> O,
    {
        if params.len() != layout.total_len() {
            return Err(MlErr::SizeMismatch {
                a: "params",
                b: "layout",
                got: params.len(),
                expected: layout.total_len(),
            });
        }

        let shards: Vec<_> = layout
            .iter()
            .map(|(id, spec)| {
                let values = params[layout.range(id)].to_vec();
                ParameterShard::new(values, optimizer_factory(spec.len))
            })
            .collect();

        Ok(Self {
            layout,
            shards: Arc::from(shards),
            version: Arc::new(AtomicU64::new(version)),
        })
    }

    pub fn layout(&self) -> &Arc<ParamLayout> {
        &self.layout
    }

    /// The amount of `f32` values in the storage.
    pub fn len(&self) -> usize {
        self.layout.total_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The amount of updates applied to the parameters, including those before this storage existed.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

impl<O: Optimizer + Send> ParameterStore<O> {
    /// Accumulates a worker's gradient.
    ///
    /// The whole gradient is validated before any shard is touched.
    ///
    /// # Returns
    /// `SizeMismatch` or `NonFinite` if the gradient can't be accumulated.
    pub(super) fn accumulate(&self, grads: &GradientSet) -> Result<()> {
        if grads.len() != self.layout.len() {
            return Err(MlErr::SizeMismatch {
                a: "gradient set",
                b: "layout",
                got: grads.len(),
                expected: self.layout.len(),
            });
        }

        for (id, grad) in grads.iter() {
            let Some(grad) = grad else {
                continue;
            };

            let spec = self.layout.spec(id);

            if grad.len() != spec.len {
                return Err(MlErr::SizeMismatch {
                    a: "gradient",
                    b: "parameter",
                    got: grad.len(),
                    expected: spec.len,
                });
            }

            if grad.iter().any(|g| !g.is_finite()) {
                return Err(MlErr::NonFinite {
                    param: spec.name.clone(),
                });
            }
        }

        self.shards
            .par_iter()
            .zip(grads.iter().collect::<Vec<_>>())
            .for_each(|(shard, (_, grad))| {
                if let Some(grad) = grad {
                    shard.accumulate(grad);
                }
            });

        Ok(())
    }

    /// Applies the mean of the accumulated gradients to every shard and bumps the version.
    pub(super) fn update_params(&self) -> Result<()> {
        self.shards
            .par_iter()
            .try_for_each(|shard| shard.update_params().map(|_| ()))?;

        self.version.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Drops the accumulated gradients of every shard, the version doesn't change.
    pub(super) fn discard_grads(&self) {
        self.shards.par_iter().for_each(ParameterShard::discard);
    }

    /// Gathers all the sharded parameters into a local buffer.
    ///
    /// # Returns
    /// A `SizeMismatch` error if `out` doesn't match the length of the storage.
    pub(super) fn pull_params(&self, out: &mut [f32]) -> Result<()> {
        if out.len() != self.len() {
            return Err(MlErr::SizeMismatch {
                a: "out",
                b: "store",
                got: out.len(),
                expected: self.len(),
            });
        }

        let mut chunks = Vec::with_capacity(self.shards.len());
        let mut rest = out;

        for (id, _) in self.layout.iter() {
            let len = self.layout.range(id).len();
            let (chunk, tail) = std::mem::take(&mut rest).split_at_mut(len);
            chunks.push(chunk);
            rest = tail;
        }

        self.shards
            .par_iter()
            .zip(chunks)
            .try_for_each(|(shard, chunk)| shard.pull_params(chunk))
    }
}

#[cfg(test)]
mod tests {
    use comms::specs::machine_learning::{InitSpec, ParamSpec};
    use machine_learning::parameters::ParamId;

    use super::*;

    struct AddOptimizer;

    impl Optimizer for AddOptimizer {
        fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
            params.iter_mut().zip(grad).for_each(|(p, g)| *p += g);
            Ok(())
        }
    }

    fn create_test_store() -> ParameterStore<AddOptimizer> {
        let spec = |name: &str, len| ParamSpec {
            name: name.into(),
            len,
            init: InitSpec::Const { value: 0. },
        };
        let layout = Arc::new(ParamLayout::new(vec![spec("a", 3), spec("b", 2)]));
        ParameterStore::new(layout, &[0.; 5], 7, |_| AddOptimizer).unwrap()
    }

    fn grads(a: Option<[f32; 3]>, b: Option<[f32; 2]>) -> GradientSet {
        let mut set = GradientSet::empty(2);
        if let Some(a) = a {
            set.set(ParamId::new(0), Box::new(a));
        }
        if let Some(b) = b {
            set.set(ParamId::new(1), Box::new(b));
        }
        set
    }

    #[test]
    fn averages_over_contributors() {
        let store = create_test_store();

        store.accumulate(&grads(Some([1., 1., 1.]), None)).unwrap();
        store
            .accumulate(&grads(Some([3., 3., 3.]), Some([4., 4.])))
            .unwrap();
        store.update_params().unwrap();

        let mut out = [0.; 5];
        store.pull_params(&mut out).unwrap();
        assert_eq!(out, [2., 2., 2., 4., 4.]);
        assert_eq!(store.version(), 8);
    }

    #[test]
    fn invalid_gradient_is_not_accumulated() {
        let store = create_test_store();

        let err = store
            .accumulate(&grads(Some([1., 1., 1.]), Some([f32::INFINITY, 0.])))
            .unwrap_err();
        assert!(matches!(err, MlErr::NonFinite { .. }));

        store.update_params().unwrap();
        let mut out = [1.; 5];
        store.pull_params(&mut out).unwrap();
        assert_eq!(out, [0.; 5]);
    }

    #[test]
    fn initial_values_must_fit() {
        let layout = Arc::clone(create_test_store().layout());
        assert!(ParameterStore::new(layout, &[0.; 4], 0, |_| AddOptimizer).is_err());
    }
}
