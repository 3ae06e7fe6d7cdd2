use std::ptr;

use machine_learning::{MlErr, Result, optimization::Optimizer};
use parking_lot::{Mutex, RwLock};

/// The accumulated gradient of a shard and the amount of workers that contributed to it.
#[derive(Debug)]
struct Accumulator {
    sum: Box<[f32]>,
    count: usize,
}

/// The values, accumulated gradient and optimizer state of a single parameter tensor.
#[derive(Debug)]
pub struct ParameterShard<O: Optimizer> {
    len: usize,
    grad: Mutex<Accumulator>,
    params: RwLock<Box<[f32]>>,
    optimizer: Mutex<O>,
}

impl<O: Optimizer> ParameterShard<O> {
    /// Creates a new `ParameterShard`.
    ///
    /// # Arguments
    /// * `params` - The initial state of the tensor.
    /// * `optimizer` - The optimization algorithm.
    pub fn new(params: Vec<f32>, optimizer: O) -> Self {
        let len = params.len();

        Self {
            len,
            grad: Mutex::new(Accumulator {
                sum: vec![0.; len].into_boxed_slice(),
                count: 0,
            }),
            params: RwLock::new(params.into_boxed_slice()),
            optimizer: Mutex::new(optimizer),
        }
    }

    /// Adds a worker's gradient to the accumulated one.
    ///
    /// # Panics
    /// If `grad` isn't the same size as this shard, callers validate it beforehand.
    pub fn accumulate(&self, grad: &[f32]) {
        assert_eq!(grad.len(), self.len);

        let mut acc = self.grad.lock();
        acc.sum.iter_mut().zip(grad).for_each(|(s, g)| *s += g);
        acc.count += 1;
    }

    /// Updates the values with the mean of the accumulated gradients and clears them.
    ///
    /// A shard nobody contributed to is left untouched, its optimizer state doesn't advance.
    ///
    /// # Returns
    /// Whether the shard was updated.
    pub fn update_params(&self) -> Result<bool> {
        let mut acc = self.grad.lock();

        if acc.count == 0 {
            return Ok(false);
        }

        let scale = 1. / acc.count as f32;
        acc.sum.iter_mut().for_each(|g| *g *= scale);

        let mut params = self.params.write();
        self.optimizer.lock().update_params(&acc.sum, &mut params)?;

        acc.sum.fill(0.);
        acc.count = 0;
        Ok(true)
    }

    /// Drops the accumulated gradients without touching the values.
    pub fn discard(&self) {
        let mut acc = self.grad.lock();
        acc.sum.fill(0.);
        acc.count = 0;
    }

    /// Copies the shard's values into the provided destination buffer.
    ///
    /// # Returns
    /// A `SizeMismatch` error if `out` isn't the same size as this shard.
    pub fn pull_params(&self, out: &mut [f32]) -> Result<()> {
        if self.len != out.len() {
            return Err(MlErr::SizeMismatch {
                a: "out",
                b: "shard",
                got: out.len(),
                expected: self.len,
            });
        }

        let params = self.params.read();

        // SAFETY: We've already checked that both slices have the same size.
        unsafe {
            ptr::copy_nonoverlapping(params.as_ptr(), out.as_mut_ptr(), out.len());
        }

        Ok(())
    }
}
