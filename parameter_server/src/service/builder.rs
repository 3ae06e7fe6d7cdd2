use std::sync::Arc;

use comms::specs::{machine_learning::OptimizerSpec, server::SessionSpec};
use machine_learning::{
    Result,
    optimization::{Adam, GradientDescentWithMomentum, Optimizer, RmsProp},
    parameters::ParamLayout,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use super::{ParameterServer, Server};
use crate::{
    storage::{ParameterHandle, ParameterStore},
    synchronization::{BarrierSync, Synchronizer},
};

/// Builds `Server`s given a session specification.
pub struct ServerBuilder {
    workers: usize,
    token: CancellationToken,
}

impl ServerBuilder {
    /// Creates a new `ServerBuilder`.
    ///
    /// # Arguments
    /// * `workers` - The amount of workers taking part in every step.
    /// * `token` - Cancels the built session.
    pub fn new(workers: usize, token: CancellationToken) -> Self {
        Self { workers, token }
    }

    /// Builds a new `Server` following a spec.
    ///
    /// # Arguments
    /// * `spec` - The specification of the session.
    /// * `params` - The initial parameters, sent by the chief worker.
    ///
    /// # Returns
    /// A new Server or a `SizeMismatch` error if `params` doesn't fit `spec`.
    pub fn build<R, W>(&self, spec: &SessionSpec, params: &[f32]) -> Result<Box<dyn Server<R, W>>>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.resolve_optimizer(spec, params)
    }

    /// Resolves the `Optimizer` for this server.
    ///
    /// # Arguments
    /// * `spec` - The specification of the session.
    /// * `params` - The initial parameters.
    ///
    /// # Returns
    /// A new server.
    fn resolve_optimizer<R, W>(
        &self,
        spec: &SessionSpec,
        params: &[f32],
    ) -> Result<Box<dyn Server<R, W>>>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        match spec.optimizer {
            OptimizerSpec::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => {
                let factory = |len| Adam::new(len, learning_rate, beta1, beta2, epsilon);
                self.resolve_synchronizer(spec, params, factory)
            }
            OptimizerSpec::GradientDescentWithMomentum {
                learning_rate,
                momentum,
            } => {
                let factory = |len| GradientDescentWithMomentum::new(len, learning_rate, momentum);
                self.resolve_synchronizer(spec, params, factory)
            }
            OptimizerSpec::RmsProp {
                learning_rate,
                decay,
                momentum,
                epsilon,
            } => {
                let factory = |len| RmsProp::new(len, learning_rate, decay, momentum, epsilon);
                self.resolve_synchronizer(spec, params, factory)
            }
        }
    }

    /// Resolves the `Synchronizer` for this server, every step waits on all the workers.
    ///
    /// # Arguments
    /// * `spec` - The specification of the session.
    /// * `params` - The initial parameters.
    /// * `optimizer_factory` - A factory of optimizers.
    ///
    /// # Returns
    /// A new server.
    fn resolve_synchronizer<R, W, O, OF>(
        &self,
        spec: &SessionSpec,
        params: &[f32],
        optimizer_factory: OF,
    ) -> Result<Box<dyn Server<R, W>>>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        O: Optimizer + Send + 'static,
        OF: FnMut(usize) -> O,
    {
        let synchronizer = BarrierSync::new(self.workers);
        self.terminate_build(spec, params, optimizer_factory, synchronizer)
    }

    /// Terminates the entire build for this session and finally instanciates all the entities.
    ///
    /// # Arguments
    /// * `spec` - The specification of the session.
    /// * `params` - The initial parameters.
    /// * `optimizer_factory` - A factory of optimizers.
    /// * `synchronizer` - A resolved synchronizer.
    ///
    /// # Returns
    /// A new server.
    fn terminate_build<R, W, O, OF, S>(
        &self,
        spec: &SessionSpec,
        params: &[f32],
        optimizer_factory: OF,
        synchronizer: S,
    ) -> Result<Box<dyn Server<R, W>>>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        O: Optimizer + Send + 'static,
        OF: FnMut(usize) -> O,
        S: Synchronizer + Sync + 'static,
    {
        let layout = Arc::new(ParamLayout::new(spec.params.clone()));
        let store = ParameterStore::new(layout, params, spec.start_step, optimizer_factory)?;
        let handle = ParameterHandle::new(store);
        let pserver = ParameterServer::new(handle, synchronizer, spec.num_steps, self.token.clone());
        Ok(Box::new(pserver))
    }
}
