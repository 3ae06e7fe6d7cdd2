use std::{borrow::Cow, io};

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
};
use log::{debug, info, warn};
use machine_learning::{MlErr, optimization::Optimizer, parameters::GradientSet};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;

use super::{Server, invalid_data, unexpected_message_kind};
use crate::{storage::ParameterHandle, synchronization::Synchronizer};

/// The central server structure, it handles task management and io between workers.
pub struct ParameterServer<O, S>
where
    O: Optimizer,
    S: Synchronizer,
{
    tasks: JoinSet<io::Result<()>>,
    handle: ParameterHandle<O>,
    synchronizer: S,
    num_steps: u64,
    token: CancellationToken,
}

impl<O, S> ParameterServer<O, S>
where
    O: Optimizer + Send,
    S: Synchronizer,
{
    /// Creates a new `ParameterServer`.
    ///
    /// # Arguments
    /// * `handle` - The handle of the parameter storage.
    /// * `synchronizer` - The synchronization strategy of the steps.
    /// * `num_steps` - The last step of the session, inclusive.
    /// * `token` - Cancelling it stops every worker of the session.
    pub fn new(
        handle: ParameterHandle<O>,
        synchronizer: S,
        num_steps: u64,
        token: CancellationToken,
    ) -> Self {
        Self {
            tasks: JoinSet::new(),
            handle,
            synchronizer,
            num_steps,
            token,
        }
    }

    /// Waits for every worker's task to finish.
    ///
    /// # Returns
    /// The parameters the session ended with, or the first error of a task.
    pub async fn run(&mut self) -> io::Result<Vec<f32>> {
        let mut first_err = None;

        while let Some(res) = self.tasks.join_next().await {
            if let Err(e) = res.map_err(io::Error::other).and_then(|res| res) {
                self.token.cancel();
                first_err.get_or_insert(e);
            }
        }

        if let Some(e) = first_err {
            return Err(e);
        }

        let mut params = vec![0.; self.handle.len()];
        self.handle
            .pull_params(&mut params)
            .await
            .map_err(invalid_data)?;

        info!(version = self.handle.version(); "session finished");
        Ok(params)
    }
}

impl<O, S> ParameterServer<O, S>
where
    O: Optimizer + Send + 'static,
    S: Synchronizer + Sync + 'static,
{
    /// Binds a new worker to this server and spawns it's own training task.
    ///
    /// # Arguments
    /// * `worker_id` - The id the worker joined with.
    /// * `rx` - The receiving end of the communication.
    /// * `tx` - The sending end of the communication.
    pub fn spawn<R, W>(&mut self, worker_id: usize, rx: OnoReceiver<R>, tx: OnoSender<W>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let task = WorkerTask {
            worker_id,
            rx,
            tx,
            handle: self.handle.clone(),
            synchronizer: self.synchronizer.clone(),
            num_steps: self.num_steps,
            token: self.token.clone(),
        };

        let token = self.token.clone();

        self.tasks.spawn(async move {
            let res = task.run().await;

            if let Err(e) = &res {
                warn!(worker_id = worker_id; "worker task failed: {e}");
                token.cancel();
            }

            res
        });
    }
}

#[async_trait::async_trait]
impl<R, W, O, S> Server<R, W> for ParameterServer<O, S>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    O: Optimizer + Send + 'static,
    S: Synchronizer + Sync + 'static,
{
    /// Indirection call to `Self::run`.
    async fn run(&mut self) -> io::Result<Vec<f32>> {
        self.run().await
    }

    /// Indirection call to `Self::spawn`.
    fn spawn(&mut self, worker_id: usize, rx: OnoReceiver<R>, tx: OnoSender<W>) {
        self.spawn(worker_id, rx, tx)
    }
}

/// What a worker answered to a `Params` message.
enum Turn {
    Grad(GradientSet),
    Malformed(MlErr),
    Left,
    Stopping,
}

/// The server side of a single worker's connection.
struct WorkerTask<R, W, O, S>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    O: Optimizer,
{
    worker_id: usize,
    rx: OnoReceiver<R>,
    tx: OnoSender<W>,
    handle: ParameterHandle<O>,
    synchronizer: S,
    num_steps: u64,
    token: CancellationToken,
}

impl<R, W, O, S> WorkerTask<R, W, O, S>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
    O: Optimizer + Send,
    S: Synchronizer + Sync,
{
    /// Serves the worker one version of the parameters per step until the session is over.
    async fn run(mut self) -> io::Result<()> {
        let mut params = vec![0.; self.handle.len()];
        let mut rx_buf = Vec::new();

        self.handle
            .pull_params(&mut params)
            .await
            .map_err(invalid_data)?;

        loop {
            let version = self.handle.version();

            if version > self.num_steps {
                let msg = Msg::Data(Payload::Final {
                    version,
                    params: &params,
                });

                self.tx.send(&msg).await?;
                debug!(worker_id = self.worker_id, version = version; "sent final parameters");
                return self.finish().await;
            }

            let msg = Msg::Data(Payload::Params {
                version,
                params: &params,
            });
            self.tx.send(&msg).await?;

            let Some(grads) = self.next_grad(&mut rx_buf).await? else {
                return Ok(());
            };

            let stepped = tokio::select! {
                biased;
                res = self.synchronizer.step(&self.handle, &grads, &mut params) => res,
                _ = self.token.cancelled() => return self.stop().await,
            };

            if let Err(e) = stepped {
                return self.reject(e).await;
            }
        }
    }

    /// Waits for the worker's gradient of the current step.
    ///
    /// The pending receive is never dropped halfway through a frame, if the session is
    /// cancelled meanwhile the worker is told to stop and its message is still read.
    ///
    /// # Returns
    /// `None` once the worker left the session.
    async fn next_grad(&mut self, rx_buf: &mut Vec<u32>) -> io::Result<Option<GradientSet>> {
        let mut stopped = false;

        let turn = {
            let recv = self.rx.recv_into(rx_buf);
            tokio::pin!(recv);

            let msg = tokio::select! {
                msg = &mut recv => msg?,
                _ = self.token.cancelled() => {
                    self.tx.send(&Msg::Control(Command::Stop)).await?;
                    stopped = true;
                    recv.await?
                }
            };

            match msg {
                Msg::Data(Payload::Grad {
                    loss,
                    present,
                    grad,
                }) if !stopped => {
                    debug!(worker_id = self.worker_id, loss = loss; "received gradient");
                    match GradientSet::from_flat(self.handle.layout(), present, grad) {
                        Ok(grads) => Turn::Grad(grads),
                        Err(e) => Turn::Malformed(e),
                    }
                }
                Msg::Control(Command::Disconnect) => Turn::Left,
                _ if stopped => Turn::Stopping,
                msg => return unexpected_message_kind(msg),
            }
        };

        match turn {
            Turn::Grad(grads) => Ok(Some(grads)),
            Turn::Malformed(e) => self.reject(e).await.map(|_| None),
            Turn::Left => {
                if !stopped {
                    info!(worker_id = self.worker_id; "worker disconnected, stopping the session");
                    self.token.cancel();
                }

                self.acknowledge().await?;
                Ok(None)
            }
            Turn::Stopping => {
                self.finish().await?;
                Ok(None)
            }
        }
    }

    /// Tells the worker the session was cancelled and waits for it to leave.
    async fn stop(&mut self) -> io::Result<()> {
        debug!(worker_id = self.worker_id; "stopping worker");
        self.tx.send(&Msg::Control(Command::Stop)).await?;
        self.finish().await
    }

    /// Tells the worker why its step failed and waits for it to leave.
    ///
    /// # Returns
    /// `err` as the task's error, the session ends with it.
    async fn reject(&mut self, err: MlErr) -> io::Result<()> {
        debug!(worker_id = self.worker_id; "step failed: {err}");
        let reason = err.to_string();

        self.tx.send(&Msg::Err(Cow::Borrowed(&reason))).await?;
        self.finish().await?;
        Err(invalid_data(err))
    }

    /// Discards whatever the worker still sends until it disconnects.
    async fn finish(&mut self) -> io::Result<()> {
        let mut buf = Vec::new();

        loop {
            match self.rx.recv_into(&mut buf).await? {
                Msg::Control(Command::Disconnect) => break,
                msg => debug!(kind = msg.kind(); "ignoring message of a leaving worker"),
            }
        }

        self.acknowledge().await
    }

    async fn acknowledge(&mut self) -> io::Result<()> {
        self.tx.send(&Msg::Control(Command::Disconnect)).await
    }
}
