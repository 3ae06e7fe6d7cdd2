use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
    specs::server::SessionSpec,
};
use log::debug;
use machine_learning::parameters::GradientSet;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{Result, TrainErr};

/// What the parameter server sent after a gradient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// The parameters to compute step `version` with.
    Params(u64),
    /// The parameters after the last step, `version` is the amount of steps applied.
    Final(u64),
    /// The session was cancelled by another worker.
    Stop,
}

/// Parameter Server client wrapper.
///
/// Contract:
/// - join the session with `Command::Join`, the chief then sends `Init` and the parameters
/// - receive `Params` or `Final` into a persistent buffer, or `Stop`
/// - send gradients as `Payload::Grad`
/// - leave with `Command::Disconnect` and wait for the server's own `Disconnect`
pub struct PsClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    rx: OnoReceiver<R>,
    tx: OnoSender<W>,
    rx_buf: Vec<u32>,
}

impl<R, W> PsClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(rx: OnoReceiver<R>, tx: OnoSender<W>) -> Self {
        Self {
            rx,
            tx,
            rx_buf: Vec::new(),
        }
    }

    /// Joins the session as worker `worker_id`.
    pub async fn join(&mut self, worker_id: usize) -> Result<()> {
        let msg = Msg::Control(Command::Join { worker_id });
        self.tx.send(&msg).await?;
        Ok(())
    }

    /// Initializes the session, only the chief does this.
    ///
    /// # Arguments
    /// * `spec` - The session to run.
    /// * `params` - The starting parameters, laid out as `spec.params`.
    pub async fn init(&mut self, spec: SessionSpec, params: &[f32]) -> Result<()> {
        let version = spec.start_step;
        self.tx.send(&Msg::Control(Command::Init(spec))).await?;

        let msg = Msg::Data(Payload::Params { version, params });
        self.tx.send(&msg).await?;
        Ok(())
    }

    /// Receives the next parameters and copies them into `dst`.
    ///
    /// # Arguments
    /// * `dst` - The persistent parameter buffer.
    /// * `step` - The last step computed, for diagnostics.
    ///
    /// # Returns
    /// A `Rejected` error if the server refused the last gradient.
    pub async fn recv_params_into(&mut self, dst: &mut [f32], step: Option<u64>) -> Result<Received> {
        let (received, params) = match self.rx.recv_into(&mut self.rx_buf).await? {
            Msg::Data(Payload::Params { version, params }) => (Received::Params(version), params),
            Msg::Data(Payload::Final { version, params }) => (Received::Final(version), params),
            Msg::Control(Command::Stop) => return Ok(Received::Stop),
            Msg::Err(reason) => return Err(TrainErr::Rejected(reason.into_owned())),
            msg => {
                return Err(TrainErr::UnexpectedMessage {
                    step,
                    got: msg.kind(),
                });
            }
        };

        if params.len() != dst.len() {
            return Err(TrainErr::ParamsLengthMismatch {
                got: params.len(),
                expected: dst.len(),
            });
        }

        dst.copy_from_slice(params);
        Ok(received)
    }

    /// Sends the gradient of a step.
    pub async fn send_grad(&mut self, loss: f32, grads: &GradientSet) -> Result<()> {
        let (present, grad) = grads.to_flat();

        let msg = Msg::Data(Payload::Grad {
            loss,
            present: &present,
            grad: &grad,
        });

        self.tx.send(&msg).await?;
        Ok(())
    }

    /// Leaves the session, whatever the server still had in flight is discarded.
    pub async fn leave(&mut self) -> Result<()> {
        self.tx.send(&Msg::Control(Command::Disconnect)).await?;

        loop {
            match self.rx.recv_into(&mut self.rx_buf).await? {
                Msg::Control(Command::Disconnect) => break,
                msg => debug!(kind = msg.kind(); "discarding message while leaving"),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use machine_learning::parameters::ParamId;
    use tokio::io;

    use super::*;

    #[tokio::test]
    async fn params_then_grad_roundtrip() {
        const BUF_SIZE: usize = 4096;

        let (sv_stream, wk_stream) = io::duplex(BUF_SIZE);

        let (sv_rx, sv_tx) = io::split(sv_stream);
        let (mut sv_rx, mut sv_tx) = comms::channel(sv_rx, sv_tx);

        let (wk_rx, wk_tx) = io::split(wk_stream);
        let (wk_rx, wk_tx) = comms::channel(wk_rx, wk_tx);
        let mut client = PsClient::new(wk_rx, wk_tx);

        let params = [1.0_f32, 2.0, 3.0];
        let msg = Msg::Data(Payload::Params {
            version: 4,
            params: &params,
        });
        sv_tx.send(&msg).await.unwrap();

        let mut local = [0.0_f32; 3];
        let received = client.recv_params_into(&mut local, None).await.unwrap();
        assert_eq!(received, Received::Params(4));
        assert_eq!(local, params);

        let mut grads = GradientSet::empty(2);
        grads.set(ParamId::new(1), Box::new([0.5, -0.5]));
        client.send_grad(0.25, &grads).await.unwrap();

        let mut buf = Vec::new();
        match sv_rx.recv_into(&mut buf).await.unwrap() {
            Msg::Data(Payload::Grad {
                loss,
                present,
                grad,
            }) => {
                assert_eq!(loss, 0.25);
                assert_eq!(present, [0, 1]);
                assert_eq!(grad, [0.5, -0.5]);
            }
            other => panic!("unexpected msg: {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_error_carries_its_reason() {
        let (sv_stream, wk_stream) = io::duplex(4096);

        let (sv_rx, sv_tx) = io::split(sv_stream);
        let (_, mut sv_tx) = comms::channel(sv_rx, sv_tx);

        let (wk_rx, wk_tx) = io::split(wk_stream);
        let (wk_rx, wk_tx) = comms::channel(wk_rx, wk_tx);
        let mut client = PsClient::new(wk_rx, wk_tx);

        let msg = Msg::Err("The step was aborted".into());
        sv_tx.send(&msg).await.unwrap();

        let mut local = [0.0_f32; 2];
        let err = client.recv_params_into(&mut local, Some(3)).await.unwrap_err();
        assert!(matches!(err, TrainErr::Rejected(reason) if reason == "The step was aborted"));
        assert_eq!(local, [0.0; 2]);
    }

    #[tokio::test]
    async fn wrong_length_is_rejected() {
        let (sv_stream, wk_stream) = io::duplex(4096);

        let (sv_rx, sv_tx) = io::split(sv_stream);
        let (_, mut sv_tx) = comms::channel(sv_rx, sv_tx);

        let (wk_rx, wk_tx) = io::split(wk_stream);
        let (wk_rx, wk_tx) = comms::channel(wk_rx, wk_tx);
        let mut client = PsClient::new(wk_rx, wk_tx);

        let msg = Msg::Data(Payload::Final {
            version: 1,
            params: &[1.0, 2.0],
        });
        sv_tx.send(&msg).await.unwrap();

        let mut local = [0.0_f32; 3];
        let err = client.recv_params_into(&mut local, Some(0)).await.unwrap_err();
        assert!(matches!(
            err,
            TrainErr::ParamsLengthMismatch {
                got: 2,
                expected: 3
            }
        ));
    }
}
