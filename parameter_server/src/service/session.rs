use std::io;

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
    specs::server::SessionSpec,
};
use log::info;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use super::{Server, ServerBuilder, invalid_data, unexpected_message_kind};

/// A training session after every worker joined and the chief shared the initial parameters.
pub struct Session<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    spec: SessionSpec,
    params: Vec<f32>,
    workers: Vec<(usize, OnoReceiver<R>, OnoSender<W>)>,
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Waits for every worker to join and for the chief to initialize the session.
    ///
    /// Every connection must first send a `Join`, the ids have to be `0..n`. Then the chief
    /// (worker `0`) sends the session's `Init` followed by the starting parameters.
    ///
    /// # Arguments
    /// * `conns` - One connection per worker, in any order.
    ///
    /// # Returns
    /// The initialized session or an `InvalidData` error if any peer broke the handshake.
    pub async fn handshake(conns: Vec<(OnoReceiver<R>, OnoSender<W>)>) -> io::Result<Self> {
        if conns.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "a session needs at least one worker",
            ));
        }

        let mut buf = Vec::new();
        let mut workers = Vec::with_capacity(conns.len());

        for (mut rx, tx) in conns {
            let worker_id = match rx.recv_into(&mut buf).await? {
                Msg::Control(Command::Join { worker_id }) => worker_id,
                msg => return unexpected_message_kind(msg),
            };

            info!(worker_id = worker_id; "worker joined");
            workers.push((worker_id, rx, tx));
        }

        workers.sort_by_key(|(id, ..)| *id);

        if workers.iter().enumerate().any(|(i, (id, ..))| i != *id) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("worker ids must go from 0 to {}", workers.len() - 1),
            ));
        }

        let (_, chief, _) = &mut workers[0];

        let spec = match chief.recv_into(&mut buf).await? {
            Msg::Control(Command::Init(spec)) => spec,
            msg => return unexpected_message_kind(msg),
        };

        let params = match chief.recv_into(&mut buf).await? {
            Msg::Data(Payload::Params { version, params })
                if version == spec.start_step && params.len() == spec.total_len() =>
            {
                params.to_vec()
            }
            Msg::Data(Payload::Params { version, params }) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "expected {} parameters at version {}, got {} at version {version}",
                        spec.total_len(),
                        spec.start_step,
                        params.len()
                    ),
                ));
            }
            msg => return unexpected_message_kind(msg),
        };

        info!(
            workers = workers.len(),
            start_step = spec.start_step,
            num_steps = spec.num_steps,
            params = params.len();
            "session initialized by the chief"
        );

        Ok(Self {
            spec,
            params,
            workers,
        })
    }

    pub fn spec(&self) -> &SessionSpec {
        &self.spec
    }

    /// Runs the session until the last step or until `token` is cancelled.
    ///
    /// # Returns
    /// The parameters the session ended with.
    pub async fn run(self, token: CancellationToken) -> io::Result<Vec<f32>> {
        let builder = ServerBuilder::new(self.workers.len(), token);
        let mut server: Box<dyn Server<R, W>> = builder
            .build(&self.spec, &self.params)
            .map_err(invalid_data)?;

        for (worker_id, rx, tx) in self.workers {
            server.spawn(worker_id, rx, tx);
        }

        server.run().await
    }
}
