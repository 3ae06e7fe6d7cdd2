mod cli;

use std::{io, process::ExitCode, sync::Arc, time::Duration};

use chrono::Local;
use clap::Parser;
use log::{error, info, warn};
use machine_learning::{
    arch::{WaveNetBuilder, WaveNetParams},
    dataset::WavDecoder,
};
use parameter_server::Session;
use tokio::{
    net::{TcpListener, TcpStream},
    signal, time,
};
use tokio_util::sync::CancellationToken;
use worker::{
    DistributedWorker, PsClient, Role, RunSummary, TrainErr, TrainingConfig, TrainingLoop,
    bootstrap, start_pipeline,
};

use crate::cli::Args;

const CONNECT_ATTEMPTS: usize = 30;
const CONNECT_DELAY: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let options = Args::parse().into_options();
    let started = Local::now().naive_local();

    let config = match TrainingConfig::from_options(options, started) {
        Ok(config) => config,
        Err(e) => return fail(e),
    };

    let token = CancellationToken::new();

    tokio::spawn({
        let token = token.clone();

        async move {
            if signal::ctrl_c().await.is_ok() {
                info!("received SIGINT, stopping after the current step");
                token.cancel();
            }
        }
    });

    match run(&config, token).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(e),
    }
}

fn fail(e: TrainErr) -> ExitCode {
    if e.is_config() {
        eprintln!("Some arguments are wrong:");
        eprintln!("{e}");
    } else {
        error!("{e}");
    }

    ExitCode::FAILURE
}

async fn run(config: &TrainingConfig, token: CancellationToken) -> worker::Result<()> {
    if let Role::ParameterServer { addr, num_workers } = &config.role {
        return Ok(serve(addr, *num_workers, token).await?);
    }

    let hparams = WaveNetParams::load(&config.wavenet_params)?;
    let sample_rate = hparams.sample_rate;
    let builder = WaveNetBuilder::new(hparams, config.l2)?;

    let ctx = bootstrap(config, &builder)?;

    let summary = match &config.role {
        Role::Worker { ps_addr, .. } => {
            let Some(stream) = connect(ps_addr, &token).await? else {
                return Ok(());
            };

            let pipeline =
                start_pipeline(config, &builder, sample_rate, Arc::new(WavDecoder), &token)?;

            let (rx, tx) = stream.into_split();
            let (rx, tx) = comms::channel(rx, tx);
            let mut client = PsClient::new(rx, tx);

            DistributedWorker::new(config, ctx, pipeline, token)
                .run(&mut client)
                .await?
        }
        _ => {
            let pipeline =
                start_pipeline(config, &builder, sample_rate, Arc::new(WavDecoder), &token)?;

            TrainingLoop::new(config, ctx, pipeline, token).run().await?
        }
    };

    report(&summary);
    Ok(())
}

/// Serves one session after the other until interrupted.
///
/// Each session gets its own child token, a worker leaving ends its session but not
/// the server.
async fn serve(addr: &str, num_workers: usize, token: CancellationToken) -> io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("listening at {addr}");

    loop {
        let mut conns = Vec::with_capacity(num_workers);

        while conns.len() < num_workers {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = token.cancelled() => return Ok(()),
            };

            info!("worker connected from {peer}");
            let (rx, tx) = stream.into_split();
            conns.push(comms::channel(rx, tx));
        }

        let session = match Session::handshake(conns).await {
            Ok(session) => session,
            Err(e) => {
                warn!("rejected session: {e}");
                continue;
            }
        };

        let num_steps = session.spec().num_steps;

        match session.run(token.child_token()).await {
            Ok(params) => info!(num_steps = num_steps, params = params.len(); "session finished"),
            Err(e) => warn!("session failed: {e}"),
        }
    }
}

/// Connects to the parameter server, retrying while it isn't up yet.
///
/// # Returns
/// `None` if the run was interrupted before the connection was made.
async fn connect(addr: &str, token: &CancellationToken) -> io::Result<Option<TcpStream>> {
    for attempt in 1.. {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                info!("connected to the parameter server at {addr}");
                return Ok(Some(stream));
            }
            Err(e) if attempt < CONNECT_ATTEMPTS => {
                warn!(attempt = attempt; "couldn't reach the parameter server at {addr}: {e}");
            }
            Err(e) => return Err(e),
        }

        tokio::select! {
            _ = time::sleep(CONNECT_DELAY) => {}
            _ = token.cancelled() => return Ok(None),
        }
    }

    Ok(None)
}

fn report(summary: &RunSummary) {
    match summary.last_step {
        Some(last_step) => info!(
            first_step = summary.first_step,
            last_step = last_step;
            "training finished"
        ),
        None => info!(first_step = summary.first_step; "no step was trained"),
    }
}
