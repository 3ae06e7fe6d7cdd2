use std::sync::Arc;

use log::{error, info};
use machine_learning::{
    MlErr,
    arch::NetworkBuilder,
    checkpoint::CheckpointManager,
    dataset::{AudioDecoder, AudioPipeline, ReaderConfig},
    parameters::ModelParameters,
    training::{GradientAggregator, TowerBuilder},
};
use tokio_util::sync::CancellationToken;

use crate::{
    LoopState, Result, TrainErr, TrainingContext,
    config::{RestorePolicy, TrainingConfig},
    progress::SummaryWriter,
};

/// Builds everything a run needs besides its input.
///
/// The towers are built and the parameters initialized first, then the restore policy
/// decides which step the run starts at. Only the chief restores, every other worker
/// gets its parameters from the parameter server.
///
/// # Arguments
/// * `config` - The run configuration.
/// * `builder` - Builds one network replica per tower.
///
/// # Returns
/// The context of the run, or a `Config` error if the devices aren't available, or a
/// `Restore` error if a checkpoint exists but can't be loaded.
pub fn bootstrap(config: &TrainingConfig, builder: &dyn NetworkBuilder) -> Result<TrainingContext> {
    info!("training loop {}", LoopState::Initializing);

    let towers = TowerBuilder::build(builder, config.num_devices)?;
    let layout = builder.layout();

    let mut params = ModelParameters::init(Arc::clone(&layout), config.seed)?;
    let checkpoints = CheckpointManager::new(&config.logdir);

    let start_step = if config.role.is_chief() {
        restore(config, &checkpoints, &mut params)?
    } else {
        0
    };

    info!(
        towers = towers.len(),
        params = layout.total_len(),
        start_step = start_step;
        "training context ready"
    );

    Ok(TrainingContext {
        params,
        towers,
        aggregator: GradientAggregator::new(&config.optimizer, &layout),
        checkpoints,
        summaries: SummaryWriter::new(&config.logdir),
        start_step,
    })
}

/// Applies the restore policy of `config` to `params`.
///
/// # Returns
/// The first step of the run.
fn restore(
    config: &TrainingConfig,
    checkpoints: &CheckpointManager,
    params: &mut ModelParameters,
) -> Result<u64> {
    let restored = match &config.restore {
        RestorePolicy::Resume => checkpoints.load(params).map(|step| step.map(|s| s + 1)),
        RestorePolicy::Fresh => Ok(None),
        RestorePolicy::RestoreInto { from } => {
            // Restored parameters written to a new logdir count as a new training.
            CheckpointManager::new(from).load(params).map(|_| None)
        }
    };

    match restored {
        Ok(start_step) => Ok(start_step.unwrap_or(0)),
        Err(e @ MlErr::Restore { .. }) => {
            error!(
                "Something went wrong while restoring checkpoint. We will terminate \
                 training to avoid accidentally overwriting the previous model."
            );
            Err(TrainErr::Restore(e))
        }
        Err(e) => Err(e.into()),
    }
}

/// Starts the audio ingestion of a run.
///
/// # Arguments
/// * `config` - The run configuration.
/// * `builder` - The network builder, gives the receptive field of the segments.
/// * `sample_rate` - The rate the corpus is resampled to.
/// * `decoder` - The audio decoder.
/// * `token` - Cancelling it stops the producers.
pub fn start_pipeline(
    config: &TrainingConfig,
    builder: &dyn NetworkBuilder,
    sample_rate: u32,
    decoder: Arc<dyn AudioDecoder>,
    token: &CancellationToken,
) -> Result<AudioPipeline> {
    let reader = ReaderConfig {
        data_dir: config.data_dir.clone(),
        sample_rate,
        receptive_field: builder.receptive_field(),
        sample_size: config.sample_size,
        silence_threshold: config.silence_threshold,
        random_crop: config.random_crop,
        threads: config.reader_threads,
        capacity: config.queue_size,
        seed: config.seed,
    };

    Ok(AudioPipeline::spawn(reader, decoder, token)?)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::NaiveDate;
    use machine_learning::arch::{WaveNetBuilder, WaveNetParams};

    use super::*;
    use crate::config::Options;

    fn builder() -> WaveNetBuilder {
        let hparams = WaveNetParams {
            dilations: vec![1, 2],
            filter_width: 2,
            residual_channels: 2,
            dilation_channels: 2,
            skip_channels: 2,
            quantization_channels: 256,
            use_biases: true,
            scalar_input: false,
            initial_filter_width: 32,
            sample_rate: 16000,
        };

        WaveNetBuilder::new(hparams, None).unwrap()
    }

    fn config(options: Options) -> TrainingConfig {
        let started = NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();

        TrainingConfig::from_options(options, started).unwrap()
    }

    #[test]
    fn resume_continues_after_the_latest_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let builder = builder();

        let saved = ModelParameters::init(builder.layout(), Some(9)).unwrap();
        CheckpointManager::new(dir.path()).save(&saved, 7).unwrap();

        let config = config(Options {
            logdir: Some(dir.path().to_path_buf()),
            seed: Some(1),
            ..Default::default()
        });

        let ctx = bootstrap(&config, &builder).unwrap();
        assert_eq!(ctx.start_step, 8);
        assert_eq!(ctx.restored_step(), Some(7));
        assert_eq!(ctx.params.as_slice(), saved.as_slice());
    }

    #[test]
    fn restore_into_resets_the_step() {
        let dir = tempfile::tempdir().unwrap();
        let builder = builder();

        let old = dir.path().join("old");
        let saved = ModelParameters::init(builder.layout(), Some(9)).unwrap();
        CheckpointManager::new(&old).save(&saved, 40).unwrap();

        let config = config(Options {
            logdir_root: Some(dir.path().join("root")),
            restore_from: Some(old),
            ..Default::default()
        });

        let ctx = bootstrap(&config, &builder).unwrap();
        assert_eq!(ctx.start_step, 0);
        assert_eq!(ctx.restored_step(), None);
        assert_eq!(ctx.params.as_slice(), saved.as_slice());
    }

    #[test]
    fn corrupt_checkpoint_aborts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("model.ckpt-3.safetensors"), b"garbage").unwrap();

        let config = config(Options {
            logdir: Some(dir.path().to_path_buf()),
            ..Default::default()
        });

        let err = bootstrap(&config, &builder()).err().unwrap();
        assert!(matches!(err, TrainErr::Restore(_)));
    }

    #[test]
    fn too_many_devices_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();

        let config = config(Options {
            logdir: Some(dir.path().to_path_buf()),
            num_devices: usize::MAX,
            ..Default::default()
        });

        assert!(bootstrap(&config, &builder()).err().unwrap().is_config());
    }
}
