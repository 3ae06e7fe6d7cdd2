mod common;

use std::sync::{Arc, atomic::Ordering};

use common::{FixedSource, builder, checkpoint_steps, config, recorded_steps};
use hound::{SampleFormat, WavSpec, WavWriter};
use machine_learning::{
    MlErr, arch::NetworkBuilder, checkpoint::CheckpointManager, dataset::WavDecoder,
    parameters::ModelParameters,
};
use tokio_util::sync::CancellationToken;
use worker::{LoopState, Options, RunSummary, TrainErr, TrainingLoop, bootstrap, start_pipeline};

fn options(logdir: &std::path::Path, num_steps: u64, checkpoint_every: u64) -> Options {
    Options {
        logdir: Some(logdir.to_path_buf()),
        num_steps,
        checkpoint_every,
        seed: Some(1),
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn checkpoints_periodically_and_on_exit() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(options(dir.path(), 3, 2));
    let builder = builder();

    let ctx = bootstrap(&config, &builder).unwrap();
    let source = FixedSource::new();
    let stopped = source.stopped();

    let mut training = TrainingLoop::new(&config, ctx, source, CancellationToken::new());
    let summary = training.run().await.unwrap();

    assert_eq!(
        summary,
        RunSummary {
            first_step: 0,
            last_step: Some(3),
            last_saved: Some(3),
        }
    );
    assert_eq!(training.state(), LoopState::Stopped);
    assert!(stopped.load(Ordering::SeqCst));

    assert_eq!(checkpoint_steps(dir.path()), [2, 3]);
    assert_eq!(recorded_steps(dir.path()), [0, 1, 2, 3]);

    let mut restored = ModelParameters::zeros(builder.layout());
    let step = CheckpointManager::new(dir.path())
        .load(&mut restored)
        .unwrap();
    assert_eq!(step, Some(3));
    assert_eq!(restored.as_slice(), training.context().params.as_slice());
}

#[tokio::test(flavor = "multi_thread")]
async fn interrupt_before_the_first_step_saves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(options(dir.path(), 10, 2));

    let ctx = bootstrap(&config, &builder()).unwrap();
    let source = FixedSource::new();
    let stopped = source.stopped();

    let token = CancellationToken::new();
    token.cancel();

    let mut training = TrainingLoop::new(&config, ctx, source, token);
    let summary = training.run().await.unwrap();

    assert_eq!(
        summary,
        RunSummary {
            first_step: 0,
            last_step: None,
            last_saved: None,
        }
    );
    assert!(stopped.load(Ordering::SeqCst));
    assert!(checkpoint_steps(dir.path()).is_empty());
    assert!(recorded_steps(dir.path()).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn interrupt_saves_the_last_executed_step() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(options(dir.path(), 100, 50));

    let ctx = bootstrap(&config, &builder()).unwrap();
    let token = CancellationToken::new();
    let source = FixedSource::new().cancel_after(2, token.clone());

    let mut training = TrainingLoop::new(&config, ctx, source, token);
    let summary = training.run().await.unwrap();

    assert_eq!(summary.last_step, Some(1));
    assert_eq!(summary.last_saved, Some(1));
    assert_eq!(checkpoint_steps(dir.path()), [1]);
    assert_eq!(recorded_steps(dir.path()), [0, 1]);
}

#[tokio::test(flavor = "multi_thread")]
async fn resumed_run_continues_after_the_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let builder = builder();

    let saved = ModelParameters::init(builder.layout(), Some(9)).unwrap();
    CheckpointManager::new(dir.path()).save(&saved, 4).unwrap();

    let config = config(options(dir.path(), 6, 50));
    let ctx = bootstrap(&config, &builder).unwrap();
    assert_eq!(ctx.params.as_slice(), saved.as_slice());

    let mut training = TrainingLoop::new(&config, ctx, FixedSource::new(), CancellationToken::new());
    let summary = training.run().await.unwrap();

    assert_eq!(
        summary,
        RunSummary {
            first_step: 5,
            last_step: Some(6),
            last_saved: Some(6),
        }
    );
    assert_eq!(checkpoint_steps(dir.path()), [4, 6]);
    assert_eq!(recorded_steps(dir.path()), [5, 6]);
}

#[tokio::test(flavor = "multi_thread")]
async fn finished_run_does_not_train_again() {
    let dir = tempfile::tempdir().unwrap();
    let builder = builder();

    let saved = ModelParameters::init(builder.layout(), Some(9)).unwrap();
    CheckpointManager::new(dir.path()).save(&saved, 6).unwrap();

    let config = config(options(dir.path(), 6, 2));
    let ctx = bootstrap(&config, &builder).unwrap();

    let mut training = TrainingLoop::new(&config, ctx, FixedSource::new(), CancellationToken::new());
    let summary = training.run().await.unwrap();

    assert_eq!(summary.first_step, 7);
    assert_eq!(summary.last_step, None);
    assert_eq!(summary.last_saved, Some(6));
    assert_eq!(checkpoint_steps(dir.path()), [6]);
}

#[tokio::test(flavor = "multi_thread")]
async fn closed_input_reports_the_producer_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(options(dir.path(), 10, 50));

    let ctx = bootstrap(&config, &builder()).unwrap();
    let source = FixedSource::new().close_after(1);
    let stopped = source.stopped();

    let mut training = TrainingLoop::new(&config, ctx, source, CancellationToken::new());
    let err = training.run().await.unwrap_err();

    assert!(matches!(err, TrainErr::Runtime(MlErr::Audio { .. })));
    assert!(stopped.load(Ordering::SeqCst));
    assert_eq!(training.state(), LoopState::Stopped);
    assert_eq!(checkpoint_steps(dir.path()), [0]);
}

#[tokio::test(flavor = "multi_thread")]
async fn trains_over_a_wav_corpus() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = dir.path().join("corpus");
    std::fs::create_dir_all(corpus.join("p225")).unwrap();

    let spec = WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    for (name, freq) in [("p225/a.wav", 0.05_f32), ("b.WAV", 0.2)] {
        let mut writer = WavWriter::create(corpus.join(name), spec).unwrap();
        for i in 0..400 {
            let sample = (i as f32 * freq).sin() * 0.5;
            writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    let logdir = dir.path().join("logdir");
    let config = config(Options {
        data_dir: corpus,
        logdir: Some(logdir.clone()),
        num_steps: 2,
        batch_size: 2,
        sample_size: 32,
        silence_threshold: 0.,
        reader_threads: 2,
        queue_size: 4,
        seed: Some(3),
        ..Default::default()
    });

    let builder = builder();
    let token = CancellationToken::new();
    let ctx = bootstrap(&config, &builder).unwrap();
    let pipeline =
        start_pipeline(&config, &builder, 16000, Arc::new(WavDecoder), &token).unwrap();

    let mut training = TrainingLoop::new(&config, ctx, pipeline, token);
    let summary = training.run().await.unwrap();

    assert_eq!(summary.last_step, Some(2));
    assert_eq!(checkpoint_steps(&logdir), [2]);
    assert_eq!(recorded_steps(&logdir), [0, 1, 2]);
}
