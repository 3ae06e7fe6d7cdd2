use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use worker::{JobName, Options};

/// The role of this process in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum JobKind {
    Standalone,
    Ps,
    Worker,
}

impl From<JobKind> for JobName {
    fn from(value: JobKind) -> Self {
        match value {
            JobKind::Standalone => JobName::Standalone,
            JobKind::Ps => JobName::Ps,
            JobKind::Worker => JobName::Worker,
        }
    }
}

/// WaveNet example network.
#[derive(Debug, Parser)]
#[command(name = "wavenet-train", about = "WaveNet example network")]
pub struct Args {
    /// How many wav segments to process at once.
    #[arg(long, default_value_t = 1)]
    batch_size: usize,

    /// The directory containing the VCTK corpus.
    #[arg(long, default_value = "./VCTK-Corpus")]
    data_dir: PathBuf,

    /// Directory in which to store the logging information and restore checkpoints
    /// from. Cannot be used together with --logdir-root nor --restore-from.
    #[arg(long)]
    logdir: Option<PathBuf>,

    /// Root directory to place the logging output and generated model, under a dated
    /// subdirectory. Defaults to ./logdir.
    #[arg(long)]
    logdir_root: Option<PathBuf>,

    /// Directory in which to restore the model from. A new training starts at step
    /// zero in the dated logdir.
    #[arg(long)]
    restore_from: Option<PathBuf>,

    /// How many steps to save each checkpoint after.
    #[arg(long, default_value_t = 50)]
    checkpoint_every: u64,

    /// Number of training steps.
    #[arg(long, default_value_t = 100_000)]
    num_steps: u64,

    /// Learning rate for training.
    #[arg(long, default_value_t = 1e-3)]
    learning_rate: f32,

    /// JSON file with the network parameters.
    #[arg(long, default_value = "./wavenet_params.json")]
    wavenet_params: PathBuf,

    /// Concatenate and cut audio samples to this many samples.
    #[arg(long, default_value_t = 100_000)]
    sample_size: usize,

    /// Coefficient in the L2 regularization, zero disables it.
    #[arg(long, default_value_t = 0.)]
    l2_regularization_strength: f32,

    /// Volume threshold below which to trim the start and the end from the training
    /// set samples.
    #[arg(long, default_value_t = 0.3)]
    silence_threshold: f32,

    /// Select the optimizer: adam, sgd or rmsprop.
    #[arg(long, default_value = "adam")]
    optimizer: String,

    /// Specify the momentum to be used by sgd or rmsprop optimizer. Ignored by the
    /// adam optimizer.
    #[arg(long, default_value_t = 0.9)]
    momentum: f32,

    /// Number of towers to split each step over.
    #[arg(long = "num-gpus", default_value_t = 1)]
    num_devices: usize,

    /// Crop every clip at a random offset instead of from its start.
    #[arg(long)]
    random_crop: bool,

    /// Number of audio reader threads.
    #[arg(long, default_value_t = 1)]
    reader_threads: usize,

    /// Capacity of the segment queue.
    #[arg(long, default_value_t = 32)]
    queue_size: usize,

    /// Seed of the parameter initialization and the corpus shuffling.
    #[arg(long)]
    seed: Option<u64>,

    /// Comma-separated list of hostname:port pairs.
    #[arg(long, value_delimiter = ',')]
    ps_hosts: Vec<String>,

    /// Comma-separated list of hostname:port pairs.
    #[arg(long, value_delimiter = ',')]
    worker_hosts: Vec<String>,

    /// Run standalone, as the parameter server or as a worker.
    #[arg(long, value_enum, default_value_t = JobKind::Standalone)]
    job_name: JobKind,

    /// Index of the task within the job.
    #[arg(long, default_value_t = 0)]
    task_index: usize,
}

impl Args {
    pub fn into_options(self) -> Options {
        Options {
            batch_size: self.batch_size,
            data_dir: self.data_dir,
            logdir: self.logdir,
            logdir_root: self.logdir_root,
            restore_from: self.restore_from,
            checkpoint_every: self.checkpoint_every,
            num_steps: self.num_steps,
            learning_rate: self.learning_rate,
            wavenet_params: self.wavenet_params,
            sample_size: self.sample_size,
            l2_regularization_strength: self.l2_regularization_strength,
            silence_threshold: self.silence_threshold,
            optimizer: self.optimizer,
            momentum: self.momentum,
            num_devices: self.num_devices,
            random_crop: self.random_crop,
            reader_threads: self.reader_threads,
            queue_size: self.queue_size,
            seed: self.seed,
            ps_hosts: self.ps_hosts,
            worker_hosts: self.worker_hosts,
            job_name: self.job_name.into(),
            task_index: self.task_index,
        }
    }
}
