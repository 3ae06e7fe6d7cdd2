//! Run configuration, resolved once at startup out of the raw command line options.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use comms::specs::machine_learning::OptimizerSpec;
use log::info;
use machine_learning::optimization::OptimizerFactory;

use crate::{Result, TrainErr};

pub const LOGDIR_ROOT: &str = "./logdir";

/// Silence thresholds at or below this value disable trimming.
pub const SILENCE_EPSILON: f32 = 0.001;

const LOGDIR_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

/// The role of this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobName {
    #[default]
    Standalone,
    Ps,
    Worker,
}

/// The raw options of a run, as given by the user.
#[derive(Debug, Clone)]
pub struct Options {
    pub batch_size: usize,
    pub data_dir: PathBuf,
    pub logdir: Option<PathBuf>,
    pub logdir_root: Option<PathBuf>,
    pub restore_from: Option<PathBuf>,
    pub checkpoint_every: u64,
    pub num_steps: u64,
    pub learning_rate: f32,
    pub wavenet_params: PathBuf,
    pub sample_size: usize,
    pub l2_regularization_strength: f32,
    pub silence_threshold: f32,
    pub optimizer: String,
    pub momentum: f32,
    pub num_devices: usize,
    pub random_crop: bool,
    pub reader_threads: usize,
    pub queue_size: usize,
    pub seed: Option<u64>,
    pub ps_hosts: Vec<String>,
    pub worker_hosts: Vec<String>,
    pub job_name: JobName,
    pub task_index: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            batch_size: 1,
            data_dir: PathBuf::from("./VCTK-Corpus"),
            logdir: None,
            logdir_root: None,
            restore_from: None,
            checkpoint_every: 50,
            num_steps: 100_000,
            learning_rate: 1e-3,
            wavenet_params: PathBuf::from("./wavenet_params.json"),
            sample_size: 100_000,
            l2_regularization_strength: 0.,
            silence_threshold: 0.3,
            optimizer: "adam".to_string(),
            momentum: 0.9,
            num_devices: 1,
            random_crop: false,
            reader_threads: 1,
            queue_size: 32,
            seed: None,
            ps_hosts: Vec::new(),
            worker_hosts: Vec::new(),
            job_name: JobName::Standalone,
            task_index: 0,
        }
    }
}

/// Where the starting parameters of a run come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestorePolicy {
    /// Continue from the latest checkpoint of the logdir, if any.
    Resume,
    /// Start from freshly initialized parameters.
    Fresh,
    /// Start from the latest checkpoint of `from` but count steps from zero again,
    /// the checkpoints are written to the new logdir.
    RestoreInto { from: PathBuf },
}

/// What this process does in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Standalone,
    ParameterServer {
        addr: String,
        num_workers: usize,
    },
    Worker {
        ps_addr: String,
        task_index: usize,
        num_workers: usize,
    },
}

impl Role {
    /// Whether this process writes checkpoints and progress records.
    pub fn is_chief(&self) -> bool {
        match self {
            Role::Standalone => true,
            Role::ParameterServer { .. } => false,
            Role::Worker { task_index, .. } => *task_index == 0,
        }
    }
}

/// Immutable snapshot of the run parameters.
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub batch_size: usize,
    pub data_dir: PathBuf,
    pub logdir: PathBuf,
    pub restore: RestorePolicy,
    pub checkpoint_every: u64,
    pub num_steps: u64,
    pub optimizer: OptimizerSpec,
    pub wavenet_params: PathBuf,
    pub sample_size: usize,
    pub l2: Option<f32>,
    pub silence_threshold: Option<f32>,
    pub num_devices: usize,
    pub random_crop: bool,
    pub reader_threads: usize,
    pub queue_size: usize,
    pub seed: Option<u64>,
    pub role: Role,
}

impl TrainingConfig {
    /// Validates `options` and resolves them into a configuration.
    ///
    /// Nothing is read from nor written to disk.
    ///
    /// # Arguments
    /// * `options` - The raw options.
    /// * `started` - The local time the run started at, names the default logdir.
    ///
    /// # Returns
    /// The configuration or a `Config` error describing the first invalid option.
    pub fn from_options(options: Options, started: NaiveDateTime) -> Result<Self> {
        if options.logdir.is_some() && options.logdir_root.is_some() {
            return Err(TrainErr::Config(
                "--logdir and --logdir-root cannot be specified at the same time.".to_string(),
            ));
        }

        if options.logdir.is_some() && options.restore_from.is_some() {
            return Err(TrainErr::Config(
                "--logdir and --restore-from cannot be specified at the same time. \
                 This is to keep your previous model from unexpected overwrites.\n\
                 Use --logdir-root to specify the root of the directory which will be \
                 automatically created with current date and time, or use only --logdir \
                 to just continue the training from the last checkpoint."
                    .to_string(),
            ));
        }

        positive("--batch-size", options.batch_size)?;
        positive("--sample-size", options.sample_size)?;
        positive("--num-gpus", options.num_devices)?;
        positive("--checkpoint-every", options.checkpoint_every as usize)?;

        let optimizer = OptimizerFactory::spec(
            &options.optimizer,
            options.learning_rate,
            options.momentum,
        )?;

        let role = resolve_role(&options)?;
        let (logdir, restore) = resolve_directories(&options, started);

        Ok(Self {
            batch_size: options.batch_size,
            data_dir: options.data_dir,
            logdir,
            restore,
            checkpoint_every: options.checkpoint_every,
            num_steps: options.num_steps,
            optimizer,
            wavenet_params: options.wavenet_params,
            sample_size: options.sample_size,
            l2: (options.l2_regularization_strength != 0.)
                .then_some(options.l2_regularization_strength),
            silence_threshold: (options.silence_threshold > SILENCE_EPSILON)
                .then_some(options.silence_threshold),
            num_devices: options.num_devices,
            random_crop: options.random_crop,
            reader_threads: options.reader_threads.max(1),
            queue_size: options.queue_size.max(1),
            seed: options.seed,
            role,
        })
    }

    /// Whether `step` is due for a periodic checkpoint.
    pub fn is_checkpoint_step(&self, step: u64) -> bool {
        step > 0 && step % self.checkpoint_every == 0
    }
}

/// The logdir of a run that didn't name one.
///
/// # Arguments
/// * `root` - The root directory of every run.
/// * `started` - The local time the run started at.
pub fn default_logdir(root: &Path, started: NaiveDateTime) -> PathBuf {
    root.join("train")
        .join(started.format(LOGDIR_FORMAT).to_string())
}

fn positive(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(TrainErr::Config(format!("{name} must be greater than zero.")));
    }

    Ok(())
}

/// Resolves the logdir and the restore policy, the options are already known to be compatible.
fn resolve_directories(options: &Options, started: NaiveDateTime) -> (PathBuf, RestorePolicy) {
    if let Some(logdir) = &options.logdir {
        return (logdir.clone(), RestorePolicy::Resume);
    }

    let root = options
        .logdir_root
        .clone()
        .unwrap_or_else(|| PathBuf::from(LOGDIR_ROOT));

    let logdir = default_logdir(&root, started);
    info!("Using default logdir: {}", logdir.display());

    let restore = match &options.restore_from {
        Some(from) if *from != logdir => RestorePolicy::RestoreInto { from: from.clone() },
        Some(_) => RestorePolicy::Resume,
        None => RestorePolicy::Fresh,
    };

    (logdir, restore)
}

fn resolve_role(options: &Options) -> Result<Role> {
    let ps_addr = || match options.ps_hosts.as_slice() {
        [] => Err(TrainErr::Config("--ps-hosts can't be empty.".to_string())),
        [addr] => Ok(addr.clone()),
        _ => Err(TrainErr::Config(
            "only a single parameter server is supported.".to_string(),
        )),
    };

    let num_workers = options.worker_hosts.len();

    match options.job_name {
        JobName::Standalone => Ok(Role::Standalone),
        JobName::Ps => {
            if num_workers == 0 {
                return Err(TrainErr::Config("--worker-hosts can't be empty.".to_string()));
            }

            if options.task_index != 0 {
                return Err(TrainErr::Config(format!(
                    "--task-index {} is out of range for a single parameter server.",
                    options.task_index
                )));
            }

            Ok(Role::ParameterServer {
                addr: ps_addr()?,
                num_workers,
            })
        }
        JobName::Worker => {
            if options.task_index >= num_workers {
                return Err(TrainErr::Config(format!(
                    "--task-index {} is out of range for {num_workers} workers.",
                    options.task_index
                )));
            }

            Ok(Role::Worker {
                ps_addr: ps_addr()?,
                task_index: options.task_index,
                num_workers,
            })
        }
    }
}
