#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use chrono::{NaiveDate, NaiveDateTime};
use machine_learning::{
    MlErr, Result,
    arch::{WaveNetBuilder, WaveNetParams},
    dataset::AudioBatch,
};
use ndarray::Array2;
use tokio_util::sync::CancellationToken;
use worker::{BatchSource, Options, TrainingConfig};

pub const SEGMENT_LEN: usize = 16;

pub fn builder() -> WaveNetBuilder {
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

pub fn started() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2021, 3, 4)
        .unwrap()
        .and_hms_opt(5, 6, 7)
        .unwrap()
}

pub fn config(options: Options) -> TrainingConfig {
    TrainingConfig::from_options(options, started()).unwrap()
}

/// The steps of the checkpoints stored in `dir`, sorted.
pub fn checkpoint_steps(dir: &Path) -> Vec<u64> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut steps: Vec<u64> = entries
        .filter_map(|e| e.ok()?.file_name().into_string().ok())
        .filter_map(|name| {
            name.strip_prefix("model.ckpt-")?
                .strip_suffix(".safetensors")?
                .parse()
                .ok()
        })
        .collect();

    steps.sort();
    steps
}

/// The steps of the progress records stored in `dir`.
pub fn recorded_steps(dir: &Path) -> Vec<u64> {
    let Ok(text) = fs::read_to_string(dir.join("summaries.jsonl")) else {
        return Vec::new();
    };

    text.lines()
        .map(|line| {
            let record: serde_json::Value = serde_json::from_str(line).unwrap();
            record["step"].as_u64().unwrap()
        })
        .collect()
}

/// Serves the same smooth waveform forever.
pub struct FixedSource {
    served: usize,
    close_after: Option<usize>,
    cancel_after: Option<(usize, CancellationToken)>,
    stopped: Arc<AtomicBool>,
}

impl FixedSource {
    pub fn new() -> Self {
        Self {
            served: 0,
            close_after: None,
            cancel_after: None,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Behaves like a pipeline whose producers failed after `n` batches.
    pub fn close_after(mut self, n: usize) -> Self {
        self.close_after = Some(n);
        self
    }

    /// Cancels `token` while serving the `n`th batch.
    pub fn cancel_after(mut self, n: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((n, token));
        self
    }

    pub fn stopped(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stopped)
    }
}

impl BatchSource for FixedSource {
    async fn next_batch(&mut self, batch_size: usize) -> Result<AudioBatch> {
        if self.close_after.is_some_and(|n| self.served >= n) {
            return Err(MlErr::PipelineClosed);
        }

        self.served += 1;

        if let Some((n, token)) = &self.cancel_after {
            if self.served >= *n {
                token.cancel();
            }
        }

        Ok(Array2::from_shape_fn((batch_size, SEGMENT_LEN), |(r, c)| {
            ((c as f32 * 0.4 + r as f32).sin() * 0.6).clamp(-1., 1.)
        }))
    }

    fn stop(&mut self) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);

        match self.close_after {
            Some(_) => Err(MlErr::Audio {
                path: PathBuf::from("corpus"),
                reason: "decoder failed".to_string(),
            }),
            None => Ok(()),
        }
    }
}
