use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    thread::{self, JoinHandle},
};

use log::{debug, info, warn};
use ndarray::{Array2, ArrayView1};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    AudioBatch, AudioDecoder, SILENCE_FRAME_LENGTH, SILENCE_HOP_LENGTH, Segmenter, find_files,
    trim_silence,
};
use crate::{MlErr, Result};

/// The configuration of an `AudioPipeline`.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub data_dir: PathBuf,
    pub sample_rate: u32,
    pub receptive_field: usize,
    pub sample_size: usize,
    /// Clips are trimmed to their frames over this energy, `None` disables trimming.
    pub silence_threshold: Option<f32>,
    pub random_crop: bool,
    pub threads: usize,
    pub capacity: usize,
    pub seed: Option<u64>,
}

/// Background audio loading into a bounded queue of segments.
pub struct AudioPipeline {
    rx: mpsc::Receiver<Box<[f32]>>,
    segment_len: usize,
    token: CancellationToken,
    threads: Vec<JoinHandle<Result<()>>>,
}

impl AudioPipeline {
    /// Starts the producer threads.
    ///
    /// # Arguments
    /// * `config` - The reader configuration.
    /// * `decoder` - The audio decoder shared by every producer.
    /// * `parent` - Cancelling this token also stops the pipeline.
    ///
    /// # Returns
    /// The running pipeline, or an error if the corpus is empty.
    pub fn spawn(
        config: ReaderConfig,
        decoder: Arc<dyn AudioDecoder>,
        parent: &CancellationToken,
    ) -> Result<Self> {
        let files: Arc<[PathBuf]> = find_files(&config.data_dir)?.into();
        let segmenter = Segmenter::new(config.receptive_field, config.sample_size);
        let capacity = config.capacity.max(1);
        let threads = config.threads.max(1);

        info!(
            files = files.len(),
            threads = threads,
            capacity = capacity;
            "starting audio pipeline"
        );

        let (tx, rx) = mpsc::channel(capacity);
        let token = parent.child_token();
        let config = Arc::new(config);

        let handles = (0..threads)
            .map(|id| {
                let producer = Producer {
                    id,
                    files: Arc::clone(&files),
                    config: Arc::clone(&config),
                    decoder: Arc::clone(&decoder),
                    segmenter,
                    tx: tx.clone(),
                    token: token.clone(),
                };

                thread::Builder::new()
                    .name(format!("audio-reader-{id}"))
                    .spawn(move || producer.run())
            })
            .collect::<io::Result<Vec<_>>>();

        let handles = match handles {
            Ok(handles) => handles,
            Err(e) => {
                token.cancel();
                return Err(e.into());
            }
        };

        Ok(Self {
            rx,
            segment_len: segmenter.window_len(),
            token,
            threads: handles,
        })
    }

    /// Waits until `batch_size` segments are available and stacks them into a batch.
    ///
    /// # Returns
    /// A `batch_size x segment_len` batch, or `PipelineClosed` if every producer has exited.
    pub async fn dequeue(&mut self, batch_size: usize) -> Result<AudioBatch> {
        let mut batch: AudioBatch = Array2::zeros((batch_size, self.segment_len));

        for mut row in batch.rows_mut() {
            let segment = self.rx.recv().await.ok_or(MlErr::PipelineClosed)?;
            row.assign(&ArrayView1::from(&segment[..]));
        }

        Ok(batch)
    }

    /// Stops the producers and waits for them to exit.
    ///
    /// Blocks the calling thread until every producer is joined, call it through
    /// `tokio::task::block_in_place` from async code.
    ///
    /// # Returns
    /// The first error a producer exited with, if any.
    pub fn stop(&mut self) -> Result<()> {
        self.token.cancel();
        self.rx.close();

        let mut first_err = None;

        for handle in self.threads.drain(..) {
            let res = handle
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("audio producer panicked").into()));

            if let Err(e) = res {
                warn!("audio producer failed: {e}");
                first_err.get_or_insert(e);
            }
        }

        debug!("audio pipeline stopped");
        first_err.map_or(Ok(()), Err)
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.token.cancel();
        self.rx.close();
    }
}

/// The state of a single producer thread.
struct Producer {
    id: usize,
    files: Arc<[PathBuf]>,
    config: Arc<ReaderConfig>,
    decoder: Arc<dyn AudioDecoder>,
    segmenter: Segmenter,
    tx: mpsc::Sender<Box<[f32]>>,
    token: CancellationToken,
}

impl Producer {
    /// Cycles over its own shuffled copy of the corpus until cancelled or the queue is closed.
    fn run(self) -> Result<()> {
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(self.id as u64)),
            None => StdRng::from_os_rng(),
        };

        let mut order: Vec<usize> = (0..self.files.len()).collect();

        loop {
            order.shuffle(&mut rng);
            let mut produced = false;

            for &i in &order {
                if self.token.is_cancelled() {
                    return Ok(());
                }

                let path = &self.files[i];
                let audio = self.decoder.decode(path, self.config.sample_rate)?;
                let Some(audio) = self.trim(path, &audio) else {
                    continue;
                };

                let crop_rng = self.config.random_crop.then_some(&mut rng);
                for segment in self.segmenter.split(audio, crop_rng) {
                    if self.token.is_cancelled() || self.tx.blocking_send(segment).is_err() {
                        return Ok(());
                    }

                    produced = true;
                }
            }

            if !produced {
                return Err(MlErr::Audio {
                    path: self.config.data_dir.clone(),
                    reason: "every clip is silent under the silence threshold".to_string(),
                });
            }
        }
    }

    /// Applies the silence threshold to `audio`.
    ///
    /// # Returns
    /// `None` if the whole clip is silent.
    fn trim<'a>(&self, path: &Path, audio: &'a [f32]) -> Option<&'a [f32]> {
        let Some(threshold) = self.config.silence_threshold else {
            return Some(audio);
        };

        let trimmed = trim_silence(audio, threshold, SILENCE_FRAME_LENGTH, SILENCE_HOP_LENGTH);

        if trimmed.is_empty() {
            warn!(
                "Warning: {} was ignored as it contains only silence. \
                 Consider decreasing the silence threshold.",
                path.display()
            );
            return None;
        }

        Some(trimmed)
    }
}
