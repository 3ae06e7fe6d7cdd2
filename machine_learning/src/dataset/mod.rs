//! Asynchronous audio ingestion.
//!
//! Background threads decode the corpus, trim silence, cut the clips into fixed length
//! segments and push them into a bounded queue the training loop dequeues batches from.

mod decoder;
mod files;
mod pipeline;
mod segment;

use ndarray::Array2;

pub use decoder::{AudioDecoder, WavDecoder};
pub use files::find_files;
pub use pipeline::{AudioPipeline, ReaderConfig};
pub use segment::{Segmenter, trim_silence};

/// A batch of `B` audio segments of `L` samples each.
pub type AudioBatch = Array2<f32>;

/// The frame length used to measure the energy of a clip.
pub const SILENCE_FRAME_LENGTH: usize = 2048;
/// The distance between two consecutive energy frames.
pub const SILENCE_HOP_LENGTH: usize = 512;
