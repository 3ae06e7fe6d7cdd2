use std::path::Path;

use hound::{SampleFormat, WavReader};

use crate::{MlErr, Result};

/// Decodes audio files into mono samples in `[-1, 1]`.
pub trait AudioDecoder: Send + Sync {
    /// Decodes `path`, resampled to `sample_rate`.
    fn decode(&self, path: &Path, sample_rate: u32) -> Result<Vec<f32>>;
}

/// Decodes PCM WAV files.
#[derive(Debug, Default, Clone, Copy)]
pub struct WavDecoder;

impl AudioDecoder for WavDecoder {
    fn decode(&self, path: &Path, sample_rate: u32) -> Result<Vec<f32>> {
        let audio_err = |reason: String| MlErr::Audio {
            path: path.to_path_buf(),
            reason,
        };

        let mut reader = WavReader::open(path).map_err(|e| audio_err(e.to_string()))?;
        let spec = reader.spec();

        if spec.sample_rate == 0 || spec.channels == 0 {
            return Err(audio_err(format!(
                "invalid format: {} Hz, {} channels",
                spec.sample_rate, spec.channels
            )));
        }

        let samples: hound::Result<Vec<f32>> = match spec.sample_format {
            SampleFormat::Int => {
                let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / max_val))
                    .collect()
            }
            SampleFormat::Float => reader.samples::<f32>().collect(),
        };
        let samples = samples.map_err(|e| audio_err(e.to_string()))?;

        let mono = mix_down(&samples, spec.channels as usize);
        Ok(resample(&mono, spec.sample_rate, sample_rate))
    }
}

/// Averages the interleaved channels of `samples`.
fn mix_down(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return samples.to_vec();
    }

    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Linear interpolation resampling.
fn resample(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from as f64 / to as f64;
    let len = (samples.len() as f64 / ratio).ceil() as usize;
    let last = samples.len() - 1;

    (0..len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = (pos.floor() as usize).min(last);
            let frac = (pos - idx as f64) as f32;
            let next = samples[(idx + 1).min(last)];
            samples[idx] + (next - samples[idx]) * frac
        })
        .collect()
}
