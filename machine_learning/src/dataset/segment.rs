use rand::Rng;

/// Removes the leading and trailing frames whose energy is not over `threshold`.
///
/// # Arguments
/// * `audio` - The clip to trim.
/// * `threshold` - The minimum RMS energy of a frame to be kept.
/// * `frame_length` - The amount of samples of each energy frame.
/// * `hop` - The distance between the starts of two consecutive frames.
///
/// # Returns
/// The trimmed clip, empty if every frame is silent.
pub fn trim_silence(audio: &[f32], threshold: f32, frame_length: usize, hop: usize) -> &[f32] {
    let hop = hop.max(1);
    let frames = audio.len().div_ceil(hop);

    let loud = |i: &usize| {
        let start = i * hop;
        let frame = &audio[start..(start + frame_length).min(audio.len())];
        let energy = frame.iter().map(|x| x * x).sum::<f32>() / frame.len() as f32;
        energy.sqrt() > threshold
    };

    let Some(first) = (0..frames).find(loud) else {
        return &audio[..0];
    };

    let last = (first..frames).rfind(loud).unwrap_or(first);
    &audio[first * hop..(last * hop + frame_length).min(audio.len())]
}

/// Cuts clips into windows of `receptive_field + sample_size` samples.
///
/// The clip is prefixed with `receptive_field` zeros so the first samples can be predicted.
#[derive(Debug, Clone, Copy)]
pub struct Segmenter {
    receptive_field: usize,
    sample_size: usize,
}

impl Segmenter {
    /// Creates a new `Segmenter`.
    ///
    /// # Arguments
    /// * `receptive_field` - The context each window carries before the predicted samples.
    /// * `sample_size` - The amount of predicted samples of each window.
    pub fn new(receptive_field: usize, sample_size: usize) -> Self {
        Self {
            receptive_field,
            sample_size: sample_size.max(1),
        }
    }

    /// The length of every produced window.
    pub fn window_len(&self) -> usize {
        self.receptive_field + self.sample_size
    }

    /// Splits `audio` into windows.
    ///
    /// # Arguments
    /// * `audio` - The clip to split.
    /// * `rng` - If given a single window at a uniformly random offset is returned, otherwise
    ///           consecutive windows whose predicted samples don't overlap.
    ///
    /// # Returns
    /// The windows, all exactly `window_len` long, the last one zero padded.
    pub fn split<R: Rng>(&self, audio: &[f32], rng: Option<&mut R>) -> Vec<Box<[f32]>> {
        let len = self.window_len();
        let mut padded = vec![0.; self.receptive_field];
        padded.extend_from_slice(audio);

        let window = |start: usize| {
            let mut window = vec![0.; len];
            let end = (start + len).min(padded.len());
            window[..end - start].copy_from_slice(&padded[start..end]);
            window.into_boxed_slice()
        };

        if let Some(rng) = rng {
            let offset = match padded.len().checked_sub(len) {
                Some(max) if max > 0 => rng.random_range(0..=max),
                _ => 0,
            };

            return vec![window(offset)];
        }

        (0..)
            .map(|k| k * self.sample_size)
            .take_while(|start| start + self.receptive_field < padded.len())
            .map(window)
            .collect()
    }
}
