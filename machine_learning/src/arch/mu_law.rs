/// Quantizes samples in `[-1, 1]` into `channels` levels with mu-law companding.
pub fn mu_law_encode(sample: f32, channels: usize) -> usize {
    let mu = (channels - 1) as f32;
    let x = sample.clamp(-1., 1.);
    let magnitude = (1. + mu * x.abs()).ln() / (1. + mu).ln();
    let signal = x.signum() * magnitude;

    (((signal + 1.) / 2. * mu) + 0.5) as usize
}

/// Maps a mu-law level back into `[-1, 1]`.
pub fn mu_law_decode(level: usize, channels: usize) -> f32 {
    let mu = (channels - 1) as f32;
    let signal = 2. * (level as f32 / mu) - 1.;
    let magnitude = ((1. + mu).powf(signal.abs()) - 1.) / mu;

    signal.signum() * magnitude
}
