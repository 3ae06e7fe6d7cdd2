mod hparams;
mod mu_law;
mod network;
mod predictor;

pub use hparams::WaveNetParams;
pub use mu_law::{mu_law_decode, mu_law_encode};
pub use network::{Device, Network, NetworkBuilder};
pub use predictor::{LinearPredictor, WaveNetBuilder};
