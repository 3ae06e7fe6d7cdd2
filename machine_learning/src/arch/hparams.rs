use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{MlErr, Result};

fn default_initial_filter_width() -> usize {
    32
}

/// The hyperparameters of a WaveNet network, as read from its JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveNetParams {
    pub dilations: Vec<usize>,
    pub filter_width: usize,
    pub residual_channels: usize,
    pub dilation_channels: usize,
    pub skip_channels: usize,
    pub quantization_channels: usize,
    pub use_biases: bool,
    #[serde(default)]
    pub scalar_input: bool,
    #[serde(default = "default_initial_filter_width")]
    pub initial_filter_width: usize,
    pub sample_rate: u32,
}

impl WaveNetParams {
    /// Reads and validates the hyperparameters stored in `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| MlErr::Hyperparams(format!("{}: {e}", path.display())))?;

        let params: Self = serde_json::from_str(&text)
            .map_err(|e| MlErr::Hyperparams(format!("{}: {e}", path.display())))?;

        params.validate()?;
        Ok(params)
    }

    /// Checks the constraints the network construction relies on.
    pub fn validate(&self) -> Result<()> {
        let reason = if self.dilations.is_empty() {
            "dilations can't be empty"
        } else if self.dilations.contains(&0) {
            "dilations must be positive"
        } else if self.filter_width == 0 {
            "filter_width must be positive"
        } else if self.scalar_input && self.initial_filter_width == 0 {
            "initial_filter_width must be positive"
        } else if self.quantization_channels < 2 {
            "quantization_channels must be at least 2"
        } else if self.sample_rate == 0 {
            "sample_rate must be positive"
        } else {
            return Ok(());
        };

        Err(MlErr::Hyperparams(reason.to_string()))
    }

    /// The amount of samples a single prediction depends on.
    pub fn receptive_field(&self) -> usize {
        let dilated = (self.filter_width - 1) * self.dilations.iter().sum::<usize>() + 1;
        let initial = if self.scalar_input {
            self.initial_filter_width - 1
        } else {
            self.filter_width - 1
        };

        dilated + initial
    }
}
