use std::thread;

use log::debug;
use rayon::prelude::*;

use crate::{
    MlErr, Result,
    arch::{Device, Network, NetworkBuilder},
    dataset::AudioBatch,
    parameters::{GradientSet, ModelParameters},
};

/// The amount of compute devices towers can be bound to.
pub fn available_devices() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get())
}

/// A network replica bound to a device.
struct Tower {
    network: Box<dyn Network>,
}

/// Builds the towers of a training process.
pub struct TowerBuilder;

impl TowerBuilder {
    /// Builds one tower per requested device.
    ///
    /// # Arguments
    /// * `builder` - The network architecture.
    /// * `num_devices` - The amount of towers.
    ///
    /// # Returns
    /// The towers, or `DeviceUnavailable` if there are not enough devices.
    pub fn build(builder: &dyn NetworkBuilder, num_devices: usize) -> Result<Towers> {
        let available = available_devices();

        if num_devices == 0 || num_devices > available {
            return Err(MlErr::DeviceUnavailable {
                requested: num_devices,
                available,
            });
        }

        let towers = (0..num_devices)
            .map(|i| {
                let device = Device(i);
                debug!(device = device.0; "building tower");
                Tower {
                    network: builder.build(device),
                }
            })
            .collect();

        Ok(Towers { towers })
    }
}

/// The data parallel replicas of a model, all sharing the same parameters.
pub struct Towers {
    towers: Vec<Tower>,
}

impl Towers {
    pub fn len(&self) -> usize {
        self.towers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.towers.is_empty()
    }

    /// Runs every tower over `batch` in parallel.
    ///
    /// # Arguments
    /// * `params` - The shared parameters.
    /// * `batch` - The batch every tower trains on.
    ///
    /// # Returns
    /// The mean loss of the towers and one gradient set per tower.
    pub fn compute(
        &mut self,
        params: &ModelParameters,
        batch: &AudioBatch,
    ) -> Result<(f32, Vec<GradientSet>)> {
        let tensors = params.layout().len();

        let results = self
            .towers
            .par_iter_mut()
            .map(|tower| {
                let mut grads = GradientSet::empty(tensors);
                let loss = tower
                    .network
                    .loss_and_grad(params, batch, &mut grads)
                    .inspect_err(|e| {
                        debug!(device = tower.network.device().0; "tower failed: {e}");
                    })?;
                Ok((loss, grads))
            })
            .collect::<Result<Vec<_>>>()?;

        let loss = results.iter().map(|(loss, _)| loss).sum::<f32>() / results.len() as f32;
        let grads = results.into_iter().map(|(_, grads)| grads).collect();
        Ok((loss, grads))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;
    use crate::arch::{WaveNetBuilder, WaveNetParams};

    fn builder() -> WaveNetBuilder {
        let hparams = WaveNetParams {
            dilations: vec![1],
            filter_width: 2,
            residual_channels: 2,
            dilation_channels: 2,
            skip_channels: 2,
            quantization_channels: 256,
            use_biases: false,
            scalar_input: false,
            initial_filter_width: 32,
            sample_rate: 16000,
        };

        WaveNetBuilder::new(hparams, None).unwrap()
    }

    #[test]
    fn too_many_devices() {
        let err = TowerBuilder::build(&builder(), available_devices() + 1).err();
        assert!(matches!(err, Some(MlErr::DeviceUnavailable { .. })));

        let err = TowerBuilder::build(&builder(), 0).err();
        assert!(matches!(err, Some(MlErr::DeviceUnavailable { .. })));
    }

    #[test]
    fn towers_share_the_batch() {
        let builder = builder();
        let devices = available_devices().min(2);
        let mut towers = TowerBuilder::build(&builder, devices).unwrap();
        let params = ModelParameters::init(builder.layout(), Some(0)).unwrap();
        let batch = Array2::from_shape_fn((2, 16), |(_, c)| (c as f32 / 16.) - 0.5);

        let (loss, grads) = towers.compute(&params, &batch).unwrap();

        assert_eq!(grads.len(), devices);
        assert!(loss.is_finite());
        assert!(grads.windows(2).all(|w| w[0] == w[1]));
    }
}
