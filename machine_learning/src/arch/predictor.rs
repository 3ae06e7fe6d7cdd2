use std::sync::Arc;

use comms::specs::machine_learning::{InitSpec, ParamSpec};
use ndarray::{Array1, ArrayView1, s};

use super::{Device, Network, NetworkBuilder, WaveNetParams, mu_law_decode, mu_law_encode};
use crate::{
    MlErr, Result,
    dataset::AudioBatch,
    parameters::{GradientSet, ModelParameters, ParamId, ParamLayout},
};

const WEIGHTS: &str = "predictor/weights";
const BIAS: &str = "predictor/bias";

/// Builds `LinearPredictor` replicas out of a set of WaveNet hyperparameters.
pub struct WaveNetBuilder {
    hparams: WaveNetParams,
    l2: Option<f32>,
    layout: Arc<ParamLayout>,
}

impl WaveNetBuilder {
    /// Creates a new `WaveNetBuilder`.
    ///
    /// # Arguments
    /// * `hparams` - The network hyperparameters.
    /// * `l2` - The strength of the L2 regularization of the non bias tensors, if any.
    pub fn new(hparams: WaveNetParams, l2: Option<f32>) -> Result<Self> {
        hparams.validate()?;

        let receptive_field = hparams.receptive_field();
        let mut specs = vec![ParamSpec {
            name: WEIGHTS.to_string(),
            len: receptive_field,
            init: InitSpec::XavierUniform {
                fan_in: receptive_field,
                fan_out: 1,
            },
        }];

        if hparams.use_biases {
            specs.push(ParamSpec {
                name: BIAS.to_string(),
                len: 1,
                init: InitSpec::Const { value: 0. },
            });
        }

        Ok(Self {
            hparams,
            l2,
            layout: Arc::new(ParamLayout::new(specs)),
        })
    }
}

impl NetworkBuilder for WaveNetBuilder {
    fn layout(&self) -> Arc<ParamLayout> {
        Arc::clone(&self.layout)
    }

    fn receptive_field(&self) -> usize {
        self.hparams.receptive_field()
    }

    fn build(&self, device: Device) -> Box<dyn Network> {
        let weights = ParamId::new(0);
        let bias = self.hparams.use_biases.then(|| ParamId::new(1));

        Box::new(LinearPredictor {
            device,
            receptive_field: self.receptive_field(),
            channels: self.hparams.quantization_channels,
            l2: self.l2,
            layout: Arc::clone(&self.layout),
            weights,
            bias,
            scratch: Vec::new(),
        })
    }
}

/// An autoregressive predictor of the next sample out of the previous `receptive_field` ones.
///
/// Inputs and targets are mu-law quantized, the loss is the mean squared error of the predictions.
pub struct LinearPredictor {
    device: Device,
    receptive_field: usize,
    channels: usize,
    l2: Option<f32>,
    layout: Arc<ParamLayout>,
    weights: ParamId,
    bias: Option<ParamId>,
    scratch: Vec<f32>,
}

impl Network for LinearPredictor {
    fn device(&self) -> Device {
        self.device
    }

    fn loss_and_grad(
        &mut self,
        params: &ModelParameters,
        batch: &AudioBatch,
        grads: &mut GradientSet,
    ) -> Result<f32> {
        let rf = self.receptive_field;
        let (rows, cols) = batch.dim();

        if cols <= rf {
            return Err(MlErr::SizeMismatch {
                a: "segment",
                b: "receptive field",
                got: cols,
                expected: rf + 1,
            });
        }

        if params.layout().as_ref() != self.layout.as_ref() || grads.len() != self.layout.len() {
            return Err(MlErr::SizeMismatch {
                a: "parameters",
                b: "network layout",
                got: params.layout().total_len(),
                expected: self.layout.total_len(),
            });
        }

        let weights = ArrayView1::from(params.get(self.weights));
        let bias = self.bias.map(|id| params.get(id)[0]).unwrap_or_default();

        let mut grad_w = Array1::<f32>::zeros(rf);
        let mut grad_b = 0.;
        let mut sum_sq = 0.;

        for row in batch.rows() {
            self.scratch.clear();
            self.scratch.extend(
                row.iter()
                    .map(|&x| mu_law_decode(mu_law_encode(x, self.channels), self.channels)),
            );

            let x = ArrayView1::from(&self.scratch[..]);
            let targets = x.slice(s![rf..]);

            for (window, &target) in x.windows(rf).into_iter().zip(targets.iter()) {
                let err = window.dot(&weights) + bias - target;
                sum_sq += err * err;
                grad_w.scaled_add(err, &window);
                grad_b += err;
            }
        }

        let n = (rows * (cols - rf)).max(1) as f32;
        let mut loss = sum_sq / n;
        grad_w *= 2. / n;
        grad_b *= 2. / n;

        if let Some(l2) = self.l2 {
            loss += l2 * weights.dot(&weights) / 2.;
            grad_w.scaled_add(l2, &weights);
        }

        grads
            .get_or_zeroed(self.weights, rf)
            .iter_mut()
            .zip(grad_w.iter())
            .for_each(|(acc, g)| *acc += g);

        if let Some(id) = self.bias {
            grads.get_or_zeroed(id, 1)[0] += grad_b;
        }

        Ok(loss)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;

    fn hparams() -> WaveNetParams {
        WaveNetParams {
            dilations: vec![1, 2],
            filter_width: 2,
            residual_channels: 4,
            dilation_channels: 4,
            skip_channels: 8,
            quantization_channels: 256,
            use_biases: true,
            scalar_input: false,
            initial_filter_width: 32,
            sample_rate: 16000,
        }
    }

    fn batch(cols: usize) -> AudioBatch {
        Array2::from_shape_fn((2, cols), |(r, c)| {
            ((c as f32 * 0.3 + r as f32).sin() * 0.5).clamp(-1., 1.)
        })
    }

    fn loss_at(builder: &WaveNetBuilder, params: &ModelParameters, batch: &AudioBatch) -> f32 {
        let mut net = builder.build(Device(0));
        let mut grads = GradientSet::empty(builder.layout().len());
        net.loss_and_grad(params, batch, &mut grads).unwrap()
    }

    #[test]
    fn layout_follows_receptive_field() {
        let builder = WaveNetBuilder::new(hparams(), None).unwrap();
        let layout = builder.layout();

        assert_eq!(builder.receptive_field(), 5);
        assert_eq!(layout.len(), 2);
        assert_eq!(layout.spec(ParamId::new(0)).len, 5);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        const H: f32 = 1e-2;

        let builder = WaveNetBuilder::new(hparams(), Some(0.1)).unwrap();
        let params = ModelParameters::init(builder.layout(), Some(3)).unwrap();
        let batch = batch(32);

        let mut net = builder.build(Device(0));
        let mut grads = GradientSet::empty(builder.layout().len());
        net.loss_and_grad(&params, &batch, &mut grads).unwrap();

        let analytic: Vec<f32> = grads
            .iter()
            .flat_map(|(_, g)| g.unwrap().to_vec())
            .collect();

        for i in 0..params.as_slice().len() {
            let mut plus = params.as_slice().to_vec();
            let mut minus = plus.clone();
            plus[i] += H;
            minus[i] -= H;

            let plus = ModelParameters::from_values(builder.layout(), plus).unwrap();
            let minus = ModelParameters::from_values(builder.layout(), minus).unwrap();
            let numeric =
                (loss_at(&builder, &plus, &batch) - loss_at(&builder, &minus, &batch)) / (2. * H);

            assert!(
                (numeric - analytic[i]).abs() < 1e-3,
                "param {i}: numeric {numeric} analytic {}",
                analytic[i]
            );
        }
    }

    #[test]
    fn short_segments_are_rejected() {
        let builder = WaveNetBuilder::new(hparams(), None).unwrap();
        let params = ModelParameters::zeros(builder.layout());
        let mut net = builder.build(Device(0));
        let mut grads = GradientSet::empty(builder.layout().len());

        let err = net.loss_and_grad(&params, &batch(5), &mut grads).unwrap_err();
        assert!(matches!(err, MlErr::SizeMismatch { .. }));
    }
}
