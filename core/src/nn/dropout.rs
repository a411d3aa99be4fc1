use super::layer::{LayerError, LayerTensor, Mode, Result};
use super::{Module, Shape};
use crate::tensor::{Tensor, TensorElem, TensorError};
use log::trace;
use num_traits::Float;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Inverted dropout: in training, keeps each element with probability `p` and scales
/// survivors by `1 / p`. Deterministic forwards return the input.
#[derive(Debug, Clone)]
pub struct DropoutLayer {
    shape: Shape,
    keep_probability: f64,
    rng: StdRng,
}

impl DropoutLayer {
    const LABEL: &'static str = "dropout";

    /// # Errors
    ///
    /// `InvalidHyperparameter` unless `0 < keep_probability <= 1`.
    pub fn new(input_shape: Shape, keep_probability: f64) -> Result<Self> {
        if !(keep_probability > 0.0 && keep_probability <= 1.0) {
            return Err(LayerError::InvalidHyperparameter {
                layer: Self::LABEL.to_string(),
                reason: format!("keep probability {keep_probability} is outside (0, 1]"),
            });
        }
        Ok(Self {
            shape: input_shape,
            keep_probability,
            rng: StdRng::from_rng(&mut rand::rng()),
        })
    }

    /// Reseeds the mask RNG.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn keep_probability(&self) -> f64 {
        self.keep_probability
    }

    fn mask<T: TensorElem, const RANK: usize>(&mut self, mut x: Tensor<T, RANK>) -> Result<Tensor<T, RANK>> {
        let scale = T::from_f64(1.0 / self.keep_probability).ok_or_else(|| {
            TensorError::Unsupported(format!(
                "dropout scale 1/{} is not representable",
                self.keep_probability
            ))
        })?;
        for v in x.data_mut() {
            *v = if self.rng.random::<f64>() < self.keep_probability {
                *v * scale
            } else {
                T::zero()
            };
        }
        Ok(x)
    }
}

impl<T: TensorElem + Float> Module<T> for DropoutLayer {
    fn input_shape(&self) -> &Shape {
        &self.shape
    }

    fn output_shape(&self) -> &Shape {
        &self.shape
    }

    fn forward(&mut self, input: LayerTensor<T>, mode: Mode) -> Result<LayerTensor<T>> {
        if mode.is_deterministic() || self.keep_probability >= 1.0 {
            return Ok(input);
        }
        trace!("dropout: masking {:?} with p = {}", input.dims(), self.keep_probability);
        Ok(match input {
            LayerTensor::Flat(x) => LayerTensor::Flat(self.mask(x)?),
            LayerTensor::Squeezed(x) => LayerTensor::Squeezed(self.mask(x)?),
            LayerTensor::Spatial(x) => LayerTensor::Spatial(self.mask(x)?),
        })
    }
}
