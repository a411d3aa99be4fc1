use super::layer::{LayerTensor, Mode, Result};
use super::{Module, Shape};
use crate::tensor::TensorElem;
use log::trace;
use num_traits::Float;
use phenonet_kernels::LrnParams;

/// Local response normalization across channels.
///
/// Each value is divided by `(bias + alpha * sum of squares over the channel window) ^ beta`,
/// with the window radius and constants fixed at [`LrnParams::default`].
#[derive(Debug, Clone)]
pub struct NormalizationLayer {
    shape: Shape,
    params: LrnParams,
}

impl NormalizationLayer {
    const LABEL: &'static str = "normalization";

    pub fn new(input_shape: Shape) -> Self {
        Self {
            shape: input_shape,
            params: LrnParams::default(),
        }
    }

    pub fn params(&self) -> LrnParams {
        self.params
    }
}

impl<T: TensorElem + Float> Module<T> for NormalizationLayer {
    fn input_shape(&self) -> &Shape {
        &self.shape
    }

    fn output_shape(&self) -> &Shape {
        &self.shape
    }

    fn forward(&mut self, input: LayerTensor<T>, _mode: Mode) -> Result<LayerTensor<T>> {
        let x = input.into_spatial(Self::LABEL)?;
        trace!("lrn: forward {:?}", x.shape());
        Ok(LayerTensor::Spatial(x.local_response_norm(self.params)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;

    #[test]
    fn test_single_channel_closed_form() {
        let mut layer = NormalizationLayer::new(Shape::spatial(None, 2, 2, 1));
        let x = Tensor::<f64, 4>::full([1, 2, 2, 1], 3.0);
        for mode in [Mode::Training, Mode::Deterministic] {
            let out = layer.forward(LayerTensor::Spatial(x.clone()), mode).unwrap();
            // 3 / sqrt(1 + 9)
            for v in out.data() {
                assert!((v - 3.0 / 10.0f64.sqrt()).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_shape_preserved() {
        let shape = Shape::spatial(Some(2), 5, 5, 8);
        let layer = NormalizationLayer::new(shape.clone());
        assert_eq!(Module::<f32>::output_shape(&layer), &shape);
        assert_eq!(layer.params().depth_radius, 5);
    }
}
