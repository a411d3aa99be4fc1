use super::layer::{LayerTensor, Mode, Result};
use super::{Module, Shape};
use crate::tensor::TensorElem;
use num_traits::Float;

/// First node of a network. Passes its input through so the next layer can read a
/// predecessor output shape like any other.
#[derive(Debug, Clone)]
pub struct InputLayer {
    shape: Shape,
}

impl InputLayer {
    pub fn new(shape: Shape) -> Self {
        Self { shape }
    }
}

impl<T: TensorElem + Float> Module<T> for InputLayer {
    fn input_shape(&self) -> &Shape {
        &self.shape
    }

    fn output_shape(&self) -> &Shape {
        &self.shape
    }

    fn forward(&mut self, input: LayerTensor<T>, _mode: Mode) -> Result<LayerTensor<T>> {
        Ok(input)
    }
}
