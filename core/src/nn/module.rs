use super::layer::{LayerTensor, Mode, Result};
use super::{Parameter, ParameterStore, Shape};
use crate::tensor::TensorElem;
use num_traits::Float;
use std::fmt::Debug;

/// The contract every layer kind implements.
///
/// Shape inference happens in the constructor, so `input_shape` and `output_shape` are
/// available immediately. `materialize` must run once before `forward` on layers that own
/// parameters. Parameter-less layers keep the defaults.
///
/// `Send + Sync` lets a whole stack move to, or be shared with, another thread.
pub trait Module<T: TensorElem + Float>: Debug + Send + Sync {
    /// Layers owning parameters are named; the name prefixes their parameter names.
    fn name(&self) -> Option<&str> {
        None
    }

    fn input_shape(&self) -> &Shape;

    fn output_shape(&self) -> &Shape;

    fn materialize(&mut self, _store: &mut dyn ParameterStore<T>) -> Result<()> {
        Ok(())
    }

    fn is_materialized(&self) -> bool {
        true
    }

    fn forward(&mut self, input: LayerTensor<T>, mode: Mode) -> Result<LayerTensor<T>>;

    fn parameters(&self) -> Vec<&Parameter<T>> {
        Vec::new()
    }

    /// Output of the last forward pass, before any channel squeeze.
    fn activations(&self) -> Option<&LayerTensor<T>> {
        None
    }

    /// Weight of this layer's parameters in an external regularization term.
    fn regularization_coefficient(&self) -> Option<f64> {
        None
    }
}
