use super::layer::{check_positive, LayerError, LayerTensor, Mode, Result};
use super::parameter::{Affine, Parameters};
use super::shape::flatten_size;
use super::{ActivationKind, InitializerKind, Module, Parameter, ParameterStore, Shape};
use crate::config::FullyConnectedOptions;
use crate::tensor::TensorElem;
use log::{debug, trace};
use num_traits::Float;

/// Dense affine layer: `activation(x @ W + b)`.
///
/// A spatial input is flattened to `[batch, features]` first when `flatten` is set. The output
/// is always `[batch, output_size]`, even for a single output feature.
#[derive(Debug)]
pub struct FullyConnectedLayer<T: TensorElem> {
    name: String,
    input_shape: Shape,
    output_shape: Shape,
    /// `[input_features, output_size]`
    weight_shape: [usize; 2],
    flatten: bool,
    batch_size: Option<usize>,
    activation: ActivationKind,
    initializer: InitializerKind,
    regularization_coefficient: f64,
    params: Parameters<Affine<T>>,
    activations: Option<LayerTensor<T>>,
}

impl<T: TensorElem + Float> FullyConnectedLayer<T> {
    /// # Errors
    ///
    /// - `InvalidHyperparameter` for a zero output size.
    /// - `RankMismatch` for a spatial input without `flatten`.
    pub fn new(
        name: impl Into<String>,
        input_shape: Shape,
        options: FullyConnectedOptions,
    ) -> Result<Self> {
        let name = name.into();
        check_positive(&name, "output size", options.output_size)?;

        let input_features = if options.flatten {
            flatten_size(&input_shape)
        } else {
            match input_shape.dims() {
                [features] => *features,
                _ => {
                    return Err(LayerError::RankMismatch {
                        layer: name,
                        expected: 2,
                        got: input_shape.rank(),
                    })
                }
            }
        };
        check_positive(&name, "input features", input_features)?;

        let batch = match (options.flatten, options.batch_size) {
            (true, Some(hint)) => Some(hint),
            _ => input_shape.batch(),
        };
        let output_shape = Shape::flat(batch, options.output_size);
        debug!("{name}: fully connected {input_shape} -> {output_shape}");

        Ok(Self {
            name,
            input_shape,
            output_shape,
            weight_shape: [input_features, options.output_size],
            flatten: options.flatten,
            batch_size: options.batch_size,
            activation: options.activation,
            initializer: options.initializer,
            regularization_coefficient: options.regularization_coefficient,
            params: Parameters::Unmaterialized,
            activations: None,
        })
    }

    pub fn weight_shape(&self) -> [usize; 2] {
        self.weight_shape
    }

    /// Stddev of the truncated-normal weight initializer, `sqrt(2 / output_size)`.
    pub fn weight_stddev(&self) -> f64 {
        (2.0 / self.weight_shape[1] as f64).sqrt()
    }
}

impl<T: TensorElem + Float> Module<T> for FullyConnectedLayer<T> {
    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn input_shape(&self) -> &Shape {
        &self.input_shape
    }

    fn output_shape(&self) -> &Shape {
        &self.output_shape
    }

    fn materialize(&mut self, store: &mut dyn ParameterStore<T>) -> Result<()> {
        self.params.ensure_unmaterialized(&self.name)?;
        let affine = Affine::materialize(
            store,
            &self.name,
            self.weight_shape.to_vec(),
            self.initializer.weights(self.weight_stddev()),
        )?;
        self.params = Parameters::Materialized(affine);
        Ok(())
    }

    fn is_materialized(&self) -> bool {
        self.params.is_materialized()
    }

    fn forward(&mut self, input: LayerTensor<T>, _mode: Mode) -> Result<LayerTensor<T>> {
        let params = self.params.get(&self.name)?;
        let x = if self.flatten {
            input.flatten(self.batch_size, &self.name)?
        } else {
            input.into_flat(&self.name)?
        };
        if x.shape()[1] != self.weight_shape[0] {
            return Err(LayerError::ShapeMismatch {
                layer: self.name.clone(),
                expected: vec![self.weight_shape[0]],
                got: vec![x.shape()[1]],
            });
        }

        let weights = params.weights.view::<2>()?;
        let out = x.matmul(weights)?.add_bias(params.bias.value())?;
        let out = self.activation.apply(out);
        trace!("{}: forward {:?} -> {:?}", self.name, x.shape(), out.shape());

        let out = LayerTensor::Flat(out);
        self.activations = Some(out.clone());
        Ok(out)
    }

    fn parameters(&self) -> Vec<&Parameter<T>> {
        self.params
            .as_option()
            .map(Affine::parameters)
            .unwrap_or_default()
    }

    fn activations(&self) -> Option<&LayerTensor<T>> {
        self.activations.as_ref()
    }

    fn regularization_coefficient(&self) -> Option<f64> {
        Some(self.regularization_coefficient)
    }
}
