use super::conv::CONV_WEIGHT_STDDEV;
use super::layer::{check_positive, LayerError, LayerTensor, Mode, Result};
use super::parameter::{Affine, Parameters};
use super::shape::transpose_conv_output_dim;
use super::{
    ActivationKind, InitializerKind, Module, Parameter, ParameterStore, Shape, UpscaleFactor,
};
use crate::config::UpsampleOptions;
use crate::tensor::TensorElem;
use log::{debug, trace};
use num_traits::Float;

/// Learned upsampling by transposed convolution.
///
/// The declared output shape keeps the INPUT channel count, while the transposed convolution
/// produces `num_filters` channels. Chained layers read the declared shape; forward returns
/// the computed one.
///
/// A transposed convolution needs an explicit target shape, and the batch is only known once a
/// tensor arrives, so forward derives the target from the runtime input:
/// `[batch, height * factor_h, width * factor_w, num_filters]`.
#[derive(Debug)]
pub struct UpsampleLayer<T: TensorElem> {
    name: String,
    input_shape: Shape,
    output_shape: Shape,
    /// `[filter, filter, input_channels, num_filters]`
    weight_shape: [usize; 4],
    upscale_factor: UpscaleFactor,
    activation: ActivationKind,
    batch_size: Option<usize>,
    initializer: InitializerKind,
    regularization_coefficient: f64,
    params: Parameters<Affine<T>>,
    activations: Option<LayerTensor<T>>,
}

impl<T: TensorElem + Float> UpsampleLayer<T> {
    pub fn new(name: impl Into<String>, input_shape: Shape, options: UpsampleOptions) -> Result<Self> {
        let name = name.into();
        let [height, width, channels] =
            input_shape.hwc().ok_or_else(|| LayerError::RankMismatch {
                layer: name.clone(),
                expected: 4,
                got: input_shape.rank(),
            })?;

        let [fh, fw] = options.upscale_factor.factors();
        check_positive(&name, "filter size", options.filter_size)?;
        check_positive(&name, "num filters", options.num_filters)?;
        check_positive(&name, "upscale factor", fh)?;
        check_positive(&name, "upscale factor", fw)?;

        let output_shape = Shape::spatial(
            input_shape.batch(),
            transpose_conv_output_dim(height, fh),
            transpose_conv_output_dim(width, fw),
            channels,
        );
        debug!(
            "{name}: upsample x{fh}/x{fw} {input_shape} -> {output_shape} ({} filters)",
            options.num_filters
        );

        Ok(Self {
            name,
            input_shape,
            output_shape,
            weight_shape: [
                options.filter_size,
                options.filter_size,
                channels,
                options.num_filters,
            ],
            upscale_factor: options.upscale_factor,
            activation: options.activation,
            batch_size: options.batch_size,
            initializer: options.initializer,
            regularization_coefficient: options.regularization_coefficient,
            params: Parameters::Unmaterialized,
            activations: None,
        })
    }

    pub fn weight_shape(&self) -> [usize; 4] {
        self.weight_shape
    }

    pub fn upscale_factor(&self) -> UpscaleFactor {
        self.upscale_factor
    }

    /// Declared batch size. Never used by forward.
    pub fn batch_size(&self) -> Option<usize> {
        self.batch_size
    }

    /// Target shape of the transposed convolution for a runtime input shape.
    pub fn target_shape(&self, input: &[usize; 4]) -> [usize; 4] {
        let [fh, fw] = self.upscale_factor.factors();
        [
            input[0],
            transpose_conv_output_dim(input[1], fh),
            transpose_conv_output_dim(input[2], fw),
            self.weight_shape[3],
        ]
    }
}

impl<T: TensorElem + Float> Module<T> for UpsampleLayer<T> {
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
            self.initializer.weights(CONV_WEIGHT_STDDEV),
        )?;
        self.params = Parameters::Materialized(affine);
        Ok(())
    }

    fn is_materialized(&self) -> bool {
        self.params.is_materialized()
    }

    fn forward(&mut self, input: LayerTensor<T>, _mode: Mode) -> Result<LayerTensor<T>> {
        let params = self.params.get(&self.name)?;
        let x = input.into_spatial(&self.name)?;
        let weights = params.weights.view::<4>()?;

        let target = self.target_shape(x.shape());
        let out = x
            .conv2d_transpose(weights, target, self.upscale_factor.factors())?
            .add_bias(params.bias.value())?;
        let out = self.activation.apply(out);
        trace!("{}: forward {:?} -> {:?}", self.name, x.shape(), target);

        self.activations = Some(LayerTensor::Spatial(out.clone()));
        LayerTensor::from_channels(out)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::ParameterRegistry;
    use crate::tensor::Tensor;

    #[test]
    fn test_declared_shape_keeps_input_channels() {
        let layer = UpsampleLayer::<f32>::new(
            "up1",
            Shape::spatial(None, 8, 8, 16),
            UpsampleOptions::new(3, 2, 2usize),
        )
        .unwrap();
        assert_eq!(layer.output_shape, Shape::spatial(None, 16, 16, 16));
        assert_eq!(layer.weight_shape(), [3, 3, 16, 2]);
    }

    #[test]
    fn test_per_axis_factor() {
        let layer = UpsampleLayer::<f32>::new(
            "up1",
            Shape::spatial(Some(2), 4, 5, 3),
            UpsampleOptions::new(3, 3, [2usize, 3]),
        )
        .unwrap();
        assert_eq!(layer.output_shape, Shape::spatial(Some(2), 8, 15, 3));
        assert_eq!(layer.target_shape(&[7, 4, 5, 3]), [7, 8, 15, 3]);
    }

    #[test]
    fn test_zero_factor_rejected() {
        let err = UpsampleLayer::<f32>::new(
            "up1",
            Shape::spatial(None, 4, 4, 1),
            UpsampleOptions::new(3, 1, 0usize),
        );
        assert!(matches!(err, Err(LayerError::InvalidHyperparameter { .. })));
    }

    #[test]
    fn test_runtime_batch_wins_over_hint() {
        let opts = UpsampleOptions {
            batch_size: Some(32),
            ..UpsampleOptions::new(3, 2, 2usize)
        };
        let mut layer =
            UpsampleLayer::<f32>::new("up1", Shape::spatial(Some(32), 8, 8, 16), opts).unwrap();
        layer.materialize(&mut ParameterRegistry::seeded(0)).unwrap();

        let x = LayerTensor::Spatial(Tensor::ones([4, 8, 8, 16]));
        let out = layer.forward(x, Mode::Training).unwrap();
        assert_eq!(out.dims(), vec![4, 16, 16, 2]);
        assert_eq!(layer.batch_size(), Some(32));
    }

    #[test]
    fn test_parameter_names() {
        let mut layer = UpsampleLayer::<f64>::new(
            "up1",
            Shape::spatial(None, 4, 4, 2),
            UpsampleOptions::new(2, 5, 2usize),
        )
        .unwrap();
        layer.materialize(&mut ParameterRegistry::seeded(0)).unwrap();
        let names: Vec<_> = layer.parameters().iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, ["up1_weights", "up1_bias"]);
        assert_eq!(layer.parameters()[1].shape(), &[5]);
    }
}
