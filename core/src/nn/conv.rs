use super::layer::{check_positive, LayerError, LayerTensor, Mode, Result};
use super::parameter::{Affine, Parameters};
use super::shape::conv_output_dim;
use super::{ActivationKind, InitializerKind, Module, Parameter, ParameterStore, Shape};
use crate::config::ConvolutionOptions;
use crate::tensor::TensorElem;
use log::{debug, trace};
use num_traits::Float;

/// Stddev of the truncated-normal filter initializer.
pub const CONV_WEIGHT_STDDEV: f64 = 5e-2;

/// 2D convolution with same padding over NHWC input.
///
/// Filters are `[height, width, in_channels, out_channels]`. A single output channel is
/// squeezed away, so such a layer returns `[batch, height, width]`.
#[derive(Debug)]
pub struct ConvolutionLayer<T: TensorElem> {
    name: String,
    input_shape: Shape,
    output_shape: Shape,
    filter: [usize; 4],
    stride: usize,
    activation: ActivationKind,
    initializer: InitializerKind,
    regularization_coefficient: f64,
    params: Parameters<Affine<T>>,
    activations: Option<LayerTensor<T>>,
}

impl<T: TensorElem + Float> ConvolutionLayer<T> {
    /// Infers the output shape.
    ///
    /// # Errors
    ///
    /// - `RankMismatch` if `input_shape` is not spatial.
    /// - `InvalidHyperparameter` for a zero filter dimension or stride.
    /// - `ShapeMismatch` if the filter's input channels differ from the input's channels.
    pub fn new(
        name: impl Into<String>,
        input_shape: Shape,
        options: ConvolutionOptions,
    ) -> Result<Self> {
        let name = name.into();
        let [height, width, channels] =
            input_shape.hwc().ok_or_else(|| LayerError::RankMismatch {
                layer: name.clone(),
                expected: 4,
                got: input_shape.rank(),
            })?;

        let [kh, kw, in_channels, out_channels] = options.filter;
        check_positive(&name, "filter height", kh)?;
        check_positive(&name, "filter width", kw)?;
        check_positive(&name, "output channels", out_channels)?;
        check_positive(&name, "stride", options.stride)?;
        if in_channels != channels {
            return Err(LayerError::ShapeMismatch {
                layer: name,
                expected: vec![channels],
                got: vec![in_channels],
            });
        }

        let output_shape = Shape::spatial(
            input_shape.batch(),
            conv_output_dim(height, kh, options.stride),
            conv_output_dim(width, kw, options.stride),
            out_channels,
        );
        debug!("{name}: convolution {input_shape} -> {output_shape}");

        Ok(Self {
            name,
            input_shape,
            output_shape,
            filter: options.filter,
            stride: options.stride,
            activation: options.activation,
            initializer: options.initializer,
            regularization_coefficient: options.regularization_coefficient,
            params: Parameters::Unmaterialized,
            activations: None,
        })
    }

    pub fn filter(&self) -> [usize; 4] {
        self.filter
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn activation(&self) -> ActivationKind {
        self.activation
    }
}

impl<T: TensorElem + Float> Module<T> for ConvolutionLayer<T> {
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
            self.filter.to_vec(),
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

        let out = x
            .conv2d_same(weights, [self.stride, self.stride])?
            .add_bias(params.bias.value())?;
        let out = self.activation.apply(out);
        trace!("{}: forward {:?} -> {:?}", self.name, x.shape(), out.shape());

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

    fn conv(filter: [usize; 4], stride: usize) -> ConvolutionLayer<f32> {
        let opts = ConvolutionOptions {
            stride,
            ..ConvolutionOptions::new(filter)
        };
        ConvolutionLayer::new("conv1", Shape::spatial(None, 28, 28, 3), opts).unwrap()
    }

    #[test]
    fn test_output_shape() {
        assert_eq!(
            conv([5, 5, 3, 32], 1).output_shape,
            Shape::spatial(None, 28, 28, 32)
        );
        assert_eq!(
            conv([3, 3, 3, 16], 2).output_shape,
            Shape::spatial(None, 14, 14, 16)
        );
    }

    #[test]
    fn test_channel_mismatch_is_eager() {
        let err = ConvolutionLayer::<f32>::new(
            "conv1",
            Shape::spatial(None, 28, 28, 3),
            ConvolutionOptions::new([3, 3, 1, 8]),
        );
        assert!(matches!(err, Err(LayerError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_zero_stride_rejected() {
        let err = ConvolutionLayer::<f32>::new(
            "conv1",
            Shape::spatial(None, 28, 28, 3),
            ConvolutionOptions {
                stride: 0,
                ..ConvolutionOptions::new([3, 3, 3, 8])
            },
        );
        assert!(matches!(err, Err(LayerError::InvalidHyperparameter { .. })));
    }

    #[test]
    fn test_flat_input_rejected() {
        let err = ConvolutionLayer::<f32>::new(
            "conv1",
            Shape::flat(None, 10),
            ConvolutionOptions::new([3, 3, 1, 8]),
        );
        assert!(matches!(err, Err(LayerError::RankMismatch { .. })));
    }

    #[test]
    fn test_parameters_named_and_initialized() {
        let mut layer = conv([3, 3, 3, 4], 1);
        let mut registry = ParameterRegistry::seeded(1);
        layer.materialize(&mut registry).unwrap();

        let params = layer.parameters();
        assert_eq!(params[0].name(), "conv1_weights");
        assert_eq!(params[0].shape(), &[3, 3, 3, 4]);
        assert_eq!(params[1].name(), "conv1_bias");
        assert_eq!(params[1].value().data(), &[0.1; 4]);

        assert!(matches!(
            layer.materialize(&mut registry),
            Err(LayerError::AlreadyMaterialized { .. })
        ));
    }

    #[test]
    fn test_forward_before_materialize() {
        let mut layer = conv([3, 3, 3, 4], 1);
        let x = LayerTensor::Spatial(Tensor::zeros([1, 28, 28, 3]));
        assert!(matches!(
            layer.forward(x, Mode::Training),
            Err(LayerError::UninitializedParameter { layer }) if layer == "conv1"
        ));
    }

    #[test]
    fn test_forward_shape_and_cache() {
        let mut layer = conv([3, 3, 3, 4], 2);
        layer.materialize(&mut ParameterRegistry::seeded(1)).unwrap();
        let x = LayerTensor::Spatial(Tensor::ones([2, 28, 28, 3]));
        let out = layer.forward(x, Mode::Deterministic).unwrap();
        assert_eq!(out.dims(), vec![2, 14, 14, 4]);
        assert_eq!(layer.activations().map(LayerTensor::dims), Some(vec![2, 14, 14, 4]));
    }

    #[test]
    fn test_relu_output_nonnegative() {
        let opts = ConvolutionOptions {
            activation: ActivationKind::Relu,
            ..ConvolutionOptions::new([3, 3, 1, 2])
        };
        let mut layer =
            ConvolutionLayer::<f32>::new("conv1", Shape::spatial(None, 4, 4, 1), opts).unwrap();
        layer.materialize(&mut ParameterRegistry::seeded(5)).unwrap();
        let x = Tensor::new((0..16).map(|i| i as f32 - 8.0).collect(), [1, 4, 4, 1]).unwrap();
        let out = layer.forward(LayerTensor::Spatial(x), Mode::Training).unwrap();
        assert!(out.data().iter().all(|v| *v >= 0.0));
    }
}
