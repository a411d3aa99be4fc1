//! The closed set of layer kinds and the values that flow between them.
//!
//! A [`Layer`] is built in two phases. Construction only infers the output [`Shape`];
//! [`Module::materialize`] later allocates parameters from a [`ParameterStore`]. Forward passes
//! take a [`LayerTensor`] (whose rank can change from layer to layer) and a [`Mode`].

use super::{
    BatchNormLayer, ConvolutionLayer, DropoutLayer, FullyConnectedLayer, InputLayer,
    ModerationLayer, Module, NormalizationLayer, Parameter, ParameterStore, PoolingLayer, Shape,
    UpsampleLayer,
};
use crate::tensor::{Tensor, TensorElem, TensorError};
use num_traits::Float;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LayerError {
    #[error("{layer}: shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        layer: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("{layer}: expected a rank {expected} input, got rank {got}")]
    RankMismatch {
        layer: String,
        expected: usize,
        got: usize,
    },
    #[error("{layer}: forward pass before materialization")]
    UninitializedParameter { layer: String },
    #[error("{layer}: parameters already materialized")]
    AlreadyMaterialized { layer: String },
    #[error("{layer}: invalid hyperparameter: {reason}")]
    InvalidHyperparameter { layer: String, reason: String },
    #[error("parameter {0} already exists")]
    DuplicateParameter(String),
    #[error("{layer}: forward pass requires moderating features")]
    MissingFeatures { layer: String },
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

pub type Result<T> = std::result::Result<T, LayerError>;

/// Rejects zero-valued hyperparameters.
pub(crate) fn check_positive(layer: &str, name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(LayerError::InvalidHyperparameter {
            layer: layer.to_string(),
            reason: format!("{name} must be positive"),
        });
    }
    Ok(())
}

/// Forward-pass behaviour switch.
///
/// `Deterministic` is inference: dropout is disabled and batch normalization folds the batch
/// into its running statistics and normalizes with them. `Training` masks activations and
/// normalizes with raw batch statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Training,
    Deterministic,
}

impl Mode {
    pub fn is_deterministic(self) -> bool {
        self == Mode::Deterministic
    }
}

impl From<bool> for Mode {
    /// `true` is deterministic.
    fn from(deterministic: bool) -> Self {
        if deterministic {
            Mode::Deterministic
        } else {
            Mode::Training
        }
    }
}

/// A batch travelling between layers.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerTensor<T: TensorElem> {
    /// `[batch, features]`
    Flat(Tensor<T, 2>),
    /// `[batch, height, width]`: a single-channel map with its channel axis squeezed away.
    Squeezed(Tensor<T, 3>),
    /// `[batch, height, width, channels]`
    Spatial(Tensor<T, 4>),
}

impl<T: TensorElem> LayerTensor<T> {
    pub fn dims(&self) -> Vec<usize> {
        match self {
            LayerTensor::Flat(t) => t.shape().to_vec(),
            LayerTensor::Squeezed(t) => t.shape().to_vec(),
            LayerTensor::Spatial(t) => t.shape().to_vec(),
        }
    }

    pub fn rank(&self) -> usize {
        match self {
            LayerTensor::Flat(_) => 2,
            LayerTensor::Squeezed(_) => 3,
            LayerTensor::Spatial(_) => 4,
        }
    }

    /// Runtime batch size.
    pub fn batch(&self) -> usize {
        match self {
            LayerTensor::Flat(t) => t.shape()[0],
            LayerTensor::Squeezed(t) => t.shape()[0],
            LayerTensor::Spatial(t) => t.shape()[0],
        }
    }

    pub fn data(&self) -> &[T] {
        match self {
            LayerTensor::Flat(t) => t.data(),
            LayerTensor::Squeezed(t) => t.data(),
            LayerTensor::Spatial(t) => t.data(),
        }
    }

    /// Squeezes the channel axis away when there is exactly one channel.
    pub fn from_channels(t: Tensor<T, 4>) -> Result<Self> {
        if t.shape()[3] == 1 {
            Ok(LayerTensor::Squeezed(t.squeeze_channels()?))
        } else {
            Ok(LayerTensor::Spatial(t))
        }
    }

    /// Unwraps a rank-4 value; `layer` labels the error.
    pub fn into_spatial(self, layer: &str) -> Result<Tensor<T, 4>> {
        match self {
            LayerTensor::Spatial(t) => Ok(t),
            other => Err(LayerError::RankMismatch {
                layer: layer.to_string(),
                expected: 4,
                got: other.rank(),
            }),
        }
    }

    /// Unwraps a rank-2 value; `layer` labels the error.
    pub fn into_flat(self, layer: &str) -> Result<Tensor<T, 2>> {
        match self {
            LayerTensor::Flat(t) => Ok(t),
            other => Err(LayerError::RankMismatch {
                layer: layer.to_string(),
                expected: 2,
                got: other.rank(),
            }),
        }
    }

    /// Reshapes to `[batch, -1]`. `batch` defaults to the runtime batch.
    pub fn flatten(self, batch: Option<usize>, layer: &str) -> Result<Tensor<T, 2>> {
        let batch = batch.unwrap_or_else(|| self.batch());
        let dims = self.dims();
        let size: usize = dims.iter().product();
        if batch == 0 || size % batch != 0 {
            return Err(LayerError::ShapeMismatch {
                layer: layer.to_string(),
                expected: vec![batch],
                got: dims,
            });
        }
        let flat = match self {
            LayerTensor::Flat(t) => t.reshape([batch, size / batch])?,
            LayerTensor::Squeezed(t) => t.reshape([batch, size / batch])?,
            LayerTensor::Spatial(t) => t.reshape([batch, size / batch])?,
        };
        Ok(flat)
    }
}

impl<T: TensorElem> From<Tensor<T, 2>> for LayerTensor<T> {
    fn from(t: Tensor<T, 2>) -> Self {
        LayerTensor::Flat(t)
    }
}

impl<T: TensorElem> From<Tensor<T, 3>> for LayerTensor<T> {
    fn from(t: Tensor<T, 3>) -> Self {
        LayerTensor::Squeezed(t)
    }
}

impl<T: TensorElem> From<Tensor<T, 4>> for LayerTensor<T> {
    fn from(t: Tensor<T, 4>) -> Self {
        LayerTensor::Spatial(t)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    Input,
    Convolution,
    Upsample,
    Pooling,
    FullyConnected,
    BatchNorm,
    Dropout,
    Normalization,
    Moderation,
}

impl LayerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LayerKind::Input => "input",
            LayerKind::Convolution => "convolution",
            LayerKind::Upsample => "upsample",
            LayerKind::Pooling => "pooling",
            LayerKind::FullyConnected => "fully_connected",
            LayerKind::BatchNorm => "batch_norm",
            LayerKind::Dropout => "dropout",
            LayerKind::Normalization => "normalization",
            LayerKind::Moderation => "moderation",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One layer of any kind.
#[derive(Debug)]
pub enum Layer<T: TensorElem + Float> {
    Input(InputLayer),
    Convolution(ConvolutionLayer<T>),
    Upsample(UpsampleLayer<T>),
    Pooling(PoolingLayer),
    FullyConnected(FullyConnectedLayer<T>),
    BatchNorm(BatchNormLayer<T>),
    Dropout(DropoutLayer),
    Normalization(NormalizationLayer),
    Moderation(ModerationLayer),
}

macro_rules! dispatch {
    ($layer:expr, $inner:ident => $body:expr) => {
        match $layer {
            Layer::Input($inner) => $body,
            Layer::Convolution($inner) => $body,
            Layer::Upsample($inner) => $body,
            Layer::Pooling($inner) => $body,
            Layer::FullyConnected($inner) => $body,
            Layer::BatchNorm($inner) => $body,
            Layer::Dropout($inner) => $body,
            Layer::Normalization($inner) => $body,
            Layer::Moderation($inner) => $body,
        }
    };
}

impl<T: TensorElem + Float> Layer<T> {
    pub fn kind(&self) -> LayerKind {
        match self {
            Layer::Input(_) => LayerKind::Input,
            Layer::Convolution(_) => LayerKind::Convolution,
            Layer::Upsample(_) => LayerKind::Upsample,
            Layer::Pooling(_) => LayerKind::Pooling,
            Layer::FullyConnected(_) => LayerKind::FullyConnected,
            Layer::BatchNorm(_) => LayerKind::BatchNorm,
            Layer::Dropout(_) => LayerKind::Dropout,
            Layer::Normalization(_) => LayerKind::Normalization,
            Layer::Moderation(_) => LayerKind::Moderation,
        }
    }

    /// Forward pass with moderating features. Only [`ModerationLayer`] reads `features`;
    /// every other kind ignores them.
    pub fn forward_with_features(
        &mut self,
        input: LayerTensor<T>,
        mode: Mode,
        features: Option<&Tensor<T, 2>>,
    ) -> Result<LayerTensor<T>> {
        match self {
            Layer::Moderation(layer) => layer.forward_with_features(input, mode, features),
            other => other.forward(input, mode),
        }
    }

    /// Parameters an optimizer may update.
    pub fn trainable_parameters(&self) -> Vec<&Parameter<T>> {
        self.parameters()
            .into_iter()
            .filter(|p| p.trainable())
            .collect()
    }
}

impl<T: TensorElem + Float> Module<T> for Layer<T> {
    fn name(&self) -> Option<&str> {
        dispatch!(self, l => Module::<T>::name(l))
    }

    fn input_shape(&self) -> &Shape {
        dispatch!(self, l => Module::<T>::input_shape(l))
    }

    fn output_shape(&self) -> &Shape {
        dispatch!(self, l => Module::<T>::output_shape(l))
    }

    fn materialize(&mut self, store: &mut dyn ParameterStore<T>) -> Result<()> {
        dispatch!(self, l => l.materialize(store))
    }

    fn is_materialized(&self) -> bool {
        dispatch!(self, l => Module::<T>::is_materialized(l))
    }

    fn forward(&mut self, input: LayerTensor<T>, mode: Mode) -> Result<LayerTensor<T>> {
        dispatch!(self, l => l.forward(input, mode))
    }

    fn parameters(&self) -> Vec<&Parameter<T>> {
        dispatch!(self, l => Module::<T>::parameters(l))
    }

    fn activations(&self) -> Option<&LayerTensor<T>> {
        dispatch!(self, l => Module::<T>::activations(l))
    }

    fn regularization_coefficient(&self) -> Option<f64> {
        dispatch!(self, l => Module::<T>::regularization_coefficient(l))
    }
}

macro_rules! impl_from_layer {
    ($variant:ident, $ty:ty) => {
        impl<T: TensorElem + Float> From<$ty> for Layer<T> {
            fn from(layer: $ty) -> Self {
                Layer::$variant(layer)
            }
        }
    };
}

impl_from_layer!(Input, InputLayer);
impl_from_layer!(Convolution, ConvolutionLayer<T>);
impl_from_layer!(Upsample, UpsampleLayer<T>);
impl_from_layer!(Pooling, PoolingLayer);
impl_from_layer!(FullyConnected, FullyConnectedLayer<T>);
impl_from_layer!(BatchNorm, BatchNormLayer<T>);
impl_from_layer!(Dropout, DropoutLayer);
impl_from_layer!(Normalization, NormalizationLayer);
impl_from_layer!(Moderation, ModerationLayer);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_bool() {
        assert_eq!(Mode::from(true), Mode::Deterministic);
        assert_eq!(Mode::from(false), Mode::Training);
        assert!(Mode::Deterministic.is_deterministic());
    }

    #[test]
    fn test_from_channels_squeezes_single_channel() {
        let one = LayerTensor::from_channels(Tensor::<f32, 4>::zeros([2, 4, 4, 1])).unwrap();
        assert_eq!(one.rank(), 3);
        assert_eq!(one.dims(), vec![2, 4, 4]);

        let two = LayerTensor::from_channels(Tensor::<f32, 4>::zeros([2, 4, 4, 2])).unwrap();
        assert_eq!(two.rank(), 4);
    }

    #[test]
    fn test_flatten_with_and_without_hint() {
        let x = LayerTensor::Spatial(Tensor::<f32, 4>::zeros([4, 2, 2, 3]));
        assert_eq!(x.clone().flatten(None, "fc").unwrap().shape(), &[4, 12]);
        assert_eq!(x.clone().flatten(Some(2), "fc").unwrap().shape(), &[2, 24]);
        assert!(matches!(
            x.flatten(Some(5), "fc"),
            Err(LayerError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_rank_mismatch() {
        let x = LayerTensor::Flat(Tensor::<f32, 2>::zeros([2, 3]));
        assert!(matches!(
            x.into_spatial("conv1"),
            Err(LayerError::RankMismatch { expected: 4, got: 2, .. })
        ));
    }

    #[test]
    fn test_error_display() {
        let err = LayerError::UninitializedParameter {
            layer: "conv1".into(),
        };
        assert_eq!(err.to_string(), "conv1: forward pass before materialization");
        assert_eq!(LayerKind::FullyConnected.to_string(), "fully_connected");
    }
}
