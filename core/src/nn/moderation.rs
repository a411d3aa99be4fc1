use super::layer::{check_positive, LayerError, LayerTensor, Mode, Result};
use super::shape::flatten_size;
use super::{Module, Shape};
use crate::tensor::{Tensor, TensorElem};
use log::{debug, trace};
use num_traits::Float;

/// Fuses a side-channel of moderating features into the activation path.
///
/// The input is flattened to `[batch, features]` when `flatten` is set, then the caller's
/// `[batch, feature_count]` tensor is appended along the feature axis.
#[derive(Debug, Clone)]
pub struct ModerationLayer {
    input_shape: Shape,
    output_shape: Shape,
    feature_count: usize,
    flatten: bool,
    batch_size: Option<usize>,
}

impl ModerationLayer {
    const LABEL: &'static str = "moderation";

    pub fn new(
        input_shape: Shape,
        feature_count: usize,
        flatten: bool,
        batch_size: Option<usize>,
    ) -> Result<Self> {
        check_positive(Self::LABEL, "feature count", feature_count)?;
        let input_features = if flatten {
            flatten_size(&input_shape)
        } else {
            match input_shape.dims() {
                [features] => *features,
                _ => {
                    return Err(LayerError::RankMismatch {
                        layer: Self::LABEL.to_string(),
                        expected: 2,
                        got: input_shape.rank(),
                    })
                }
            }
        };

        let batch = if flatten {
            batch_size.or(input_shape.batch())
        } else {
            input_shape.batch()
        };
        let output_shape = Shape::flat(batch, input_features + feature_count);
        debug!("moderation: {input_shape} + {feature_count} features -> {output_shape}");

        Ok(Self {
            input_shape,
            output_shape,
            feature_count,
            flatten,
            batch_size,
        })
    }

    pub fn feature_count(&self) -> usize {
        self.feature_count
    }

    /// Forward pass with the moderating features, `[batch, feature_count]`.
    ///
    /// # Errors
    ///
    /// `MissingFeatures` when `features` is `None`.
    pub fn forward_with_features<T: TensorElem + Float>(
        &mut self,
        input: LayerTensor<T>,
        _mode: Mode,
        features: Option<&Tensor<T, 2>>,
    ) -> Result<LayerTensor<T>> {
        let features = features.ok_or_else(|| LayerError::MissingFeatures {
            layer: Self::LABEL.to_string(),
        })?;
        if features.shape()[1] != self.feature_count {
            return Err(LayerError::ShapeMismatch {
                layer: Self::LABEL.to_string(),
                expected: vec![self.feature_count],
                got: vec![features.shape()[1]],
            });
        }

        let x = if self.flatten {
            input.flatten(self.batch_size, Self::LABEL)?
        } else {
            input.into_flat(Self::LABEL)?
        };
        let out = x.concat_features(features)?;
        trace!("moderation: {:?} + {:?} -> {:?}", x.shape(), features.shape(), out.shape());
        Ok(LayerTensor::Flat(out))
    }
}

impl<T: TensorElem + Float> Module<T> for ModerationLayer {
    fn input_shape(&self) -> &Shape {
        &self.input_shape
    }

    fn output_shape(&self) -> &Shape {
        &self.output_shape
    }

    /// Always `MissingFeatures`: use [`ModerationLayer::forward_with_features`].
    fn forward(&mut self, _input: LayerTensor<T>, _mode: Mode) -> Result<LayerTensor<T>> {
        Err(LayerError::MissingFeatures {
            layer: Self::LABEL.to_string(),
        })
    }
}
