use super::layer::{check_positive, LayerError, LayerTensor, Mode, Result};
use super::shape::pool_output_dim;
use super::{Module, Shape};
use crate::config::PoolingOptions;
use crate::tensor::TensorElem;
use log::{debug, trace};
use num_traits::Float;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolingKind {
    #[default]
    Max,
    Avg,
}

/// Same-padded 2D max or average pooling.
#[derive(Debug, Clone)]
pub struct PoolingLayer {
    input_shape: Shape,
    output_shape: Shape,
    kernel_size: usize,
    stride: usize,
    kind: PoolingKind,
}

impl PoolingLayer {
    const LABEL: &'static str = "pooling";

    /// Infers the output shape with [`pool_output_dim`] on height and width.
    ///
    /// # Errors
    ///
    /// `InvalidHyperparameter` for a zero kernel or stride, or when [`pool_output_dim`] declares
    /// zero output rows or columns. That happens when the kernel is larger than the input, even
    /// though same padding would still produce a `ceil(in / stride)` output at run time. The
    /// declared shape is what downstream layers are built from, so a zero declaration is refused.
    pub fn new(input_shape: Shape, options: PoolingOptions) -> Result<Self> {
        let [height, width, channels] =
            input_shape.hwc().ok_or_else(|| LayerError::RankMismatch {
                layer: Self::LABEL.to_string(),
                expected: 4,
                got: input_shape.rank(),
            })?;
        check_positive(Self::LABEL, "kernel size", options.kernel_size)?;
        check_positive(Self::LABEL, "stride", options.stride)?;

        let out_h = pool_output_dim(height, options.kernel_size, options.stride);
        let out_w = pool_output_dim(width, options.kernel_size, options.stride);
        if out_h == 0 || out_w == 0 {
            return Err(LayerError::InvalidHyperparameter {
                layer: Self::LABEL.to_string(),
                reason: format!(
                    "kernel {} with stride {} declares a {out_h}x{out_w} output for {input_shape}",
                    options.kernel_size, options.stride
                ),
            });
        }

        let output_shape = Shape::spatial(input_shape.batch(), out_h, out_w, channels);
        debug!("{:?} pooling {input_shape} -> {output_shape}", options.kind);
        Ok(Self {
            input_shape,
            output_shape,
            kernel_size: options.kernel_size,
            stride: options.stride,
            kind: options.kind,
        })
    }

    pub fn kind(&self) -> PoolingKind {
        self.kind
    }
}

impl<T: TensorElem + Float> Module<T> for PoolingLayer {
    fn input_shape(&self) -> &Shape {
        &self.input_shape
    }

    fn output_shape(&self) -> &Shape {
        &self.output_shape
    }

    fn forward(&mut self, input: LayerTensor<T>, _mode: Mode) -> Result<LayerTensor<T>> {
        let x = input.into_spatial(Self::LABEL)?;
        let kernel = [self.kernel_size, self.kernel_size];
        let stride = [self.stride, self.stride];
        let out = match self.kind {
            PoolingKind::Max => x.max_pool2d(kernel, stride)?,
            PoolingKind::Avg => x.avg_pool2d(kernel, stride)?,
        };
        trace!("{:?} pool {:?} -> {:?}", self.kind, x.shape(), out.shape());
        Ok(LayerTensor::Spatial(out))
    }
}
