//! Shape arithmetic.
//!
//! Layers infer their output shape at construction time, before any tensor exists. The batch
//! slot of a [`Shape`] may stay symbolic (`None`) until a forward pass sees a real batch, so
//! every function here works on the non-batch dimensions only.

use serde::{Deserialize, Serialize};
use std::fmt;

pub use phenonet_kernels::{same_padding, transpose_same_padding, SamePadding};

/// A tensor shape with a possibly symbolic batch dimension.
///
/// Spatial shapes carry `[height, width, channels]` in `dims`, flat shapes carry `[features]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    batch: Option<usize>,
    dims: Vec<usize>,
}

impl Shape {
    pub fn new(batch: Option<usize>, dims: Vec<usize>) -> Self {
        Self { batch, dims }
    }

    /// `[batch, height, width, channels]`.
    pub fn spatial(batch: Option<usize>, height: usize, width: usize, channels: usize) -> Self {
        Self::new(batch, vec![height, width, channels])
    }

    /// `[batch, features]`.
    pub fn flat(batch: Option<usize>, features: usize) -> Self {
        Self::new(batch, vec![features])
    }

    pub fn batch(&self) -> Option<usize> {
        self.batch
    }

    /// The non-batch dimensions.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Full rank, counting the batch slot.
    pub fn rank(&self) -> usize {
        self.dims.len() + 1
    }

    pub fn is_spatial(&self) -> bool {
        self.dims.len() == 3
    }

    pub fn is_flat(&self) -> bool {
        self.dims.len() == 1
    }

    /// Trailing dimension (channels for spatial shapes, features for flat ones).
    pub fn last_dim(&self) -> Option<usize> {
        self.dims.last().copied()
    }

    /// `[height, width, channels]` if this is a spatial shape.
    pub fn hwc(&self) -> Option<[usize; 3]> {
        match self.dims[..] {
            [h, w, c] => Some([h, w, c]),
            _ => None,
        }
    }

    /// Full dimensions with the batch slot resolved to `batch` when symbolic.
    pub fn resolved(&self, batch: usize) -> Vec<usize> {
        std::iter::once(self.batch.unwrap_or(batch))
            .chain(self.dims.iter().copied())
            .collect()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        match self.batch {
            Some(b) => write!(f, "{b}")?,
            None => write!(f, "?")?,
        }
        for d in &self.dims {
            write!(f, ", {d}")?;
        }
        write!(f, "]")
    }
}

/// Upscale factor of a transposed convolution: one value for both spatial axes, or one per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpscaleFactor {
    Uniform(usize),
    PerAxis([usize; 2]),
}

impl UpscaleFactor {
    /// `[height_factor, width_factor]`.
    pub fn factors(self) -> [usize; 2] {
        match self {
            UpscaleFactor::Uniform(f) => [f, f],
            UpscaleFactor::PerAxis(f) => f,
        }
    }
}

impl From<usize> for UpscaleFactor {
    fn from(f: usize) -> Self {
        UpscaleFactor::Uniform(f)
    }
}

impl From<[usize; 2]> for UpscaleFactor {
    fn from(f: [usize; 2]) -> Self {
        UpscaleFactor::PerAxis(f)
    }
}

/// Output size of a same-padded convolution along one axis:
/// `floor((input - kernel + 2 * floor(kernel / 2)) / stride) + 1`.
///
/// Matches the runtime shape for odd kernels. For even kernels the runtime padding is
/// asymmetric and the runtime size is `ceil(input / stride)`, which can differ by one.
/// `stride` must be positive.
pub fn conv_output_dim(input_dim: usize, kernel_dim: usize, stride: usize) -> usize {
    (input_dim + 2 * (kernel_dim / 2)).saturating_sub(kernel_dim) / stride + 1
}

/// Output size of a pooling window along one axis.
///
/// Even kernels: `floor((input - kernel) / stride + 1)`. Odd kernels add one more.
/// Negative intermediate values floor toward minus infinity and the result clamps at zero.
/// `stride` must be positive.
pub fn pool_output_dim(input_dim: usize, kernel_size: usize, stride: usize) -> usize {
    let diff = input_dim as i64 - kernel_size as i64;
    let mut out = diff.div_euclid(stride as i64) + 1;
    if kernel_size % 2 == 1 {
        out += 1;
    }
    out.max(0) as usize
}

/// Number of features per batch entry: the product of all non-batch dimensions.
pub fn flatten_size(shape: &Shape) -> usize {
    shape.dims().iter().product()
}

pub fn transpose_conv_output_dim(input_dim: usize, scale_factor: usize) -> usize {
    input_dim * scale_factor
}
