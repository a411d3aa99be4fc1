//! Core Tensor implementation.
//!
//! A **Tensor** here is a dense, row-major, multi-dimensional array whose rank is a const
//! generic. Spatial activations are laid out **NHWC** (`[batch, height, width, channels]`),
//! flat activations as `[batch, features]`.
//!
//! ```rust
//! use phenonet::tensor::Tensor;
//!
//! let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
//! let tensor = Tensor::<f32, 2>::new(data, [2, 3]).unwrap();
//!
//! assert_eq!(tensor.shape(), &[2, 3]);
//! assert_eq!(tensor.data(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! ```
//!
//! # `const RANK` vs dynamic rank
//!
//! The rank lives in the type so that kernels and layers state what they accept
//! (`Tensor<T, 4>` for a convolution input). The batch size stays a runtime value, which is
//! what lets the same layer run on different batch sizes. Values that change rank between
//! layers travel as [`crate::nn::LayerTensor`].

use num_traits::{FromPrimitive, Num, NumAssign, ToPrimitive};
use std::fmt::Debug;
use thiserror::Error;

pub mod ops;

/// Error type for Tensor operations.
#[derive(Error, Debug)]
pub enum TensorError {
    /// The shape of the data does not match the expected shape.
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    /// An index is out of bounds for the given shape.
    #[error("Index out of bounds: index {index:?} for shape {shape:?}")]
    IndexOutOfBounds {
        index: Vec<usize>,
        shape: Vec<usize>,
    },
    /// The requested operation is not supported (e.g., for a specific rank or type).
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl From<phenonet_kernels::KernelError> for TensorError {
    fn from(err: phenonet_kernels::KernelError) -> Self {
        match err {
            phenonet_kernels::KernelError::ShapeMismatch { expected, got } => {
                TensorError::ShapeMismatch { expected, got }
            }
            phenonet_kernels::KernelError::InvalidArgument(msg) => TensorError::Unsupported(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, TensorError>;

/// Trait bound for elements that can be stored in a Tensor.
///
/// - `Copy`: elements live in a contiguous `Vec<T>` and are read by value in kernels.
/// - `Num + NumAssign + FromPrimitive`: arithmetic and constant conversion.
/// - `Send + Sync`: required for parallel execution via `rayon`.
pub trait TensorElem:
    Num + NumAssign + Copy + Clone + Debug + Send + Sync + FromPrimitive + ToPrimitive + PartialOrd
{
}

impl<T> TensorElem for T where
    T: Num
        + NumAssign
        + Copy
        + Clone
        + Debug
        + Send
        + Sync
        + FromPrimitive
        + ToPrimitive
        + PartialOrd
{
}

/// The core Tensor struct.
///
/// # Generics
///
/// - `T`: The element type (must implement `TensorElem`).
/// - `RANK`: The number of dimensions.
#[derive(Clone, PartialEq)]
pub struct Tensor<T, const RANK: usize>
where
    T: TensorElem,
{
    shape: [usize; RANK],
    strides: [usize; RANK],
    data: Vec<T>,
}

impl<T, const RANK: usize> Tensor<T, RANK>
where
    T: TensorElem,
{
    /// Creates a new Tensor from a vector of data and a shape.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if the length of `data` does not match the product of `shape`.
    pub fn new(data: Vec<T>, shape: [usize; RANK]) -> Result<Self> {
        let size: usize = shape.iter().product();
        if data.len() != size {
            return Err(TensorError::ShapeMismatch {
                expected: vec![size],
                got: vec![data.len()],
            });
        }

        Ok(Self {
            shape,
            strides: compute_strides(&shape),
            data,
        })
    }

    /// Creates a new Tensor filled with `value`.
    pub fn full(shape: [usize; RANK], value: T) -> Self {
        let size: usize = shape.iter().product();
        Self {
            shape,
            strides: compute_strides(&shape),
            data: vec![value; size],
        }
    }

    /// Creates a new Tensor filled with zeros.
    pub fn zeros(shape: [usize; RANK]) -> Self {
        Self::full(shape, T::zero())
    }

    /// Creates a new Tensor filled with ones.
    pub fn ones(shape: [usize; RANK]) -> Self {
        Self::full(shape, T::one())
    }

    /// Reshapes the tensor to a new shape.
    ///
    /// The number of elements must remain the same. The data is moved, not copied.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if the total number of elements in `new_shape`
    /// does not match the current size of the tensor.
    pub fn reshape<const NEW_RANK: usize>(
        self,
        new_shape: [usize; NEW_RANK],
    ) -> Result<Tensor<T, NEW_RANK>> {
        let current_size: usize = self.shape.iter().product();
        let new_size: usize = new_shape.iter().product();

        if current_size != new_size {
            return Err(TensorError::ShapeMismatch {
                expected: vec![current_size],
                got: vec![new_size],
            });
        }

        Ok(Tensor {
            shape: new_shape,
            strides: compute_strides(&new_shape),
            data: self.data,
        })
    }

    /// Returns the shape of the tensor.
    pub const fn shape(&self) -> &[usize; RANK] {
        &self.shape
    }

    /// Returns the strides of the tensor.
    pub const fn strides(&self) -> &[usize; RANK] {
        &self.strides
    }

    /// Returns a reference to the underlying data as a slice.
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Returns a mutable reference to the underlying data as a slice.
    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Consumes the tensor and returns its flat data.
    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    /// Borrows the tensor as a [`TensorView`].
    pub fn view(&self) -> TensorView<'_, T, RANK> {
        TensorView {
            shape: self.shape,
            data: &self.data,
        }
    }

    /// Returns the total number of elements in the tensor.
    pub const fn size(&self) -> usize {
        let mut size = 1;
        let mut i = 0;
        while i < RANK {
            size *= self.shape[i];
            i += 1;
        }
        size
    }
}

/// Computes row-major strides for a given shape.
pub(crate) const fn compute_strides<const RANK: usize>(shape: &[usize; RANK]) -> [usize; RANK] {
    let mut strides = [0; RANK];
    let mut stride = 1;
    let mut i = RANK;
    while i > 0 {
        i -= 1;
        strides[i] = stride;
        stride *= shape[i];
    }
    strides
}

/// Read-only tensor over borrowed data.
///
/// Operands that are only read (filters, the right-hand side of a matmul) are taken as views,
/// so a parameter stored flat can be fed to a kernel at its declared rank without a copy.
#[derive(Debug, Clone, Copy)]
pub struct TensorView<'a, T, const RANK: usize> {
    shape: [usize; RANK],
    data: &'a [T],
}

impl<'a, T, const RANK: usize> TensorView<'a, T, RANK> {
    /// # Errors
    ///
    /// `ShapeMismatch` if `shape.len() != RANK` or the element count is wrong.
    pub fn from_dims(data: &'a [T], shape: &[usize]) -> Result<Self> {
        let shape: [usize; RANK] = shape.try_into().map_err(|_| TensorError::ShapeMismatch {
            expected: vec![RANK],
            got: vec![shape.len()],
        })?;
        let size: usize = shape.iter().product();
        if data.len() != size {
            return Err(TensorError::ShapeMismatch {
                expected: vec![size],
                got: vec![data.len()],
            });
        }
        Ok(Self { shape, data })
    }

    pub const fn shape(&self) -> &[usize; RANK] {
        &self.shape
    }

    pub fn data(&self) -> &'a [T] {
        self.data
    }
}

impl<'a, T: TensorElem, const RANK: usize> From<&'a Tensor<T, RANK>> for TensorView<'a, T, RANK> {
    fn from(tensor: &'a Tensor<T, RANK>) -> Self {
        tensor.view()
    }
}

impl<T, const RANK: usize> Debug for Tensor<T, RANK>
where
    T: TensorElem,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("data_len", &self.data.len())
            .finish()
    }
}
