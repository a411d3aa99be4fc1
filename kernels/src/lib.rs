//! CPU kernels for `phenonet`.
//!
//! Every kernel works on flat, row-major slices in **NHWC** layout
//! (`[batch, height, width, channels]`) and returns a freshly allocated `Vec<T>`.
//! The tensor crate wraps these with shape bookkeeping; keeping them here lets a
//! BLAS or GPU backend be swapped in without touching the layer code.

use num_traits::{FromPrimitive, Num, NumAssign, ToPrimitive};
use std::fmt::Debug;
use thiserror::Error;

pub mod cpu_conv2d;
pub mod cpu_conv_transpose2d;
pub mod cpu_lrn;
pub mod cpu_matmul;
pub mod cpu_pool;
pub mod padding;

pub use cpu_conv2d::cpu_conv2d;
pub use cpu_conv_transpose2d::cpu_conv_transpose2d;
pub use cpu_lrn::{cpu_local_response_norm, LrnParams};
pub use cpu_matmul::cpu_matmul;
pub use cpu_pool::{cpu_avg_pool2d, cpu_max_pool2d};
pub use padding::{same_padding, transpose_same_padding, SamePadding};

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, KernelError>;

/// Trait bound for elements that can be processed by kernels.
/// This mirrors `TensorElem` in the main crate to avoid circular dependencies.
pub trait KernelElem:
    Num + NumAssign + Copy + Clone + Debug + Send + Sync + FromPrimitive + ToPrimitive + PartialOrd
{
}

impl<T> KernelElem for T where
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

/// Checks that `shape` has rank 4 and that `data` holds exactly its element count.
pub(crate) fn check_nhwc<T>(data: &[T], shape: &[usize]) -> Result<[usize; 4]> {
    if shape.len() != 4 {
        return Err(KernelError::ShapeMismatch {
            expected: vec![4],
            got: vec![shape.len()],
        });
    }
    let size: usize = shape.iter().product();
    if data.len() != size {
        return Err(KernelError::ShapeMismatch {
            expected: vec![size],
            got: vec![data.len()],
        });
    }
    Ok([shape[0], shape[1], shape[2], shape[3]])
}

pub(crate) fn check_positive(name: &str, values: &[usize]) -> Result<()> {
    if values.iter().any(|&v| v == 0) {
        return Err(KernelError::InvalidArgument(format!(
            "{name} must be positive, got {values:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_nhwc() {
        let data = vec![0.0f32; 12];
        assert_eq!(check_nhwc(&data, &[1, 2, 2, 3]).unwrap(), [1, 2, 2, 3]);
        assert!(matches!(
            check_nhwc(&data, &[2, 2, 3]),
            Err(KernelError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            check_nhwc(&data, &[1, 2, 2, 2]),
            Err(KernelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_kernel_error_display() {
        let err = KernelError::InvalidArgument("stride must be positive".into());
        assert_eq!(
            format!("{}", err),
            "Invalid argument: stride must be positive"
        );
    }
}
