//! Tensor operations.
//!
//! This module is the compute engine behind the layers:
//! - **Element-wise arithmetic**: `+` on equally shaped tensors, and `map`.
//! - **Broadcasting helpers**: per-channel bias add over the last axis, batch-statistics
//!   normalization over the leading (batch) axis.
//! - **Spatial primitives** (NHWC): same-padded convolution, transposed convolution with an
//!   explicit output shape, max/average pooling, local response normalization.
//! - **Shape plumbing**: trailing-singleton squeeze, feature-axis concatenation, moments.
//!
//! Heavy lifting is delegated to `phenonet_kernels`; element-wise work runs on `rayon`.
//!
//! ```rust
//! use phenonet::tensor::Tensor;
//!
//! let a = Tensor::<f32, 1>::new(vec![1.0, 2.0], [2]).unwrap();
//! let b = Tensor::<f32, 1>::new(vec![3.0, 4.0], [2]).unwrap();
//!
//! let c = (&a + &b).unwrap();
//! assert_eq!(c.data(), &[4.0, 6.0]);
//! ```

use super::{compute_strides, Result, Tensor, TensorElem, TensorError, TensorView};
use num_traits::Float;
use phenonet_kernels::LrnParams;
use rayon::prelude::*;
use std::ops::Add;

/// Implements a binary arithmetic operation trait (e.g., `Add`) for `&Tensor`.
///
/// Shapes must match exactly; the operation runs element-wise in parallel.
macro_rules! impl_bin_op {
    ($trait:ident, $method:ident) => {
        impl<T, const RANK: usize> $trait for &Tensor<T, RANK>
        where
            T: TensorElem,
        {
            type Output = crate::tensor::Result<Tensor<T, RANK>>;

            fn $method(self, rhs: Self) -> Self::Output {
                if self.shape != rhs.shape {
                    return Err(TensorError::ShapeMismatch {
                        expected: self.shape.to_vec(),
                        got: rhs.shape.to_vec(),
                    });
                }

                let mut out = Tensor::zeros(self.shape);
                out.data
                    .par_iter_mut()
                    .zip(self.data.par_iter())
                    .zip(rhs.data.par_iter())
                    .for_each(|((o, a), b)| {
                        *o = a.$method(*b);
                    });

                Ok(out)
            }
        }
    };
}

impl_bin_op!(Add, add);

impl<T, const RANK: usize> Tensor<T, RANK>
where
    T: TensorElem,
{
    /// Applies a function element-wise, returning a new tensor of the same shape.
    ///
    /// ```rust
    /// use phenonet::tensor::Tensor;
    /// let t = Tensor::<f32, 1>::new(vec![1.0, 2.0, 3.0], [3]).unwrap();
    /// let squared = t.map(|x| x * x);
    /// assert_eq!(squared.data(), &[1.0, 4.0, 9.0]);
    /// ```
    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(T) -> T + Sync + Send,
    {
        let mut out = Tensor::zeros(self.shape);
        out.data
            .par_iter_mut()
            .zip(self.data.par_iter())
            .for_each(|(o, i)| *o = f(*i));
        out
    }

    /// Adds a bias vector along the last axis (one value per channel / output feature).
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if `bias` is not as long as the last dimension.
    pub fn add_bias(&self, bias: &Tensor<T, 1>) -> Result<Self> {
        let last_dim = if RANK == 0 { 1 } else { self.shape[RANK - 1] };
        if bias.shape[0] != last_dim {
            return Err(TensorError::ShapeMismatch {
                expected: vec![last_dim],
                got: vec![bias.shape[0]],
            });
        }

        let mut out = self.clone();
        if last_dim == 0 {
            return Ok(out);
        }
        out.data.par_chunks_mut(last_dim).for_each(|row| {
            for (v, b) in row.iter_mut().zip(bias.data.iter()) {
                *v += *b;
            }
        });
        Ok(out)
    }

    /// Computes the mean and (population) variance over axis 0.
    ///
    /// Both results are flat: element `i` is the statistic of position `i` within one batch
    /// entry, i.e. their length is `size / shape[0]`.
    ///
    /// # Errors
    ///
    /// `Unsupported` for rank-0 tensors or an empty batch axis.
    pub fn moments(&self) -> Result<(Tensor<T, 1>, Tensor<T, 1>)> {
        if RANK == 0 || self.shape[0] == 0 {
            return Err(TensorError::Unsupported(
                "moments require a non-empty batch axis".into(),
            ));
        }
        let batch = self.shape[0];
        let inner = self.size() / batch;
        let n = T::from_usize(batch)
            .ok_or_else(|| TensorError::Unsupported(format!("batch {batch} overflows element type")))?;

        let mut mean = vec![T::zero(); inner];
        let mut var = vec![T::zero(); inner];

        mean.par_iter_mut()
            .zip(var.par_iter_mut())
            .enumerate()
            .for_each(|(i, (m, v))| {
                let mut sum = T::zero();
                for b in 0..batch {
                    sum += self.data[b * inner + i];
                }
                let mu = sum / n;
                let mut sq = T::zero();
                for b in 0..batch {
                    let d = self.data[b * inner + i] - mu;
                    sq += d * d;
                }
                *m = mu;
                *v = sq / n;
            });

        Ok((Tensor::new(mean, [inner])?, Tensor::new(var, [inner])?))
    }
}

impl<T, const RANK: usize> Tensor<T, RANK>
where
    T: TensorElem + Float,
{
    /// Normalizes with externally supplied statistics, broadcast over axis 0:
    /// `(x - mean) / sqrt(variance + epsilon) * scale + offset`.
    ///
    /// All four statistics are flat with one entry per position within a batch entry
    /// (the layout returned by [`Tensor::moments`]).
    pub fn batch_normalize(
        &self,
        mean: &Tensor<T, 1>,
        variance: &Tensor<T, 1>,
        offset: &Tensor<T, 1>,
        scale: &Tensor<T, 1>,
        epsilon: T,
    ) -> Result<Self> {
        let batch = if RANK == 0 { 1 } else { self.shape[0] };
        let inner = if batch == 0 { 0 } else { self.size() / batch };
        for stat in [mean, variance, offset, scale] {
            if stat.shape[0] != inner {
                return Err(TensorError::ShapeMismatch {
                    expected: vec![inner],
                    got: vec![stat.shape[0]],
                });
            }
        }

        let mut out = self.clone();
        if inner == 0 {
            return Ok(out);
        }
        out.data.par_chunks_mut(inner).for_each(|row| {
            for (i, v) in row.iter_mut().enumerate() {
                let inv_std = (variance.data[i] + epsilon).sqrt().recip();
                *v = (*v - mean.data[i]) * inv_std * scale.data[i] + offset.data[i];
            }
        });
        Ok(out)
    }
}

impl<T> Tensor<T, 2>
where
    T: TensorElem,
{
    /// Matrix multiplication: `[M, K] x [K, N] -> [M, N]`.
    pub fn matmul<'r>(&self, rhs: impl Into<TensorView<'r, T, 2>>) -> Result<Self>
    where
        T: 'r,
    {
        let rhs = rhs.into();
        let data = phenonet_kernels::cpu_matmul(&self.data, rhs.data(), self.shape, *rhs.shape())?;
        Tensor::new(data, [self.shape[0], rhs.shape()[1]])
    }

    /// Concatenates two `[batch, _]` tensors along the feature axis.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if the batch dimensions differ.
    pub fn concat_features(&self, other: &Self) -> Result<Self> {
        let [batch, left] = self.shape;
        let [other_batch, right] = other.shape;
        if batch != other_batch {
            return Err(TensorError::ShapeMismatch {
                expected: vec![batch, right],
                got: vec![other_batch, right],
            });
        }

        let width = left + right;
        let mut data = Vec::with_capacity(batch * width);
        for b in 0..batch {
            data.extend_from_slice(&self.data[b * left..(b + 1) * left]);
            data.extend_from_slice(&other.data[b * right..(b + 1) * right]);
        }
        Tensor::new(data, [batch, width])
    }
}

impl<T> Tensor<T, 4>
where
    T: TensorElem,
{
    /// Same-padded 2D convolution of an NHWC tensor with an HWIO filter.
    ///
    /// Output shape: `[batch, ceil(h / stride_h), ceil(w / stride_w), out_channels]`.
    pub fn conv2d_same<'f>(
        &self,
        filter: impl Into<TensorView<'f, T, 4>>,
        stride: [usize; 2],
    ) -> Result<Self>
    where
        T: 'f,
    {
        let filter = filter.into();
        let (data, shape) = phenonet_kernels::cpu_conv2d(
            &self.data,
            filter.data(),
            &self.shape,
            filter.shape(),
            stride,
        )?;
        Tensor::new(data, shape)
    }

    /// Same-padded 2D transposed convolution of an NHWC tensor with an
    /// `[k_h, k_w, in_channels, out_channels]` filter, producing exactly `output_shape`.
    pub fn conv2d_transpose<'f>(
        &self,
        filter: impl Into<TensorView<'f, T, 4>>,
        output_shape: [usize; 4],
        stride: [usize; 2],
    ) -> Result<Self>
    where
        T: 'f,
    {
        let filter = filter.into();
        let data = phenonet_kernels::cpu_conv_transpose2d(
            &self.data,
            filter.data(),
            &self.shape,
            filter.shape(),
            output_shape,
            stride,
        )?;
        Tensor::new(data, output_shape)
    }

    /// Same-padded 2D max pooling.
    pub fn max_pool2d(&self, kernel_size: [usize; 2], stride: [usize; 2]) -> Result<Self> {
        let (data, shape) =
            phenonet_kernels::cpu_max_pool2d(&self.data, &self.shape, kernel_size, stride)?;
        Tensor::new(data, shape)
    }

    /// Same-padded 2D average pooling (padding excluded from the mean).
    pub fn avg_pool2d(&self, kernel_size: [usize; 2], stride: [usize; 2]) -> Result<Self> {
        let (data, shape) =
            phenonet_kernels::cpu_avg_pool2d(&self.data, &self.shape, kernel_size, stride)?;
        Tensor::new(data, shape)
    }

    /// Drops the trailing channel axis of a single-channel tensor: `[b, h, w, 1] -> [b, h, w]`.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if the channel dimension is not 1.
    pub fn squeeze_channels(self) -> Result<Tensor<T, 3>> {
        let [b, h, w, c] = self.shape;
        if c != 1 {
            return Err(TensorError::ShapeMismatch {
                expected: vec![b, h, w, 1],
                got: self.shape.to_vec(),
            });
        }
        self.reshape([b, h, w])
    }
}

impl<T> Tensor<T, 4>
where
    T: TensorElem + Float,
{
    /// Local response normalization across the channel axis.
    pub fn local_response_norm(&self, params: LrnParams) -> Result<Self> {
        let data = phenonet_kernels::cpu_local_response_norm(&self.data, &self.shape, params)?;
        Ok(Tensor {
            shape: self.shape,
            strides: compute_strides(&self.shape),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic() {
        let a = Tensor::<f32, 1>::new(vec![1.0, 2.0], [2]).unwrap();
        let b = Tensor::<f32, 1>::new(vec![3.0, 4.0], [2]).unwrap();

        assert_eq!((&a + &b).unwrap().data(), &[4.0, 6.0]);

        let f = Tensor::<f32, 1>::new(vec![1.0, 2.0, 3.0], [3]).unwrap();
        assert!(matches!(&a + &f, Err(TensorError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_add_bias_last_axis() {
        let x = Tensor::<f32, 4>::zeros([2, 2, 2, 3]);
        let bias = Tensor::<f32, 1>::new(vec![0.1, 0.2, 0.3], [3]).unwrap();
        let out = x.add_bias(&bias).unwrap();
        for px in out.data().chunks(3) {
            assert_eq!(px, &[0.1, 0.2, 0.3]);
        }

        let bad = Tensor::<f32, 1>::zeros([2]);
        assert!(matches!(
            x.add_bias(&bad),
            Err(TensorError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_moments_axis0() {
        // Two batch entries of three features.
        let x = Tensor::<f32, 2>::new(vec![1.0, 2.0, 3.0, 3.0, 2.0, 5.0], [2, 3]).unwrap();
        let (mean, var) = x.moments().unwrap();
        assert_eq!(mean.data(), &[2.0, 2.0, 4.0]);
        assert_eq!(var.data(), &[1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_moments_empty_batch() {
        let x = Tensor::<f32, 2>::zeros([0, 3]);
        assert!(matches!(x.moments(), Err(TensorError::Unsupported(_))));
    }

    #[test]
    fn test_batch_normalize() {
        let x = Tensor::<f64, 2>::new(vec![1.0, 2.0, 3.0, 6.0], [2, 2]).unwrap();
        let (mean, var) = x.moments().unwrap();
        let offset = Tensor::<f64, 1>::new(vec![0.5, 0.0], [2]).unwrap();
        let scale = Tensor::<f64, 1>::new(vec![1.0, 2.0], [2]).unwrap();
        let out = x.batch_normalize(&mean, &var, &offset, &scale, 0.0).unwrap();
        // Feature 0: mean 2, var 1 -> [-1, 1] + 0.5. Feature 1: mean 4, var 4 -> [-1, 1] * 2.
        let expected = [-0.5, -2.0, 1.5, 2.0];
        for (o, e) in out.data().iter().zip(expected) {
            assert!((o - e).abs() < 1e-12);
        }
    }

    #[test]
    fn test_matmul_2d() {
        let a = Tensor::<f32, 2>::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [2, 3]).unwrap();
        let b = Tensor::<f32, 2>::new(vec![7.0, 8.0, 9.0, 1.0, 2.0, 3.0], [3, 2]).unwrap();
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.shape(), &[2, 2]);
        assert_eq!(c.data(), &[31.0, 19.0, 85.0, 55.0]);

        let err = a.matmul(&Tensor::<f32, 2>::zeros([4, 2]));
        assert!(matches!(err, Err(TensorError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_concat_features() {
        let a = Tensor::<f32, 2>::new(vec![1.0, 2.0, 3.0, 4.0], [2, 2]).unwrap();
        let b = Tensor::<f32, 2>::new(vec![9.0, 8.0], [2, 1]).unwrap();
        let c = a.concat_features(&b).unwrap();
        assert_eq!(c.shape(), &[2, 3]);
        assert_eq!(c.data(), &[1.0, 2.0, 9.0, 3.0, 4.0, 8.0]);

        let wrong_batch = Tensor::<f32, 2>::zeros([3, 1]);
        assert!(matches!(
            a.concat_features(&wrong_batch),
            Err(TensorError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_conv2d_same_shape() {
        let x = Tensor::<f32, 4>::zeros([2, 28, 28, 3]);
        let w = Tensor::<f32, 4>::zeros([5, 5, 3, 8]);
        assert_eq!(x.conv2d_same(&w, [1, 1]).unwrap().shape(), &[2, 28, 28, 8]);
        assert_eq!(x.conv2d_same(&w, [2, 2]).unwrap().shape(), &[2, 14, 14, 8]);
    }

    #[test]
    fn test_conv2d_transpose_shape() {
        let x = Tensor::<f32, 4>::ones([4, 8, 8, 16]);
        let w = Tensor::<f32, 4>::ones([3, 3, 16, 2]);
        let out = x.conv2d_transpose(&w, [4, 16, 16, 2], [2, 2]).unwrap();
        assert_eq!(out.shape(), &[4, 16, 16, 2]);
    }

    #[test]
    fn test_pooling() {
        let x = Tensor::<f32, 4>::new((0..16).map(|i| i as f32).collect(), [1, 4, 4, 1]).unwrap();
        assert_eq!(x.max_pool2d([2, 2], [2, 2]).unwrap().data(), &[5.0, 7.0, 13.0, 15.0]);
        assert_eq!(x.avg_pool2d([2, 2], [2, 2]).unwrap().data(), &[2.5, 4.5, 10.5, 12.5]);
    }

    #[test]
    fn test_squeeze_channels() {
        let x = Tensor::<f32, 4>::zeros([2, 3, 3, 1]);
        assert_eq!(x.squeeze_channels().unwrap().shape(), &[2, 3, 3]);

        let y = Tensor::<f32, 4>::zeros([2, 3, 3, 2]);
        assert!(matches!(
            y.squeeze_channels(),
            Err(TensorError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_local_response_norm_shape() {
        let x = Tensor::<f32, 4>::ones([1, 2, 2, 4]);
        let out = x.local_response_norm(LrnParams::default()).unwrap();
        assert_eq!(out.shape(), x.shape());
        // Every channel sees all four ones: 1 / sqrt(1 + 4).
        for v in out.data() {
            assert!((v - 1.0 / 5.0f32.sqrt()).abs() < 1e-6);
        }
    }
}
