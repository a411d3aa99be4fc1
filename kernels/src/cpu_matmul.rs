use crate::{KernelElem, KernelError, Result};
use rayon::prelude::*;

/// CPU matrix multiplication: `[m, k] x [k, n] -> [m, n]`.
///
/// Rows of the output are computed in parallel. Each row accumulates `lhs[i, p] * rhs[p, :]`
/// so both operands are walked in memory order and no transposed copy of `rhs` is needed.
/// A BLAS `gemm` can replace the body without changing the signature; the layout is row-major.
pub fn cpu_matmul<T: KernelElem>(
    lhs: &[T],
    rhs: &[T],
    lhs_shape: [usize; 2],
    rhs_shape: [usize; 2],
) -> Result<Vec<T>> {
    let [m, k] = lhs_shape;
    let [k2, n] = rhs_shape;

    if k != k2 {
        return Err(KernelError::ShapeMismatch {
            expected: vec![k],
            got: vec![k2],
        });
    }
    if lhs.len() != m * k || rhs.len() != k * n {
        return Err(KernelError::ShapeMismatch {
            expected: vec![m * k, k * n],
            got: vec![lhs.len(), rhs.len()],
        });
    }

    let mut out = vec![T::zero(); m * n];
    if n == 0 {
        return Ok(out);
    }

    out.par_chunks_mut(n).enumerate().for_each(|(i, out_row)| {
        let lhs_row = &lhs[i * k..(i + 1) * k];
        for (p, &a) in lhs_row.iter().enumerate() {
            let rhs_row = &rhs[p * n..(p + 1) * n];
            for (o, &b) in out_row.iter_mut().zip(rhs_row) {
                *o += a * b;
            }
        }
    });

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matmul_2x3_3x2() {
        let a = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = vec![7.0, 8.0, 9.0, 1.0, 2.0, 3.0];
        let c = cpu_matmul(&a, &b, [2, 3], [3, 2]).unwrap();
        // Row 0: 1*7 + 2*9 + 3*2 = 31, 1*8 + 2*1 + 3*3 = 19
        // Row 1: 4*7 + 5*9 + 6*2 = 85, 4*8 + 5*1 + 6*3 = 55
        assert_eq!(c, vec![31.0, 19.0, 85.0, 55.0]);
    }

    #[test]
    fn test_matmul_inner_mismatch() {
        let err = cpu_matmul(&[0.0f32; 6], &[0.0f32; 8], [2, 3], [4, 2]);
        assert!(matches!(err, Err(KernelError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_matmul_length_mismatch() {
        let err = cpu_matmul(&[0.0f32; 5], &[0.0f32; 6], [2, 3], [3, 2]);
        assert!(matches!(err, Err(KernelError::ShapeMismatch { .. })));
    }
}
