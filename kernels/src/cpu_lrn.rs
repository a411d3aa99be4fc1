use crate::{check_nhwc, KernelElem, KernelError, Result};
use num_traits::Float;
use rayon::prelude::*;

/// Parameters of local response normalization.
///
/// `output = input / (bias + alpha * sum(input[c - r ..= c + r]^2)) ^ beta`, where the sum runs
/// over neighbouring channels of the same pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LrnParams {
    pub depth_radius: usize,
    pub bias: f64,
    pub alpha: f64,
    pub beta: f64,
}

impl Default for LrnParams {
    /// The defaults used by the mainstream graph engines' `lrn` op.
    fn default() -> Self {
        Self {
            depth_radius: 5,
            bias: 1.0,
            alpha: 1.0,
            beta: 0.5,
        }
    }
}

/// Performs local response normalization across the channel axis on CPU.
///
/// # Arguments
///
/// * `input` - Input data (flattened). Shape: `[batch_size, height, width, channels]`
/// * `input_shape` - Shape of the input tensor.
/// * `params` - Window radius and the normalization constants.
pub fn cpu_local_response_norm<T: KernelElem + Float>(
    input: &[T],
    input_shape: &[usize],
    params: LrnParams,
) -> Result<Vec<T>> {
    let [_, _, _, channels] = check_nhwc(input, input_shape)?;

    let cast = |v: f64, name: &str| {
        T::from_f64(v).ok_or_else(|| {
            KernelError::InvalidArgument(format!("{name} {v} is not representable"))
        })
    };
    let bias = cast(params.bias, "bias")?;
    let alpha = cast(params.alpha, "alpha")?;
    let beta = cast(params.beta, "beta")?;
    let radius = params.depth_radius;

    let mut output = vec![T::zero(); input.len()];
    if channels == 0 {
        return Ok(output);
    }

    output
        .par_chunks_mut(channels)
        .zip(input.par_chunks(channels))
        .for_each(|(out_px, in_px)| {
            for c in 0..channels {
                let lo = c.saturating_sub(radius);
                let hi = (c + radius).min(channels - 1);
                let sqr_sum = in_px[lo..=hi]
                    .iter()
                    .fold(T::zero(), |acc, &v| acc + v * v);
                out_px[c] = in_px[c] / (bias + alpha * sqr_sum).powf(beta);
            }
        });

    Ok(output)
}
