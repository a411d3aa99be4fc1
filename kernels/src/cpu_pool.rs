use crate::padding::same_padding;
use crate::{check_nhwc, check_positive, KernelElem, Result};
use rayon::prelude::*;

/// How a pooling window is reduced to one value.
#[derive(Clone, Copy)]
enum Reduce {
    Max,
    Mean,
}

/// Performs same-padded 2D max pooling on CPU.
///
/// # Arguments
///
/// * `input` - Input data (flattened). Shape: `[batch_size, in_h, in_w, channels]`
/// * `input_shape` - Shape of the input tensor.
/// * `kernel_size` - Size of the pooling window: `[k_h, k_w]`
/// * `stride` - Stride of the pooling: `[stride_h, stride_w]`
///
/// # Returns
///
/// The flattened result and its shape `[batch_size, ceil(in_h / s_h), ceil(in_w / s_w), channels]`.
/// Padded cells never win the max.
pub fn cpu_max_pool2d<T: KernelElem>(
    input: &[T],
    input_shape: &[usize],
    kernel_size: [usize; 2],
    stride: [usize; 2],
) -> Result<(Vec<T>, [usize; 4])> {
    pool2d(input, input_shape, kernel_size, stride, Reduce::Max)
}

/// Performs same-padded 2D average pooling on CPU.
///
/// Padded cells are excluded from the average, so border windows divide by the number of
/// in-bounds cells only.
pub fn cpu_avg_pool2d<T: KernelElem>(
    input: &[T],
    input_shape: &[usize],
    kernel_size: [usize; 2],
    stride: [usize; 2],
) -> Result<(Vec<T>, [usize; 4])> {
    pool2d(input, input_shape, kernel_size, stride, Reduce::Mean)
}

fn pool2d<T: KernelElem>(
    input: &[T],
    input_shape: &[usize],
    kernel_size: [usize; 2],
    stride: [usize; 2],
    reduce: Reduce,
) -> Result<(Vec<T>, [usize; 4])> {
    let [batch_size, in_h, in_w, channels] = check_nhwc(input, input_shape)?;
    check_positive("kernel_size", &kernel_size)?;
    check_positive("stride", &stride)?;

    let pad_h = same_padding(in_h, kernel_size[0], stride[0]);
    let pad_w = same_padding(in_w, kernel_size[1], stride[1]);
    let (out_h, out_w) = (pad_h.output, pad_w.output);

    let out_shape = [batch_size, out_h, out_w, channels];
    let mut output = vec![T::zero(); out_shape.iter().product()];
    let row_len = out_w * channels;
    if row_len == 0 {
        return Ok((output, out_shape));
    }

    output
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(row_idx, out_row)| {
            let b = row_idx / out_h;
            let oh = row_idx % out_h;

            // Same padding keeps `before < kernel`, so every window overlaps the image.
            let h_start = (oh * stride[0]).saturating_sub(pad_h.before);
            let h_end = (oh * stride[0] + kernel_size[0] - pad_h.before).min(in_h);

            for ow in 0..out_w {
                let w_start = (ow * stride[1]).saturating_sub(pad_w.before);
                let w_end = (ow * stride[1] + kernel_size[1] - pad_w.before).min(in_w);
                let out_px = &mut out_row[ow * channels..(ow + 1) * channels];

                for c in 0..channels {
                    let mut acc: Option<T> = None;
                    let mut count = 0usize;
                    for h in h_start..h_end {
                        for w in w_start..w_end {
                            let val = input[((b * in_h + h) * in_w + w) * channels + c];
                            count += 1;
                            acc = Some(match (acc, reduce) {
                                (None, _) => val,
                                (Some(m), Reduce::Max) => {
                                    if val > m {
                                        val
                                    } else {
                                        m
                                    }
                                }
                                (Some(s), Reduce::Mean) => s + val,
                            });
                        }
                    }

                    out_px[c] = match (acc, reduce) {
                        (Some(m), Reduce::Max) => m,
                        (Some(s), Reduce::Mean) => {
                            s / T::from_usize(count).unwrap_or_else(T::one)
                        }
                        (None, _) => T::zero(),
                    };
                }
            }
        });

    Ok((output, out_shape))
}
