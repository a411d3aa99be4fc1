use crate::padding::same_padding;
use crate::{check_nhwc, check_positive, KernelElem, KernelError, Result};
use rayon::prelude::*;

/// Performs a same-padded 2D convolution on CPU.
///
/// # Arguments
///
/// * `input` - Input data (flattened). Shape: `[batch_size, in_h, in_w, in_channels]`
/// * `filter` - Filter data (flattened). Shape: `[k_h, k_w, in_channels, out_channels]`
/// * `input_shape` - Shape of the input tensor.
/// * `filter_shape` - Shape of the filter tensor.
/// * `stride` - Stride of the convolution: `[stride_h, stride_w]`
///
/// # Returns
///
/// The flattened result together with its shape
/// `[batch_size, ceil(in_h / stride_h), ceil(in_w / stride_w), out_channels]`.
pub fn cpu_conv2d<T: KernelElem>(
    input: &[T],
    filter: &[T],
    input_shape: &[usize],
    filter_shape: &[usize],
    stride: [usize; 2],
) -> Result<(Vec<T>, [usize; 4])> {
    let [batch_size, in_h, in_w, in_channels] = check_nhwc(input, input_shape)?;
    let [k_h, k_w, filter_in, out_channels] = check_nhwc(filter, filter_shape)?;
    check_positive("stride", &stride)?;

    if filter_in != in_channels {
        return Err(KernelError::ShapeMismatch {
            expected: vec![in_channels],
            got: vec![filter_in],
        });
    }

    let pad_h = same_padding(in_h, k_h, stride[0]);
    let pad_w = same_padding(in_w, k_w, stride[1]);
    let (out_h, out_w) = (pad_h.output, pad_w.output);

    let out_shape = [batch_size, out_h, out_w, out_channels];
    let mut output = vec![T::zero(); out_shape.iter().product()];

    let row_len = out_w * out_channels;
    if row_len == 0 {
        return Ok((output, out_shape));
    }

    // One chunk per (batch, output row).
    output
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(row_idx, out_row)| {
            let b = row_idx / out_h;
            let oh = row_idx % out_h;
            let h_origin = (oh * stride[0]) as isize - pad_h.before as isize;

            for ow in 0..out_w {
                let w_origin = (ow * stride[1]) as isize - pad_w.before as isize;
                let out_px = &mut out_row[ow * out_channels..(ow + 1) * out_channels];

                for kh in 0..k_h {
                    let h_in = h_origin + kh as isize;
                    if h_in < 0 || h_in >= in_h as isize {
                        continue;
                    }
                    for kw in 0..k_w {
                        let w_in = w_origin + kw as isize;
                        if w_in < 0 || w_in >= in_w as isize {
                            continue;
                        }

                        let in_base = ((b * in_h + h_in as usize) * in_w + w_in as usize)
                            * in_channels;
                        let f_base = (kh * k_w + kw) * in_channels * out_channels;

                        for ic in 0..in_channels {
                            let x = input[in_base + ic];
                            let taps = &filter
                                [f_base + ic * out_channels..f_base + (ic + 1) * out_channels];
                            for (o, &w) in out_px.iter_mut().zip(taps) {
                                *o += x * w;
                            }
                        }
                    }
                }
            }
        });

    Ok((output, out_shape))
}
