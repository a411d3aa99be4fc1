use crate::padding::transpose_same_padding;
use crate::{check_nhwc, check_positive, KernelElem, KernelError, Result};
use rayon::prelude::*;

/// Performs a same-padded 2D transposed convolution on CPU.
///
/// Unlike [`crate::cpu_conv2d`] the output extent cannot be inferred from the padding
/// rule alone (several output sizes map back onto the same input size), so the caller
/// passes the target shape explicitly.
///
/// # Arguments
///
/// * `input` - Input data (flattened). Shape: `[batch_size, in_h, in_w, in_channels]`
/// * `filter` - Filter data (flattened). Shape: `[k_h, k_w, in_channels, out_channels]`
/// * `input_shape` - Shape of the input tensor.
/// * `filter_shape` - Shape of the filter tensor.
/// * `output_shape` - Target shape `[batch_size, out_h, out_w, out_channels]`.
/// * `stride` - Upsampling stride: `[stride_h, stride_w]`
///
/// # Errors
///
/// `ShapeMismatch` when the batch or channel counts disagree, or when a same-padded
/// convolution of `output_shape` with `stride` would not give back `input_shape`.
pub fn cpu_conv_transpose2d<T: KernelElem>(
    input: &[T],
    filter: &[T],
    input_shape: &[usize],
    filter_shape: &[usize],
    output_shape: [usize; 4],
    stride: [usize; 2],
) -> Result<Vec<T>> {
    let [batch_size, in_h, in_w, in_channels] = check_nhwc(input, input_shape)?;
    let [k_h, k_w, filter_in, filter_out] = check_nhwc(filter, filter_shape)?;
    check_positive("stride", &stride)?;

    let [out_batch, out_h, out_w, out_channels] = output_shape;
    if filter_in != in_channels {
        return Err(KernelError::ShapeMismatch {
            expected: vec![in_channels],
            got: vec![filter_in],
        });
    }
    if out_batch != batch_size || out_channels != filter_out {
        return Err(KernelError::ShapeMismatch {
            expected: vec![batch_size, filter_out],
            got: vec![out_batch, out_channels],
        });
    }
    if out_h.div_ceil(stride[0]) != in_h || out_w.div_ceil(stride[1]) != in_w {
        return Err(KernelError::ShapeMismatch {
            expected: vec![in_h, in_w],
            got: vec![out_h.div_ceil(stride[0]), out_w.div_ceil(stride[1])],
        });
    }

    let pad_h = transpose_same_padding(out_h, in_h, k_h, stride[0]);
    let pad_w = transpose_same_padding(out_w, in_w, k_w, stride[1]);

    let mut output = vec![T::zero(); output_shape.iter().product()];
    let row_len = out_w * out_channels;
    if row_len == 0 {
        return Ok(output);
    }

    // Gather formulation: each output cell pulls from the input cells whose scattered
    // footprint covers it, which keeps the output rows independent for rayon.
    output
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(row_idx, out_row)| {
            let b = row_idx / out_h;
            let oh = row_idx % out_h;

            for ow in 0..out_w {
                let out_px = &mut out_row[ow * out_channels..(ow + 1) * out_channels];

                for kh in 0..k_h {
                    let h_num = (oh + pad_h.before) as isize - kh as isize;
                    if h_num < 0 || h_num as usize % stride[0] != 0 {
                        continue;
                    }
                    let ih = h_num as usize / stride[0];
                    if ih >= in_h {
                        continue;
                    }
                    for kw in 0..k_w {
                        let w_num = (ow + pad_w.before) as isize - kw as isize;
                        if w_num < 0 || w_num as usize % stride[1] != 0 {
                            continue;
                        }
                        let iw = w_num as usize / stride[1];
                        if iw >= in_w {
                            continue;
                        }

                        let in_base = ((b * in_h + ih) * in_w + iw) * in_channels;
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

    Ok(output)
}
