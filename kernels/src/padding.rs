//! "SAME" padding arithmetic.
//!
//! Matches the convention of the mainstream graph engines: the output spatial size is
//! `ceil(input / stride)` and when the total padding is odd the extra cell goes *after*
//! the data (bottom/right).

/// Padding and output extent for one spatial axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamePadding {
    /// Zero cells added before the first input element.
    pub before: usize,
    /// Zero cells added after the last input element.
    pub after: usize,
    /// Resulting output extent along the axis.
    pub output: usize,
}

/// Same padding for a forward convolution or pooling window.
///
/// `stride` must be non-zero.
pub fn same_padding(input: usize, kernel: usize, stride: usize) -> SamePadding {
    let output = input.div_ceil(stride);
    let needed = (output.saturating_sub(1) * stride + kernel).saturating_sub(input);
    SamePadding {
        before: needed / 2,
        after: needed - needed / 2,
        output,
    }
}

/// Same padding for a transposed convolution producing `output` cells from `input` cells.
///
/// This is the padding of the forward convolution that maps `output` back onto `input`,
/// so it is only meaningful when `output.div_ceil(stride) == input`.
pub fn transpose_same_padding(
    output: usize,
    input: usize,
    kernel: usize,
    stride: usize,
) -> SamePadding {
    let needed = (input.saturating_sub(1) * stride + kernel).saturating_sub(output);
    SamePadding {
        before: needed / 2,
        after: needed - needed / 2,
        output,
    }
}
