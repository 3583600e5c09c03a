//! # TensorFlow-style Padding
//!
//! Burn convolutions only take symmetric padding. Models ported from TensorFlow
//! rely on `"SAME"` padding, which puts the odd pixel at the end, and on
//! "fixed" padding, which pads by the effective kernel size regardless of the
//! input. Both are expressed here as explicit `(begin, end)` pairs that can be
//! applied with [`Tensor::pad`] before a `Valid` convolution.

use burn::prelude::*;

/// Returns the `(begin, end)` padding TensorFlow's `"SAME"` mode applies to
/// one spatial dimension.
///
/// The output length is `ceil(input / stride)`; the padding needed to reach it
/// is split with the extra pixel at the end.
pub const fn same_padding(
    input: usize,
    kernel_size: usize,
    stride: usize,
    dilation: usize,
) -> (usize, usize) {
    let effective = (kernel_size - 1) * dilation + 1;
    let output = input.div_ceil(stride);
    let needed = (output - 1) * stride + effective;
    let total = needed.saturating_sub(input);
    let begin = total / 2;
    (begin, total - begin)
}

/// Returns the input-independent `(begin, end)` padding for a kernel.
///
/// Total padding is `effective_kernel - 1`, begin gets the floor half.
pub const fn fixed_padding(kernel_size: usize, dilation: usize) -> (usize, usize) {
    let effective = (kernel_size - 1) * dilation + 1;
    let total = effective - 1;
    let begin = total / 2;
    (begin, total - begin)
}

/// Pads an NCHW tensor so that a `Valid` convolution with the given geometry
/// behaves like TensorFlow's `"SAME"` padding.
pub fn pad_same<B: Backend>(
    x: Tensor<B, 4>,
    kernel_size: [usize; 2],
    stride: [usize; 2],
    dilation: [usize; 2],
) -> Tensor<B, 4> {
    let [_, _, height, width] = x.dims();
    let (top, bottom) = same_padding(height, kernel_size[0], stride[0], dilation[0]);
    let (left, right) = same_padding(width, kernel_size[1], stride[1], dilation[1]);
    if top + bottom + left + right == 0 {
        return x;
    }
    x.pad((left, right, top, bottom), 0.0)
}

/// Pads an NCHW tensor for a `"SAME"` max-pool whose kernel and stride are
/// both `window`, so the pooled size is `ceil(input / window)`.
///
/// Padded cells hold negative infinity and never win the max; every window
/// keeps at least one input cell.
pub fn pad_same_pool<B: Backend>(x: Tensor<B, 4>, window: usize) -> Tensor<B, 4> {
    let [_, _, height, width] = x.dims();
    let (top, bottom) = same_padding(height, window, window, 1);
    let (left, right) = same_padding(width, window, window, 1);
    if top + bottom + left + right == 0 {
        return x;
    }
    x.pad((left, right, top, bottom), f32::NEG_INFINITY)
}

/// Pads an NCHW tensor by the fixed amount required by the kernel.
pub fn pad_fixed<B: Backend>(
    x: Tensor<B, 4>,
    kernel_size: [usize; 2],
    dilation: [usize; 2],
) -> Tensor<B, 4> {
    let (top, bottom) = fixed_padding(kernel_size[0], dilation[0]);
    let (left, right) = fixed_padding(kernel_size[1], dilation[1]);
    if top + bottom + left + right == 0 {
        return x;
    }
    x.pad((left, right, top, bottom), 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn same_padding_stride_one_is_symmetric_for_odd_kernels() {
        assert_eq!(same_padding(16, 3, 1, 1), (1, 1));
        assert_eq!(same_padding(16, 1, 1, 1), (0, 0));
        assert_eq!(same_padding(16, 3, 1, 6), (6, 6));
    }

    #[test]
    fn same_padding_stride_two_puts_extra_pixel_at_end() {
        // even input: ceil(16 / 2) = 8, needs (8 - 1) * 2 + 3 = 17
        assert_eq!(same_padding(16, 3, 2, 1), (0, 1));
        // odd input: ceil(15 / 2) = 8, needs 17
        assert_eq!(same_padding(15, 3, 2, 1), (1, 1));
    }

    #[test]
    fn fixed_padding_depends_only_on_kernel() {
        assert_eq!(fixed_padding(3, 1), (1, 1));
        assert_eq!(fixed_padding(4, 1), (1, 2));
        assert_eq!(fixed_padding(3, 2), (2, 2));
        assert_eq!(fixed_padding(1, 1), (0, 0));
    }

    #[test]
    fn pad_same_produces_ceil_output_after_valid_conv() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::ones([1, 2, 8, 7], &device);
        let padded = pad_same(x, [3, 3], [2, 2], [1, 1]);
        // height: 8 -> 9, width: 7 -> 9
        assert_eq!(padded.dims(), [1, 2, 9, 9]);
    }

    #[test]
    fn pad_same_pool_covers_inputs_smaller_than_the_window() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::ones([1, 1, 3, 13], &device).mul_scalar(-2.0);
        let padded = pad_same_pool(x, 4);
        // ceil(3 / 4) = 1 window, ceil(13 / 4) = 4 windows
        assert_eq!(padded.dims(), [1, 1, 4, 16]);
        let max: f32 = padded.max().into_scalar();
        assert_eq!(max, -2.0);
    }

    #[test]
    fn pad_fixed_keeps_values_in_the_interior() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::ones([1, 1, 2, 2], &device);
        let padded = pad_fixed(x, [3, 3], [1, 1]);
        assert_eq!(padded.dims(), [1, 1, 4, 4]);
        let total: f32 = padded.sum().into_scalar();
        assert_eq!(total, 4.0);
    }
}
