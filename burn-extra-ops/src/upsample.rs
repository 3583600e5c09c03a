//! # Nearest-neighbour Resampling
//!
//! Integer-scale upsampling used by feature-pyramid decoders to move a coarse
//! feature map onto the grid of a finer one.

use burn::{
    prelude::*,
    tensor::{
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};

/// Upsamples an NCHW tensor by an integer factor with nearest-neighbour
/// interpolation.
pub fn upsample_nearest<B: Backend>(x: Tensor<B, 4>, scale: usize) -> Tensor<B, 4> {
    if scale == 1 {
        return x;
    }
    let [_, _, height, width] = x.dims();
    resize_nearest(x, [height * scale, width * scale])
}

/// Resizes an NCHW tensor to `[height, width]` with nearest-neighbour
/// interpolation.
pub fn resize_nearest<B: Backend>(x: Tensor<B, 4>, size: [usize; 2]) -> Tensor<B, 4> {
    let [_, _, height, width] = x.dims();
    if [height, width] == size {
        return x;
    }
    interpolate(x, size, InterpolateOptions::new(InterpolateMode::Nearest))
}

/// Resizes an NCHW tensor to `[height, width]` with bilinear interpolation.
pub fn resize_bilinear<B: Backend>(x: Tensor<B, 4>, size: [usize; 2]) -> Tensor<B, 4> {
    let [_, _, height, width] = x.dims();
    if [height, width] == size {
        return x;
    }
    interpolate(x, size, InterpolateOptions::new(InterpolateMode::Bilinear))
}
