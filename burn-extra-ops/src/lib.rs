//! Additional operations for the Burn deep learning framework
//!
//! This crate provides padding and resampling operations that TensorFlow-era
//! vision models depend on but that are not available in the core Burn
//! framework.

mod padding;
mod upsample;

// Convenient re-exports
pub use padding::{fixed_padding, pad_fixed, pad_same, pad_same_pool, same_padding};
pub use upsample::{resize_bilinear, resize_nearest, upsample_nearest};
