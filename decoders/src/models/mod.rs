//! # Decoder Architectures
//!
//! This module aggregates the decoders and the factory that selects between them:
//!
//! - `fpn`: Feature Pyramid Network.
//! - `nasfpn`: The searched NAS-FPN cell, stacked.
//! - `aspp`: Atrous Spatial Pyramid Pooling on a single level.
//! - `mrfm`: SSD-style multi-resolution feature maps.
//! - `modules`: Shared building blocks (convolution blocks, activations,
//!   normalization settings, the L2 regularizer).
//! - `factory`: `build_decoder` and the `Decoder` enum.

pub mod aspp;
pub mod factory;
pub mod fpn;
pub mod modules;
pub mod mrfm;
pub mod nasfpn;

pub use aspp::{Aspp, AsppConfig};
pub use factory::{build_decoder, decoder_config, Decoder, DecoderModuleConfig};
pub use fpn::{Fpn, FpnConfig};
pub use modules::{
    Activation, ConvKind, ConvNormAct, ConvNormActConfig, L2Regularizer, NormSettings, Padding,
};
pub use mrfm::{FeatureMapLayout, Mrfm, MrfmConfig};
pub use nasfpn::{NasFpn, NasFpnConfig};
