//! Configuration-driven feature decoders for multi-level vision backbones,
//! built on Burn.
//!
//! [`build_decoder`] reads `decoder.decoder_type` from a [`ModelConfig`] and
//! constructs one of:
//!
//! | type       | decoder |
//! |------------|---------|
//! | `identity` | none; backbone features are used directly |
//! | `fpn`      | [`Fpn`] |
//! | `nasfpn`   | [`NasFpn`] |
//! | `aspp`     | [`Aspp`] |
//! | `mrfm`     | [`Mrfm`] |

mod config;
mod error;
mod models;
mod specs;

#[cfg(test)]
mod tests;

pub use config::{
    ActivationKind, AsppParams, DecoderSelection, DecoderType, FpnParams, ModelConfig, MrfmParams,
    NasFpnParams, NormActivationConfig,
};
pub use error::{DecoderError, DecoderResult};
pub use models::*;
pub use specs::*;
