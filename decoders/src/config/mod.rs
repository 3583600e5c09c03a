//! Configuration module for the decoders.
//!
//! This module provides configuration structures and enums for the decoder
//! factory. It is organized into two main submodules:
//! - `core`: Contains the main configuration structures
//! - `enums`: Contains the decoder discriminator and activation names

pub mod core;
pub mod enums;

// Re-export all configuration structures from core
pub use core::{
    AsppParams, DecoderSelection, FpnParams, ModelConfig, MrfmParams, NasFpnParams,
    NormActivationConfig,
};

// Re-export all enums from enums
pub use enums::{ActivationKind, DecoderType};
