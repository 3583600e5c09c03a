//! # Feature Specifications
//!
//! Backbones hand decoders a set of feature maps keyed by level. Before any
//! tensor exists, a decoder is sized from the *specs* of those maps: their
//! channel count and, when known, their spatial size.

use std::collections::BTreeMap;

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{DecoderError, DecoderResult};

/// Shape descriptor of one feature map. The batch dimension is never fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
    /// Number of channels.
    pub channels: usize,
    /// Spatial height, if static.
    #[serde(default)]
    pub height: Option<usize>,
    /// Spatial width, if static.
    #[serde(default)]
    pub width: Option<usize>,
}

impl FeatureSpec {
    /// Creates a spec with unknown spatial size.
    pub const fn new(channels: usize) -> Self {
        Self {
            channels,
            height: None,
            width: None,
        }
    }

    /// Sets the static spatial size.
    #[must_use]
    pub const fn with_size(mut self, height: usize, width: usize) -> Self {
        self.height = Some(height);
        self.width = Some(width);
        self
    }

    /// The spec of this map after `factor` halvings of its spatial size,
    /// rounding up like a `"SAME"`-padded stride-2 convolution.
    #[must_use]
    pub const fn downsampled(self, factor: u32, channels: usize) -> Self {
        let scale = 1usize << factor;
        Self {
            channels,
            height: match self.height {
                Some(h) => Some(h.div_ceil(scale)),
                None => None,
            },
            width: match self.width {
                Some(w) => Some(w.div_ceil(scale)),
                None => None,
            },
        }
    }
}

/// Feature specs keyed by level identifier (`"2"`, `"3"`, ...).
pub type InputSpecs = BTreeMap<String, FeatureSpec>;

/// Feature maps keyed by level identifier. Tensors are NCHW.
pub type FeatureMaps<B> = BTreeMap<String, Tensor<B, 4>>;

/// The key of a numeric pyramid level.
pub fn level_key(level: usize) -> String {
    level.to_string()
}

/// Parses a level key into its pyramid level.
///
/// # Errors
///
/// Returns `InvalidConfiguration` if the key is not a non-negative integer.
pub fn parse_level(key: &str) -> DecoderResult<usize> {
    key.parse()
        .map_err(|_| DecoderError::InvalidConfiguration {
            reason: format!("feature key '{key}' is not a pyramid level"),
        })
}

/// Returns the highest numeric level present in `specs`.
///
/// # Errors
///
/// Returns `InvalidConfiguration` if `specs` is empty or has a non-numeric key.
pub fn max_level(specs: &InputSpecs) -> DecoderResult<usize> {
    let mut max = None;
    for key in specs.keys() {
        let level = parse_level(key)?;
        max = Some(max.map_or(level, |m: usize| m.max(level)));
    }
    max.ok_or_else(|| DecoderError::InvalidConfiguration {
        reason: "input specs are empty".to_string(),
    })
}

/// Looks up the spec of `level`.
///
/// # Errors
///
/// Returns `MissingFeatureLevel` if the level is absent.
pub fn spec_at(specs: &InputSpecs, level: &str) -> DecoderResult<FeatureSpec> {
    specs
        .get(level)
        .copied()
        .ok_or_else(|| DecoderError::MissingFeatureLevel {
            level: level.to_string(),
        })
}

/// Removes the map of `level` from `features`.
///
/// # Errors
///
/// Returns `MissingFeatureLevel` if the level is absent.
pub fn take_level<B: Backend>(
    features: &mut FeatureMaps<B>,
    level: &str,
) -> DecoderResult<Tensor<B, 4>> {
    features
        .remove(level)
        .ok_or_else(|| DecoderError::MissingFeatureLevel {
            level: level.to_string(),
        })
}
