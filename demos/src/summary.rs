//! Helpers for building dummy inputs and describing decoder outputs.

use std::fmt;

use anyhow::{bail, Context, Result};
use burn::prelude::*;
use vision_decoders::{parse_level, FeatureMaps, InputSpecs};

/// Parses input specs from JSON, e.g. `{"3": {"channels": 512}, "4": {"channels": 1024}}`.
pub fn parse_input_specs(json: &str) -> Result<InputSpecs> {
    let specs: InputSpecs = serde_json::from_str(json).context("Failed to parse input specs")?;
    if specs.is_empty() {
        bail!("Input specs are empty");
    }
    Ok(specs)
}

/// Creates random backbone features matching `specs`.
///
/// Levels without a static size get `image_size / 2^level`.
pub fn dummy_features<B: Backend>(
    specs: &InputSpecs,
    batch_size: usize,
    image_size: usize,
    device: &Device<B>,
) -> Result<FeatureMaps<B>> {
    specs
        .iter()
        .map(|(key, spec)| {
            let [height, width] = match (spec.height, spec.width) {
                (Some(height), Some(width)) => [height, width],
                _ => {
                    let level = parse_level(key)
                        .with_context(|| format!("Level '{key}' needs an explicit size"))?;
                    let size = image_size >> level;
                    if size == 0 {
                        bail!("Image size {image_size} is too small for level {level}");
                    }
                    [size, size]
                }
            };
            let tensor = Tensor::random(
                [batch_size, spec.channels, height, width],
                burn::tensor::Distribution::Normal(0.0, 1.0),
                device,
            );
            Ok((key.clone(), tensor))
        })
        .collect()
}

/// One output feature map of a decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelSummary {
    pub level: String,
    pub dims: [usize; 4],
}

impl fmt::Display for LevelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [batch, channels, height, width] = self.dims;
        write!(
            f,
            "level {:>3}: [{batch}, {channels}, {height}, {width}]",
            self.level
        )
    }
}

/// Describes each output map of a decoder, in level order.
pub fn summarize<B: Backend>(outputs: &FeatureMaps<B>) -> Vec<LevelSummary> {
    outputs
        .iter()
        .map(|(level, tensor)| LevelSummary {
            level: level.clone(),
            dims: tensor.dims(),
        })
        .collect()
}
