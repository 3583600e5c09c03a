//! # Multi-Resolution Feature Maps
//!
//! SSD-style feature map generator. A layout lists one entry per output map:
//! an entry naming a backbone layer passes that map through, an empty entry
//! generates a new map from the previous one with a stride-2 convolution
//! (optionally preceded by a 1x1 bottleneck). Generated maps are keyed by the
//! level after the map they were generated from.

use std::collections::BTreeSet;

use burn::{module::Ignored, prelude::*};

use super::modules::{
    sum_penalties, ConvKind, ConvNormAct, ConvNormActConfig, L2Regularizer, NormSettings,
    Padding,
};
use crate::config::ActivationKind;
use crate::error::{DecoderError, DecoderResult};
use crate::specs::{level_key, parse_level, spec_at, FeatureMaps, FeatureSpec, InputSpecs};

/// Which maps to produce and how deep generated maps are.
#[derive(Config, Debug)]
pub struct FeatureMapLayout {
    /// Backbone layer per output map; an empty string generates a map.
    pub from_layer: Vec<String>,
    /// Depth per output map, before the depth multiplier. Ignored for
    /// backbone maps.
    pub layer_depth: Vec<i64>,
}

/// Configuration for the `Mrfm` decoder.
#[derive(Config, Debug)]
pub struct MrfmConfig {
    /// Specs of the backbone layers.
    pub input_specs: InputSpecs,
    pub feature_map_layout: FeatureMapLayout,
    #[config(default = "1.0")]
    pub depth_multiplier: f64,
    #[config(default = "16")]
    pub min_depth: usize,
    #[config(default = "true")]
    pub insert_1x1_conv: bool,
    #[config(default = "3")]
    pub kernel_size: usize,
    #[config(default = "false")]
    pub use_explicit_padding: bool,
    #[config(default = "false")]
    pub use_depthwise: bool,
    #[config(default = "ActivationKind::Relu")]
    pub activation: ActivationKind,
    #[config(default = "NormSettings::new()")]
    pub norm: NormSettings,
    #[config(default = "None")]
    pub kernel_regularizer: Option<L2Regularizer>,
}

impl MrfmConfig {
    /// `max(floor(depth * depth_multiplier), min_depth)`.
    pub fn depth(&self, depth: f64) -> usize {
        ((depth * self.depth_multiplier) as usize).max(self.min_depth)
    }

    fn checked_depth(&self, index: usize, depth: i64) -> DecoderResult<usize> {
        match self.depth(depth as f64) {
            0 => Err(DecoderError::InvalidConfiguration {
                reason: format!("generated feature map {index} has zero channels"),
            }),
            depth => Ok(depth),
        }
    }

    /// Initializes a new `Mrfm` decoder.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if the depth multiplier is not a
    /// positive number, the layout is empty, its two lists differ in length,
    /// it starts with a generated map, a generated map or its bottleneck ends
    /// up with no channels, or two entries produce the same key. Returns
    /// `MissingFeatureLevel` if a named backbone layer is not in the specs.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> DecoderResult<Mrfm<B>> {
        if !(self.depth_multiplier.is_finite() && self.depth_multiplier > 0.0) {
            return Err(DecoderError::InvalidConfiguration {
                reason: format!(
                    "mrfm depth_multiplier must be positive, got {}",
                    self.depth_multiplier
                ),
            });
        }
        let layout = &self.feature_map_layout;
        if layout.from_layer.len() != layout.layer_depth.len() {
            return Err(DecoderError::InvalidConfiguration {
                reason: format!(
                    "feature map layout lengths differ: {} layers, {} depths",
                    layout.from_layer.len(),
                    layout.layer_depth.len()
                ),
            });
        }

        let padding = if self.use_explicit_padding {
            Padding::Fixed
        } else {
            Padding::Same
        };
        let block = |in_channels: usize, out_channels: usize| {
            ConvNormActConfig::new(in_channels, out_channels)
                .with_padding(padding)
                .with_norm(Some(self.norm.clone()))
                .with_activation(Some(self.activation))
        };

        let mut keys = Vec::with_capacity(layout.from_layer.len());
        let mut generators = Vec::with_capacity(layout.from_layer.len());
        let mut output_specs = InputSpecs::new();
        let mut seen = BTreeSet::new();
        let mut previous: Option<(String, FeatureSpec)> = None;

        for (index, (from_layer, &layer_depth)) in
            layout.from_layer.iter().zip(&layout.layer_depth).enumerate()
        {
            let (key, spec, generator) = if !from_layer.is_empty() {
                let spec = spec_at(&self.input_specs, from_layer)?;
                (from_layer.clone(), spec, None)
            } else {
                let Some((previous_key, previous_spec)) = &previous else {
                    return Err(DecoderError::InvalidConfiguration {
                        reason: "feature map layout must start with a backbone layer".to_string(),
                    });
                };
                if layer_depth <= 0 {
                    return Err(DecoderError::InvalidConfiguration {
                        reason: format!(
                            "generated feature map {index} needs a positive depth, got {layer_depth}"
                        ),
                    });
                }

                let mut in_channels = previous_spec.channels;
                let bottleneck = if self.insert_1x1_conv {
                    let depth = self.checked_depth(index, layer_depth / 2)?;
                    let conv = block(in_channels, depth).init(device)?;
                    in_channels = depth;
                    Some(conv)
                } else {
                    None
                };

                let depth = self.checked_depth(index, layer_depth)?;
                let (conv, pointwise) = if self.use_depthwise {
                    let depthwise = block(in_channels, in_channels)
                        .with_kind(ConvKind::Depthwise)
                        .with_kernel_size(self.kernel_size)
                        .with_stride(2)
                        .init(device)?;
                    (depthwise, Some(block(in_channels, depth).init(device)?))
                } else {
                    let conv = block(in_channels, depth)
                        .with_kernel_size(self.kernel_size)
                        .with_stride(2)
                        .init(device)?;
                    (conv, None)
                };

                let key = level_key(parse_level(previous_key)? + 1);
                let generator = GeneratedMap {
                    bottleneck,
                    conv,
                    pointwise,
                };
                (key, previous_spec.downsampled(1, depth), Some(generator))
            };

            if !seen.insert(key.clone()) {
                return Err(DecoderError::InvalidConfiguration {
                    reason: format!("feature map '{key}' is produced twice"),
                });
            }
            keys.push(key.clone());
            generators.push(generator);
            output_specs.insert(key.clone(), spec);
            previous = Some((key, spec));
        }

        if keys.is_empty() {
            return Err(DecoderError::InvalidConfiguration {
                reason: "feature map layout is empty".to_string(),
            });
        }

        Ok(Mrfm {
            generators,
            keys: Ignored(keys),
            output_specs: Ignored(output_specs),
            kernel_regularizer: Ignored(self.kernel_regularizer.clone()),
        })
    }
}

/// Layers producing one generated map.
#[derive(Module, Debug)]
struct GeneratedMap<B: Backend> {
    bottleneck: Option<ConvNormAct<B>>,
    /// Stride-2 convolution; depthwise when `pointwise` is set.
    conv: ConvNormAct<B>,
    pointwise: Option<ConvNormAct<B>>,
}

impl<B: Backend> GeneratedMap<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = match &self.bottleneck {
            Some(bottleneck) => bottleneck.forward(x),
            None => x,
        };
        let x = self.conv.forward(x);
        match &self.pointwise {
            Some(pointwise) => pointwise.forward(x),
            None => x,
        }
    }

    fn convs(&self) -> impl Iterator<Item = &ConvNormAct<B>> {
        self.bottleneck
            .iter()
            .chain(std::iter::once(&self.conv))
            .chain(self.pointwise.iter())
    }
}

/// Multi-resolution feature map decoder.
#[derive(Module, Debug)]
pub struct Mrfm<B: Backend> {
    /// One entry per output map; `None` passes a backbone map through.
    generators: Vec<Option<GeneratedMap<B>>>,
    keys: Ignored<Vec<String>>,
    output_specs: Ignored<InputSpecs>,
    kernel_regularizer: Ignored<Option<L2Regularizer>>,
}

impl<B: Backend> Mrfm<B> {
    /// Produces the maps of the layout.
    ///
    /// # Errors
    ///
    /// Returns `MissingFeatureLevel` if a backbone layer named by the layout
    /// is absent from `features`.
    pub fn forward(&self, features: FeatureMaps<B>) -> DecoderResult<FeatureMaps<B>> {
        let mut outputs = FeatureMaps::new();
        let mut previous: Option<Tensor<B, 4>> = None;
        for (key, generator) in self.keys.0.iter().zip(&self.generators) {
            let map = match (generator, previous) {
                (None, _) => features
                    .get(key)
                    .cloned()
                    .ok_or_else(|| DecoderError::MissingFeatureLevel { level: key.clone() })?,
                (Some(generator), Some(x)) => generator.forward(x),
                (Some(_), None) => {
                    return Err(DecoderError::InvalidConfiguration {
                        reason: "feature map layout must start with a backbone layer".to_string(),
                    });
                }
            };
            previous = Some(map.clone());
            outputs.insert(key.clone(), map);
        }
        Ok(outputs)
    }

    /// Specs of the maps returned by [`Mrfm::forward`].
    pub fn output_specs(&self) -> &InputSpecs {
        &self.output_specs.0
    }

    /// L2 penalty over all convolution kernels, if a regularizer was configured.
    pub fn regularization_loss(&self) -> Option<Tensor<B, 1>> {
        let regularizer = self.kernel_regularizer.0.as_ref()?;
        sum_penalties(
            self.generators
                .iter()
                .flatten()
                .flat_map(GeneratedMap::convs)
                .map(|conv| conv.kernel_penalty(regularizer)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn specs() -> InputSpecs {
        InputSpecs::from([
            ("4".to_string(), FeatureSpec::new(16).with_size(16, 16)),
            ("5".to_string(), FeatureSpec::new(32).with_size(8, 8)),
        ])
    }

    fn features(device: &<TestBackend as Backend>::Device) -> FeatureMaps<TestBackend> {
        FeatureMaps::from([
            ("4".to_string(), Tensor::ones([1, 16, 16, 16], device)),
            ("5".to_string(), Tensor::ones([1, 32, 8, 8], device)),
        ])
    }

    fn layout() -> FeatureMapLayout {
        FeatureMapLayout::new(
            vec!["4".into(), "5".into(), "".into(), "".into()],
            vec![-1, -1, 64, 24],
        )
    }

    #[test]
    fn depth_applies_multiplier_and_floor() {
        let config = MrfmConfig::new(specs(), layout())
            .with_depth_multiplier(0.5)
            .with_min_depth(16);
        assert_eq!(config.depth(512.0), 256);
        assert_eq!(config.depth(24.0), 16);
    }

    #[test]
    fn mrfm_generates_levels_after_the_backbone() {
        let device = Default::default();
        let mrfm = MrfmConfig::new(specs(), layout())
            .init::<TestBackend>(&device)
            .unwrap();

        let outputs = mrfm.forward(features(&device)).unwrap();
        let levels: Vec<&str> = outputs.keys().map(String::as_str).collect();
        assert_eq!(levels, ["4", "5", "6", "7"]);
        assert_eq!(outputs["4"].dims(), [1, 16, 16, 16]);
        assert_eq!(outputs["6"].dims(), [1, 64, 4, 4]);
        assert_eq!(outputs["7"].dims(), [1, 24, 2, 2]);
        assert_eq!(mrfm.output_specs()["7"], FeatureSpec::new(24).with_size(2, 2));
    }

    #[test]
    fn mrfm_depthwise_explicit_padding_without_bottleneck() {
        let device = Default::default();
        let mrfm = MrfmConfig::new(specs(), layout())
            .with_insert_1x1_conv(false)
            .with_use_depthwise(true)
            .with_use_explicit_padding(true)
            .with_depth_multiplier(0.25)
            .with_kernel_regularizer(Some(L2Regularizer::new(4e-5)))
            .init::<TestBackend>(&device)
            .unwrap();

        let outputs = mrfm.forward(features(&device)).unwrap();
        assert_eq!(outputs["6"].dims(), [1, 16, 4, 4]);
        assert_eq!(outputs["7"].dims(), [1, 16, 2, 2]);
        assert!(mrfm.regularization_loss().is_some());
    }

    #[test]
    fn mrfm_bottleneck_is_half_the_generated_depth() {
        let device = Default::default();
        let specs = InputSpecs::from([("5".to_string(), FeatureSpec::new(2048).with_size(4, 4))]);
        let layout = FeatureMapLayout::new(vec!["5".into(), "".into()], vec![-1, 512]);
        let mrfm = MrfmConfig::new(specs, layout)
            .init::<TestBackend>(&device)
            .unwrap();

        let generated = mrfm.generators[1].as_ref().unwrap();
        assert_eq!(generated.bottleneck.as_ref().unwrap().out_channels(), 256);
        assert_eq!(generated.conv.out_channels(), 512);
        assert_eq!(mrfm.output_specs()["6"], FeatureSpec::new(512).with_size(2, 2));
    }

    #[test]
    fn mrfm_rejects_unusable_depth_multiplier() {
        let device = Default::default();
        for multiplier in [f64::NAN, 0.0, -1.0] {
            let result = MrfmConfig::new(specs(), layout())
                .with_depth_multiplier(multiplier)
                .init::<TestBackend>(&device);
            assert!(matches!(
                result,
                Err(DecoderError::InvalidConfiguration { .. })
            ));
        }
    }

    #[test]
    fn mrfm_rejects_generated_map_without_channels() {
        let device = Default::default();
        let result = MrfmConfig::new(specs(), layout())
            .with_depth_multiplier(0.001)
            .with_min_depth(0)
            .init::<TestBackend>(&device);
        assert!(matches!(
            result,
            Err(DecoderError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn mrfm_rejects_layout_starting_with_generated_map() {
        let device = Default::default();
        let layout = FeatureMapLayout::new(vec!["".into(), "4".into()], vec![32, -1]);
        let result = MrfmConfig::new(specs(), layout).init::<TestBackend>(&device);
        assert!(matches!(
            result,
            Err(DecoderError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn mrfm_rejects_mismatched_layout() {
        let device = Default::default();
        let layout = FeatureMapLayout::new(vec!["4".into(), "".into()], vec![-1]);
        let result = MrfmConfig::new(specs(), layout).init::<TestBackend>(&device);
        assert!(matches!(
            result,
            Err(DecoderError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn mrfm_rejects_duplicate_keys() {
        let device = Default::default();
        // "4" then a generated map keyed "5", then backbone "5" again
        let layout = FeatureMapLayout::new(
            vec!["4".into(), "".into(), "5".into()],
            vec![-1, 32, -1],
        );
        let result = MrfmConfig::new(specs(), layout).init::<TestBackend>(&device);
        assert!(matches!(
            result,
            Err(DecoderError::InvalidConfiguration { .. })
        ));
    }
}
