//! Core configuration structures for the decoder factory.
//!
//! `ModelConfig` mirrors the part of a detection/segmentation model config
//! that the factory reads: the pyramid level range, a one-of decoder record
//! and the shared normalization/activation settings.

use crate::error::{DecoderError, DecoderResult};
use crate::models::modules::NormSettings;
use burn::prelude::*;

use super::enums::*;

/// Model-level configuration consumed by [`crate::build_decoder`].
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// Finest pyramid level produced by the decoder.
    #[config(default = "3")]
    pub min_level: usize,
    /// Coarsest pyramid level produced by the decoder.
    #[config(default = "7")]
    pub max_level: usize,
    /// Decoder discriminator and per-type parameters.
    #[config(default = "DecoderSelection::new()")]
    pub decoder: DecoderSelection,
    /// Normalization and activation shared by every decoder.
    #[config(default = "NormActivationConfig::new()")]
    pub norm_activation: NormActivationConfig,
}

/// One-of record: the discriminator plus one parameter record per decoder.
///
/// Only the record matching `decoder_type` is read.
#[derive(Config, Debug)]
pub struct DecoderSelection {
    /// One of `identity`, `fpn`, `nasfpn`, `aspp`, `mrfm`.
    #[config(default = "String::from(\"identity\")")]
    pub decoder_type: String,
    #[config(default = "FpnParams::new()")]
    pub fpn: FpnParams,
    #[config(default = "NasFpnParams::new()")]
    pub nasfpn: NasFpnParams,
    #[config(default = "AsppParams::new()")]
    pub aspp: AsppParams,
    #[config(default = "MrfmParams::new()")]
    pub mrfm: MrfmParams,
}

impl DecoderSelection {
    /// Selects `decoder_type` by its discriminator.
    pub fn select(decoder_type: DecoderType) -> Self {
        Self::new().with_decoder_type(decoder_type.as_str().to_string())
    }

    /// Parses the discriminator.
    ///
    /// # Errors
    ///
    /// Returns `UnknownDecoder` if the discriminator is not a known type.
    pub fn kind(&self) -> DecoderResult<DecoderType> {
        self.decoder_type.parse()
    }
}

/// Normalization and activation settings shared by all decoders.
#[derive(Config, Debug)]
pub struct NormActivationConfig {
    /// Activation name, e.g. `relu` or `swish`.
    #[config(default = "String::from(\"relu\")")]
    pub activation: String,
    /// Request cross-replica batch normalization.
    #[config(default = "false")]
    pub use_sync_bn: bool,
    /// Moving-average decay of the normalization statistics.
    #[config(default = "0.99")]
    pub norm_momentum: f64,
    /// Variance epsilon of the normalization.
    #[config(default = "0.001")]
    pub norm_epsilon: f64,
}

impl NormActivationConfig {
    /// Parses the activation name.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedActivation` for unknown names.
    pub fn activation_kind(&self) -> DecoderResult<ActivationKind> {
        self.activation.parse()
    }

    /// The normalization part of these settings.
    pub fn norm(&self) -> NormSettings {
        NormSettings::new()
            .with_use_sync_bn(self.use_sync_bn)
            .with_momentum(self.norm_momentum)
            .with_epsilon(self.norm_epsilon)
    }
}

/// Parameters of the FPN decoder.
#[derive(Config, Debug)]
pub struct FpnParams {
    #[config(default = "256")]
    pub num_filters: usize,
    #[config(default = "false")]
    pub use_separable_conv: bool,
}

/// Parameters of the NAS-FPN decoder.
#[derive(Config, Debug)]
pub struct NasFpnParams {
    #[config(default = "256")]
    pub num_filters: usize,
    /// Number of times the searched cell is stacked.
    #[config(default = "5")]
    pub num_repeats: usize,
    #[config(default = "false")]
    pub use_separable_conv: bool,
}

/// Parameters of the ASPP decoder.
#[derive(Config, Debug)]
pub struct AsppParams {
    /// Level the pyramid pooling is applied to.
    #[config(default = "4")]
    pub level: usize,
    /// One atrous branch per rate.
    #[config(default = "Vec::new()")]
    pub dilation_rates: Vec<usize>,
    #[config(default = "256")]
    pub num_filters: usize,
    /// Average-pool kernel of the image-pooling branch; global pooling if unset.
    #[config(default = "None")]
    pub pool_kernel_size: Option<[usize; 2]>,
    #[config(default = "0.0")]
    pub dropout_rate: f64,
}

/// Parameters of the multi-resolution feature map decoder.
#[derive(Config, Debug)]
pub struct MrfmParams {
    /// Backbone layer per output map; empty entries are generated maps.
    #[config(default = "default_fml_from_layer()")]
    pub fml_from_layer: Vec<String>,
    /// Depth per output map; ignored (conventionally `-1`) for backbone maps.
    #[config(default = "default_fml_layer_depth()")]
    pub fml_layer_depth: Vec<i64>,
    #[config(default = "1.0")]
    pub depth_multiplier: f64,
    #[config(default = "16")]
    pub min_depth: usize,
    /// Insert a 1x1 bottleneck before each generated map.
    #[config(default = "true")]
    pub insert_1x1_conv: bool,
    #[config(default = "3")]
    pub kernel_size: usize,
    #[config(default = "false")]
    pub use_explicit_padding: bool,
    #[config(default = "false")]
    pub use_depthwise: bool,
}

fn default_fml_from_layer() -> Vec<String> {
    ["4", "5", "", "", "", ""]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_fml_layer_depth() -> Vec<i64> {
    vec![-1, -1, 512, 256, 256, 128]
}

impl ModelConfig {
    /// Validate the configuration and return appropriate errors for invalid settings.
    ///
    /// # Errors
    ///
    /// Returns `Err(DecoderError::UnknownDecoder)` if the discriminator is unknown.
    /// Returns `Err(DecoderError::UnsupportedActivation)` if the activation is unknown.
    /// Returns `Err(DecoderError::InvalidConfiguration)` if any other rule is violated.
    ///
    /// Only the parameters of the selected decoder are checked; the identity
    /// decoder reads nothing else.
    pub fn validate(&self) -> DecoderResult<()> {
        let decoder_type = self.decoder.kind()?;
        if decoder_type == DecoderType::Identity {
            return Ok(());
        }
        self.norm_activation.activation_kind()?;

        // aspp reads a single level and ignores the pyramid range
        if decoder_type != DecoderType::Aspp && self.min_level > self.max_level {
            return Err(DecoderError::InvalidConfiguration {
                reason: format!(
                    "min_level ({}) must not exceed max_level ({})",
                    self.min_level, self.max_level
                ),
            });
        }

        if !(0.0..1.0).contains(&self.norm_activation.norm_momentum) {
            return Err(DecoderError::InvalidConfiguration {
                reason: format!(
                    "norm_momentum must be in [0, 1), got {}",
                    self.norm_activation.norm_momentum
                ),
            });
        }

        match decoder_type {
            DecoderType::Identity => {}
            DecoderType::Fpn => {
                if self.decoder.fpn.num_filters == 0 {
                    return Err(zero_filters("fpn"));
                }
            }
            DecoderType::NasFpn => {
                if self.decoder.nasfpn.num_filters == 0 {
                    return Err(zero_filters("nasfpn"));
                }
                if self.decoder.nasfpn.num_repeats == 0 {
                    return Err(DecoderError::InvalidConfiguration {
                        reason: "nasfpn num_repeats must be at least 1".to_string(),
                    });
                }
            }
            DecoderType::Aspp => {
                let aspp = &self.decoder.aspp;
                if aspp.num_filters == 0 {
                    return Err(zero_filters("aspp"));
                }
                if !(0.0..1.0).contains(&aspp.dropout_rate) {
                    return Err(DecoderError::InvalidConfiguration {
                        reason: format!("aspp dropout_rate must be in [0, 1), got {}", aspp.dropout_rate),
                    });
                }
            }
            DecoderType::Mrfm => {
                let mrfm = &self.decoder.mrfm;
                if mrfm.fml_from_layer.len() != mrfm.fml_layer_depth.len() {
                    return Err(DecoderError::InvalidConfiguration {
                        reason: format!(
                            "mrfm feature map layout lengths differ: {} layers, {} depths",
                            mrfm.fml_from_layer.len(),
                            mrfm.fml_layer_depth.len()
                        ),
                    });
                }
                if !(mrfm.depth_multiplier.is_finite() && mrfm.depth_multiplier > 0.0) {
                    return Err(DecoderError::InvalidConfiguration {
                        reason: format!(
                            "mrfm depth_multiplier must be positive, got {}",
                            mrfm.depth_multiplier
                        ),
                    });
                }
            }
        }

        Ok(())
    }
}

fn zero_filters(decoder: &str) -> DecoderError {
    DecoderError::InvalidConfiguration {
        reason: format!("{decoder} num_filters must be positive"),
    }
}
