//! # Decoder Factory
//!
//! This module provides `build_decoder`, which constructs the decoder selected
//! by `model_config.decoder.decoder_type` and wires in the shared
//! normalization, activation and regularization settings.
//!
//! Routing is split from initialization: [`decoder_config`] maps the model
//! config onto the selected decoder's own config without touching a device,
//! and [`build_decoder`] initializes it.

use burn::prelude::*;

use super::{
    Aspp, AsppConfig, FeatureMapLayout, Fpn, FpnConfig, Mrfm, MrfmConfig, NasFpn, NasFpnConfig,
};
use super::modules::L2Regularizer;
use crate::config::{DecoderType, ModelConfig};
use crate::error::DecoderResult;
use crate::specs::{FeatureMaps, InputSpecs};

/// The config of a selected, non-identity decoder.
#[derive(Debug, Clone)]
pub enum DecoderModuleConfig {
    Fpn(FpnConfig),
    NasFpn(NasFpnConfig),
    Aspp(AsppConfig),
    Mrfm(MrfmConfig),
}

impl DecoderModuleConfig {
    /// The decoder type this config builds.
    pub const fn decoder_type(&self) -> DecoderType {
        match self {
            Self::Fpn(_) => DecoderType::Fpn,
            Self::NasFpn(_) => DecoderType::NasFpn,
            Self::Aspp(_) => DecoderType::Aspp,
            Self::Mrfm(_) => DecoderType::Mrfm,
        }
    }

    /// Initializes the decoder.
    ///
    /// # Errors
    ///
    /// Propagates the selected decoder's initialization errors.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> DecoderResult<Decoder<B>> {
        Ok(match self {
            Self::Fpn(config) => Decoder::Fpn(config.init(device)?),
            Self::NasFpn(config) => Decoder::NasFpn(config.init(device)?),
            Self::Aspp(config) => Decoder::Aspp(config.init(device)?),
            Self::Mrfm(config) => Decoder::Mrfm(config.init(device)?),
        })
    }
}

/// An enum to encapsulate the different decoder architectures.
#[derive(Module, Debug)]
pub enum Decoder<B: Backend> {
    /// Feature Pyramid Network.
    Fpn(Fpn<B>),
    /// NAS-FPN.
    NasFpn(NasFpn<B>),
    /// Atrous Spatial Pyramid Pooling.
    Aspp(Aspp<B>),
    /// Multi-resolution feature maps.
    Mrfm(Mrfm<B>),
}

impl<B: Backend> Decoder<B> {
    /// The type of this decoder.
    pub const fn decoder_type(&self) -> DecoderType {
        match self {
            Self::Fpn(_) => DecoderType::Fpn,
            Self::NasFpn(_) => DecoderType::NasFpn,
            Self::Aspp(_) => DecoderType::Aspp,
            Self::Mrfm(_) => DecoderType::Mrfm,
        }
    }

    /// Turns backbone feature maps into decoder feature maps.
    ///
    /// # Errors
    ///
    /// Returns `MissingFeatureLevel` if a level the decoder was built for is
    /// absent from `features`.
    pub fn forward(&self, features: FeatureMaps<B>) -> DecoderResult<FeatureMaps<B>> {
        match self {
            Self::Fpn(decoder) => decoder.forward(features),
            Self::NasFpn(decoder) => decoder.forward(features),
            Self::Aspp(decoder) => decoder.forward(features),
            Self::Mrfm(decoder) => decoder.forward(features),
        }
    }

    /// Specs of the maps returned by [`Decoder::forward`].
    pub fn output_specs(&self) -> &InputSpecs {
        match self {
            Self::Fpn(decoder) => decoder.output_specs(),
            Self::NasFpn(decoder) => decoder.output_specs(),
            Self::Aspp(decoder) => decoder.output_specs(),
            Self::Mrfm(decoder) => decoder.output_specs(),
        }
    }

    /// L2 penalty over the decoder's kernels, if a regularizer was given.
    pub fn regularization_loss(&self) -> Option<Tensor<B, 1>> {
        match self {
            Self::Fpn(decoder) => decoder.regularization_loss(),
            Self::NasFpn(decoder) => decoder.regularization_loss(),
            Self::Aspp(decoder) => decoder.regularization_loss(),
            Self::Mrfm(decoder) => decoder.regularization_loss(),
        }
    }
}

/// Maps a model config onto the config of the selected decoder.
///
/// Returns `Ok(None)` for the identity decoder.
///
/// # Errors
///
/// Returns `DecoderError::UnknownDecoder` if `decoder_type` names no known
/// decoder, and the other validation errors of [`ModelConfig::validate`].
pub fn decoder_config(
    input_specs: &InputSpecs,
    model_config: &ModelConfig,
    l2_regularizer: Option<L2Regularizer>,
) -> DecoderResult<Option<DecoderModuleConfig>> {
    model_config.validate()?;

    let norm_activation = &model_config.norm_activation;
    let config = match model_config.decoder.kind()? {
        DecoderType::Identity => return Ok(None),
        DecoderType::Fpn => {
            let params = &model_config.decoder.fpn;
            DecoderModuleConfig::Fpn(
                FpnConfig::new(input_specs.clone())
                    .with_min_level(model_config.min_level)
                    .with_max_level(model_config.max_level)
                    .with_num_filters(params.num_filters)
                    .with_use_separable_conv(params.use_separable_conv)
                    .with_activation(norm_activation.activation_kind()?)
                    .with_norm(norm_activation.norm())
                    .with_kernel_regularizer(l2_regularizer),
            )
        }
        DecoderType::NasFpn => {
            let params = &model_config.decoder.nasfpn;
            DecoderModuleConfig::NasFpn(
                NasFpnConfig::new(input_specs.clone())
                    .with_min_level(model_config.min_level)
                    .with_max_level(model_config.max_level)
                    .with_num_filters(params.num_filters)
                    .with_num_repeats(params.num_repeats)
                    .with_use_separable_conv(params.use_separable_conv)
                    .with_activation(norm_activation.activation_kind()?)
                    .with_norm(norm_activation.norm())
                    .with_kernel_regularizer(l2_regularizer),
            )
        }
        DecoderType::Aspp => {
            let params = &model_config.decoder.aspp;
            DecoderModuleConfig::Aspp(
                AsppConfig::new(input_specs.clone())
                    .with_level(params.level)
                    .with_dilation_rates(params.dilation_rates.clone())
                    .with_num_filters(params.num_filters)
                    .with_pool_kernel_size(params.pool_kernel_size)
                    .with_dropout_rate(params.dropout_rate)
                    .with_activation(norm_activation.activation_kind()?)
                    .with_norm(norm_activation.norm())
                    .with_kernel_regularizer(l2_regularizer),
            )
        }
        DecoderType::Mrfm => {
            let params = &model_config.decoder.mrfm;
            let layout = FeatureMapLayout::new(
                params.fml_from_layer.clone(),
                params.fml_layer_depth.clone(),
            );
            DecoderModuleConfig::Mrfm(
                MrfmConfig::new(input_specs.clone(), layout)
                    .with_depth_multiplier(params.depth_multiplier)
                    .with_min_depth(params.min_depth)
                    .with_insert_1x1_conv(params.insert_1x1_conv)
                    .with_kernel_size(params.kernel_size)
                    .with_use_explicit_padding(params.use_explicit_padding)
                    .with_use_depthwise(params.use_depthwise)
                    .with_activation(norm_activation.activation_kind()?)
                    .with_norm(norm_activation.norm())
                    .with_kernel_regularizer(l2_regularizer),
            )
        }
    };

    Ok(Some(config))
}

/// Constructs a decoder based on the provided configuration.
///
/// This function acts as a factory, instantiating the decoder architecture
/// named by `model_config.decoder.decoder_type`.
///
/// # Arguments
///
/// * `input_specs` - Specs of the backbone feature maps, keyed by level.
/// * `model_config` - The model configuration.
/// * `l2_regularizer` - Optional L2 penalty on the decoder's kernels.
/// * `device` - The device to create the decoder on.
///
/// # Returns
///
/// `Ok(None)` for the identity decoder, otherwise the constructed decoder.
///
/// # Errors
///
/// Returns `DecoderError::UnknownDecoder` if the decoder type is not one of
/// `identity`, `fpn`, `nasfpn`, `aspp`, `mrfm`, and propagates configuration
/// errors of the selected decoder.
pub fn build_decoder<B: Backend>(
    input_specs: &InputSpecs,
    model_config: &ModelConfig,
    l2_regularizer: Option<L2Regularizer>,
    device: &Device<B>,
) -> DecoderResult<Option<Decoder<B>>> {
    let Some(config) = decoder_config(input_specs, model_config, l2_regularizer)? else {
        tracing::info!("identity decoder selected, backbone features pass through");
        return Ok(None);
    };

    if model_config.norm_activation.use_sync_bn {
        tracing::warn!("synchronized batch norm requested, using per-device statistics");
    }
    tracing::info!(
        decoder = %config.decoder_type(),
        min_level = model_config.min_level,
        max_level = model_config.max_level,
        activation = %model_config.norm_activation.activation,
        "building decoder",
    );

    let decoder = config.init(device)?;
    tracing::debug!(
        levels = ?decoder.output_specs().keys().collect::<Vec<_>>(),
        "decoder built",
    );
    Ok(Some(decoder))
}
