//! # Feature Pyramid Network
//!
//! Builds a pyramid with `num_filters` channels at every level in
//! `[min_level, max_level]`: 1x1 lateral projections of the backbone levels,
//! top-down fusion by nearest-neighbour upsampling, a 3x3 output convolution
//! per level, and stride-2 convolutions for levels coarser than the backbone.

use burn::{module::Ignored, nn::BatchNorm, prelude::*};
use burn_extra_ops::resize_nearest;

use super::modules::{
    sum_penalties, Activation, ConvKind, ConvNormAct, ConvNormActConfig, L2Regularizer,
    NormSettings,
};
use crate::config::ActivationKind;
use crate::error::{DecoderError, DecoderResult};
use crate::specs::{level_key, max_level, spec_at, take_level, FeatureMaps, InputSpecs};

/// Configuration for the `Fpn` decoder.
#[derive(Config, Debug)]
pub struct FpnConfig {
    /// Specs of the backbone levels.
    pub input_specs: InputSpecs,
    #[config(default = "3")]
    pub min_level: usize,
    #[config(default = "7")]
    pub max_level: usize,
    #[config(default = "256")]
    pub num_filters: usize,
    #[config(default = "false")]
    pub use_separable_conv: bool,
    #[config(default = "ActivationKind::Relu")]
    pub activation: ActivationKind,
    #[config(default = "NormSettings::new()")]
    pub norm: NormSettings,
    #[config(default = "None")]
    pub kernel_regularizer: Option<L2Regularizer>,
}

impl FpnConfig {
    /// Initializes a new `Fpn` decoder.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if no backbone level reaches `min_level`,
    /// and `MissingFeatureLevel` if a level between `min_level` and the
    /// coarsest backbone level is absent.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> DecoderResult<Fpn<B>> {
        let backbone_max_level = max_level(&self.input_specs)?.min(self.max_level);
        if backbone_max_level < self.min_level || self.min_level > self.max_level {
            return Err(DecoderError::InvalidConfiguration {
                reason: format!(
                    "fpn levels [{}, {}] do not overlap the backbone levels (max {})",
                    self.min_level, self.max_level, backbone_max_level
                ),
            });
        }

        let conv_kind = if self.use_separable_conv {
            ConvKind::Separable
        } else {
            ConvKind::Standard
        };

        let mut lateral_convs = Vec::new();
        let mut output_convs = Vec::new();
        let mut output_specs = InputSpecs::new();
        for level in self.min_level..=backbone_max_level {
            let key = level_key(level);
            let spec = spec_at(&self.input_specs, &key)?;
            lateral_convs.push(
                ConvNormActConfig::new(spec.channels, self.num_filters)
                    .with_kind(conv_kind)
                    .with_bias(true)
                    .init(device)?,
            );
            output_convs.push(
                ConvNormActConfig::new(self.num_filters, self.num_filters)
                    .with_kernel_size(3)
                    .with_kind(conv_kind)
                    .with_bias(true)
                    .init(device)?,
            );
            output_specs.insert(key, spec.downsampled(0, self.num_filters));
        }

        let mut extra_convs = Vec::new();
        for level in backbone_max_level + 1..=self.max_level {
            extra_convs.push(
                ConvNormActConfig::new(self.num_filters, self.num_filters)
                    .with_kernel_size(3)
                    .with_stride(2)
                    .with_kind(conv_kind)
                    .with_bias(true)
                    .init(device)?,
            );
            let previous = spec_at(&output_specs, &level_key(level - 1))?;
            output_specs.insert(level_key(level), previous.downsampled(1, self.num_filters));
        }

        let norms = (self.min_level..=self.max_level)
            .map(|_| self.norm.init(self.num_filters, device))
            .collect();

        Ok(Fpn {
            lateral_convs,
            output_convs,
            extra_convs,
            norms,
            activation: Activation::new(self.activation),
            min_level: self.min_level,
            backbone_max_level,
            output_specs: Ignored(output_specs),
            kernel_regularizer: Ignored(self.kernel_regularizer.clone()),
        })
    }
}

/// Feature Pyramid Network decoder.
#[derive(Module, Debug)]
pub struct Fpn<B: Backend> {
    lateral_convs: Vec<ConvNormAct<B>>,
    output_convs: Vec<ConvNormAct<B>>,
    extra_convs: Vec<ConvNormAct<B>>,
    norms: Vec<BatchNorm<B, 2>>,
    activation: Activation,
    min_level: usize,
    backbone_max_level: usize,
    output_specs: Ignored<InputSpecs>,
    kernel_regularizer: Ignored<Option<L2Regularizer>>,
}

impl<B: Backend> Fpn<B> {
    /// Builds the pyramid from backbone features.
    ///
    /// # Errors
    ///
    /// Returns `MissingFeatureLevel` if a backbone level the decoder was built
    /// for is absent from `features`.
    pub fn forward(&self, mut features: FeatureMaps<B>) -> DecoderResult<FeatureMaps<B>> {
        let mut laterals = Vec::with_capacity(self.lateral_convs.len());
        for (level, conv) in (self.min_level..=self.backbone_max_level).zip(&self.lateral_convs) {
            let x = take_level(&mut features, &level_key(level))?;
            laterals.push(conv.forward(x));
        }

        // Top-down pathway, coarsest level first.
        let mut merged = Vec::with_capacity(laterals.len());
        let mut top: Option<Tensor<B, 4>> = None;
        for lateral in laterals.into_iter().rev() {
            let feat = match top {
                Some(coarser) => {
                    let [_, _, height, width] = lateral.dims();
                    resize_nearest(coarser, [height, width]) + lateral
                }
                None => lateral,
            };
            top = Some(feat.clone());
            merged.push(feat);
        }
        merged.reverse();

        let mut feats: Vec<Tensor<B, 4>> = merged
            .into_iter()
            .zip(&self.output_convs)
            .map(|(x, conv)| conv.forward(x))
            .collect();

        for (index, conv) in self.extra_convs.iter().enumerate() {
            let mut x = feats[feats.len() - 1].clone();
            if index > 0 {
                x = self.activation.forward(x);
            }
            feats.push(conv.forward(x));
        }

        Ok(feats
            .into_iter()
            .zip(&self.norms)
            .enumerate()
            .map(|(offset, (x, norm))| (level_key(self.min_level + offset), norm.forward(x)))
            .collect())
    }

    /// Specs of the maps returned by [`Fpn::forward`].
    pub fn output_specs(&self) -> &InputSpecs {
        &self.output_specs.0
    }

    /// L2 penalty over all convolution kernels, if a regularizer was configured.
    pub fn regularization_loss(&self) -> Option<Tensor<B, 1>> {
        let regularizer = self.kernel_regularizer.0.as_ref()?;
        sum_penalties(
            self.lateral_convs
                .iter()
                .chain(&self.output_convs)
                .chain(&self.extra_convs)
                .map(|conv| conv.kernel_penalty(regularizer)),
        )
    }
}
