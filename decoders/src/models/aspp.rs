//! # Atrous Spatial Pyramid Pooling (ASPP)
//!
//! Captures multi-scale context on a single pyramid level with parallel
//! branches: a 1x1 convolution, one 3x3 atrous convolution per dilation rate,
//! and an image-pooling branch. The branches are concatenated and projected
//! back to `num_filters` channels.

use burn::{
    module::Ignored,
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, AvgPool2d, AvgPool2dConfig},
        Dropout, DropoutConfig,
    },
    prelude::*,
};
use burn_extra_ops::resize_bilinear;

use super::modules::{
    sum_penalties, ConvNormAct, ConvNormActConfig, L2Regularizer, NormSettings,
};
use crate::config::ActivationKind;
use crate::error::{DecoderError, DecoderResult};
use crate::specs::{level_key, spec_at, take_level, FeatureMaps, InputSpecs};

/// Configuration for the `Aspp` decoder.
#[derive(Config, Debug)]
pub struct AsppConfig {
    /// Specs of the backbone levels; only `level` is read.
    pub input_specs: InputSpecs,
    /// Level the pyramid pooling is applied to.
    #[config(default = "4")]
    pub level: usize,
    /// One 3x3 atrous branch per rate.
    #[config(default = "Vec::new()")]
    pub dilation_rates: Vec<usize>,
    #[config(default = "256")]
    pub num_filters: usize,
    /// Average-pool kernel of the image-pooling branch; global pooling if `None`.
    #[config(default = "None")]
    pub pool_kernel_size: Option<[usize; 2]>,
    #[config(default = "0.0")]
    pub dropout_rate: f64,
    #[config(default = "ActivationKind::Relu")]
    pub activation: ActivationKind,
    #[config(default = "NormSettings::new()")]
    pub norm: NormSettings,
    #[config(default = "None")]
    pub kernel_regularizer: Option<L2Regularizer>,
}

impl AsppConfig {
    /// Initializes a new `Aspp` decoder.
    ///
    /// # Errors
    ///
    /// Returns `MissingFeatureLevel` if `level` is not in the input specs and
    /// `InvalidConfiguration` for a zero dilation rate or pool kernel.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> DecoderResult<Aspp<B>> {
        let key = level_key(self.level);
        let spec = spec_at(&self.input_specs, &key)?;
        if self.dilation_rates.contains(&0) {
            return Err(DecoderError::InvalidConfiguration {
                reason: "aspp dilation rates must be positive".to_string(),
            });
        }
        if matches!(self.pool_kernel_size, Some([h, w]) if h == 0 || w == 0) {
            return Err(DecoderError::InvalidConfiguration {
                reason: "aspp pool kernel must be positive".to_string(),
            });
        }

        let branch = |in_channels: usize, kernel_size: usize, dilation: usize| {
            ConvNormActConfig::new(in_channels, self.num_filters)
                .with_kernel_size(kernel_size)
                .with_dilation(dilation)
                .with_norm(Some(self.norm.clone()))
                .with_activation(Some(self.activation))
                .init(device)
        };

        let conv1x1 = branch(spec.channels, 1, 1)?;
        let atrous_convs = self
            .dilation_rates
            .iter()
            .map(|&rate| branch(spec.channels, 3, rate))
            .collect::<DecoderResult<Vec<_>>>()?;

        let (global_pool, avg_pool) = match self.pool_kernel_size {
            None => (Some(AdaptiveAvgPool2dConfig::new([1, 1]).init()), None),
            Some(kernel) => (None, Some(AvgPool2dConfig::new(kernel).with_strides(kernel).init())),
        };
        let pool_conv = branch(spec.channels, 1, 1)?;

        let projection = branch(self.num_filters * (2 + self.dilation_rates.len()), 1, 1)?;
        let dropout = DropoutConfig::new(self.dropout_rate).init();

        Ok(Aspp {
            conv1x1,
            atrous_convs,
            global_pool,
            avg_pool,
            pool_conv,
            projection,
            dropout,
            level: self.level,
            output_specs: Ignored(InputSpecs::from([(
                key,
                spec.downsampled(0, self.num_filters),
            )])),
            kernel_regularizer: Ignored(self.kernel_regularizer.clone()),
        })
    }
}

/// Atrous Spatial Pyramid Pooling decoder.
#[derive(Module, Debug)]
pub struct Aspp<B: Backend> {
    conv1x1: ConvNormAct<B>,
    atrous_convs: Vec<ConvNormAct<B>>,
    global_pool: Option<AdaptiveAvgPool2d>,
    avg_pool: Option<AvgPool2d>,
    pool_conv: ConvNormAct<B>,
    projection: ConvNormAct<B>,
    dropout: Dropout,
    level: usize,
    output_specs: Ignored<InputSpecs>,
    kernel_regularizer: Ignored<Option<L2Regularizer>>,
}

impl<B: Backend> Aspp<B> {
    /// Applies pyramid pooling to the configured level.
    ///
    /// # Errors
    ///
    /// Returns `MissingFeatureLevel` if the level is absent from `features`.
    pub fn forward(&self, mut features: FeatureMaps<B>) -> DecoderResult<FeatureMaps<B>> {
        let key = level_key(self.level);
        let x = take_level(&mut features, &key)?;
        let [_, _, height, width] = x.dims();

        let mut branches = Vec::with_capacity(self.atrous_convs.len() + 2);
        branches.push(self.conv1x1.forward(x.clone()));
        for conv in &self.atrous_convs {
            branches.push(conv.forward(x.clone()));
        }

        // Image-pooling branch
        let pooled = match (&self.global_pool, &self.avg_pool) {
            (Some(pool), _) => pool.forward(x),
            (None, Some(pool)) => pool.forward(x),
            (None, None) => x,
        };
        let pooled = self.pool_conv.forward(pooled);
        branches.push(resize_bilinear(pooled, [height, width]));

        let x = Tensor::cat(branches, 1);
        let x = self.projection.forward(x);

        Ok(FeatureMaps::from([(key, self.dropout.forward(x))]))
    }

    /// Specs of the maps returned by [`Aspp::forward`].
    pub fn output_specs(&self) -> &InputSpecs {
        &self.output_specs.0
    }

    /// L2 penalty over all convolution kernels, if a regularizer was configured.
    pub fn regularization_loss(&self) -> Option<Tensor<B, 1>> {
        let regularizer = self.kernel_regularizer.0.as_ref()?;
        sum_penalties(
            std::iter::once(&self.conv1x1)
                .chain(&self.atrous_convs)
                .chain([&self.pool_conv, &self.projection])
                .map(|conv| conv.kernel_penalty(regularizer)),
        )
    }
}
