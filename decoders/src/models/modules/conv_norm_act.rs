//! # Convolution Blocks
//!
//! `ConvNormAct` is the unit every decoder is assembled from: a convolution
//! (standard, depthwise, or depthwise-separable), an optional batch norm and an
//! optional activation. Padding follows TensorFlow semantics so that strided
//! layers line up with pyramids built by TensorFlow-trained backbones.

use burn::{
    module::Ignored,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, PaddingConfig2d,
    },
    prelude::*,
};
use burn_extra_ops::{pad_fixed, pad_same};
use serde::{Deserialize, Serialize};

use super::{Activation, L2Regularizer, NormSettings};
use crate::config::ActivationKind;
use crate::error::{DecoderError, DecoderResult};

/// The convolution performed by a [`ConvNormAct`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvKind {
    /// Dense convolution.
    Standard,
    /// Depthwise convolution followed by a pointwise 1x1 convolution.
    Separable,
    /// Depthwise convolution only; output channels must equal input channels.
    Depthwise,
}

/// How the spatial convolution is padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Padding {
    /// TensorFlow `"SAME"`: output size is `ceil(input / stride)`.
    Same,
    /// Input-independent padding of `effective_kernel - 1` pixels.
    Fixed,
}

/// Configuration for the `ConvNormAct` block.
#[derive(Config, Debug)]
pub struct ConvNormActConfig {
    in_channels: usize,
    out_channels: usize,
    #[config(default = "1")]
    kernel_size: usize,
    #[config(default = "1")]
    stride: usize,
    #[config(default = "1")]
    dilation: usize,
    #[config(default = "false")]
    bias: bool,
    #[config(default = "ConvKind::Standard")]
    kind: ConvKind,
    #[config(default = "Padding::Same")]
    padding: Padding,
    /// Batch norm after the convolution.
    #[config(default = "None")]
    norm: Option<NormSettings>,
    /// Activation after the normalization.
    #[config(default = "None")]
    activation: Option<ActivationKind>,
}

impl ConvNormActConfig {
    /// Initializes a new `ConvNormAct` block.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` for a depthwise block whose output
    /// channels differ from its input channels, or for zero-sized geometry.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> DecoderResult<ConvNormAct<B>> {
        if self.kernel_size == 0 || self.stride == 0 || self.dilation == 0 {
            return Err(DecoderError::InvalidConfiguration {
                reason: format!(
                    "convolution geometry must be positive: kernel {}, stride {}, dilation {}",
                    self.kernel_size, self.stride, self.dilation
                ),
            });
        }
        if self.kind == ConvKind::Depthwise && self.in_channels != self.out_channels {
            return Err(DecoderError::InvalidConfiguration {
                reason: format!(
                    "depthwise convolution maps {} channels to {}",
                    self.in_channels, self.out_channels
                ),
            });
        }

        let spatial = |out_channels: usize, groups: usize, bias: bool| {
            Conv2dConfig::new(
                [self.in_channels, out_channels],
                [self.kernel_size, self.kernel_size],
            )
            .with_stride([self.stride, self.stride])
            .with_dilation([self.dilation, self.dilation])
            .with_padding(PaddingConfig2d::Valid)
            .with_groups(groups)
            .with_bias(bias)
            .init(device)
        };

        let (depthwise, conv) = match self.kind {
            ConvKind::Standard => (None, spatial(self.out_channels, 1, self.bias)),
            ConvKind::Depthwise => (None, spatial(self.in_channels, self.in_channels, self.bias)),
            ConvKind::Separable => {
                let depthwise = spatial(self.in_channels, self.in_channels, false);
                let pointwise = Conv2dConfig::new([self.in_channels, self.out_channels], [1, 1])
                    .with_padding(PaddingConfig2d::Valid)
                    .with_bias(self.bias)
                    .init(device);
                (Some(depthwise), pointwise)
            }
        };

        Ok(ConvNormAct {
            depthwise,
            conv,
            norm: self
                .norm
                .as_ref()
                .map(|norm| norm.init(self.out_channels, device)),
            activation: self.activation.map(Activation::new),
            padding: Ignored(self.padding),
            kernel_size: self.kernel_size,
            stride: self.stride,
            dilation: self.dilation,
            out_channels: self.out_channels,
        })
    }
}

/// Convolution, optional batch norm, optional activation.
#[derive(Module, Debug)]
pub struct ConvNormAct<B: Backend> {
    depthwise: Option<Conv2d<B>>,
    conv: Conv2d<B>,
    norm: Option<BatchNorm<B, 2>>,
    activation: Option<Activation>,
    padding: Ignored<Padding>,
    kernel_size: usize,
    stride: usize,
    dilation: usize,
    out_channels: usize,
}

impl<B: Backend> ConvNormAct<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let kernel = [self.kernel_size, self.kernel_size];
        let dilation = [self.dilation, self.dilation];
        let x = match self.padding.0 {
            Padding::Same => pad_same(x, kernel, [self.stride, self.stride], dilation),
            Padding::Fixed => pad_fixed(x, kernel, dilation),
        };
        let x = match &self.depthwise {
            Some(depthwise) => depthwise.forward(x),
            None => x,
        };
        let x = self.conv.forward(x);
        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };

        match &self.activation {
            Some(activation) => activation.forward(x),
            None => x,
        }
    }

    pub const fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// The L2 penalty of every kernel in this block.
    pub fn kernel_penalty(&self, regularizer: &L2Regularizer) -> Tensor<B, 1> {
        let penalty = regularizer.penalty(self.conv.weight.val());
        match &self.depthwise {
            Some(depthwise) => penalty + regularizer.penalty(depthwise.weight.val()),
            None => penalty,
        }
    }
}
