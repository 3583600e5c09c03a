//! # NAS-FPN
//!
//! A feature pyramid whose merging topology was found by architecture search.
//! The decoder first brings every pyramid level to `num_filters` channels, then
//! stacks `num_repeats` copies of the searched cell. Each cell adds seven nodes
//! to the pyramid; its last five nodes form the cell's output.

use burn::{
    module::Ignored,
    nn::pool::{MaxPool2d, MaxPool2dConfig},
    prelude::*,
    tensor::activation::sigmoid,
};
use burn_extra_ops::{pad_same_pool, resize_nearest, upsample_nearest};

use super::modules::{
    sum_penalties, Activation, ConvKind, ConvNormAct, ConvNormActConfig, L2Regularizer,
    NormSettings,
};
use crate::config::ActivationKind;
use crate::error::{DecoderError, DecoderResult};
use crate::specs::{level_key, take_level, FeatureMaps, FeatureSpec, InputSpecs};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combine {
    Sum,
    Attention,
}

/// One node of the searched cell: the level it lives on, how its two inputs
/// are merged, which earlier nodes feed it, and whether it is a cell output.
#[derive(Debug, Clone, Copy)]
struct BlockSpec {
    level: usize,
    combine: Combine,
    inputs: (usize, usize),
    is_output: bool,
}

const fn block(level: usize, combine: Combine, inputs: (usize, usize), is_output: bool) -> BlockSpec {
    BlockSpec {
        level,
        combine,
        inputs,
        is_output,
    }
}

/// Node indices 0..=4 are the cell inputs P3..P7; node `5 + i` is block `i`.
const NASFPN_BLOCK_SPECS: [BlockSpec; 7] = [
    block(4, Combine::Attention, (1, 3), false),
    block(4, Combine::Sum, (1, 5), false),
    block(3, Combine::Sum, (0, 6), true),
    block(4, Combine::Sum, (6, 7), true),
    block(5, Combine::Attention, (7, 8), true),
    block(7, Combine::Attention, (6, 9), true),
    block(6, Combine::Attention, (9, 10), true),
];

const NASFPN_MIN_LEVEL: usize = 3;
const NASFPN_MAX_LEVEL: usize = 7;

/// Configuration for the `NasFpn` decoder.
#[derive(Config, Debug)]
pub struct NasFpnConfig {
    /// Specs of the backbone levels.
    pub input_specs: InputSpecs,
    #[config(default = "3")]
    pub min_level: usize,
    #[config(default = "7")]
    pub max_level: usize,
    #[config(default = "256")]
    pub num_filters: usize,
    #[config(default = "5")]
    pub num_repeats: usize,
    #[config(default = "false")]
    pub use_separable_conv: bool,
    #[config(default = "ActivationKind::Relu")]
    pub activation: ActivationKind,
    #[config(default = "NormSettings::new()")]
    pub norm: NormSettings,
    #[config(default = "None")]
    pub kernel_regularizer: Option<L2Regularizer>,
}

impl NasFpnConfig {
    /// Initializes a new `NasFpn` decoder.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` unless the level range is P3..P7 (the
    /// range the cell was searched on), and `MissingFeatureLevel` if the
    /// backbone does not provide `min_level`.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> DecoderResult<NasFpn<B>> {
        if self.min_level != NASFPN_MIN_LEVEL || self.max_level != NASFPN_MAX_LEVEL {
            return Err(DecoderError::InvalidConfiguration {
                reason: format!(
                    "nasfpn cell is defined on levels [{NASFPN_MIN_LEVEL}, {NASFPN_MAX_LEVEL}], got [{}, {}]",
                    self.min_level, self.max_level
                ),
            });
        }
        if self.num_repeats == 0 {
            return Err(DecoderError::InvalidConfiguration {
                reason: "nasfpn num_repeats must be at least 1".to_string(),
            });
        }

        // Bring every level to `num_filters`, deriving missing levels from the
        // one below.
        let mut input_resamples = Vec::new();
        let mut from_backbone = Vec::new();
        let mut output_specs = InputSpecs::new();
        let mut previous: Option<FeatureSpec> = None;
        for level in self.min_level..=self.max_level {
            let key = level_key(level);
            let (resample, spec) = match (self.input_specs.get(&key), previous) {
                (Some(spec), _) => (
                    self.resample(spec.channels, level, level, device)?,
                    spec.downsampled(0, self.num_filters),
                ),
                (None, Some(below)) => (
                    self.resample(below.channels, level - 1, level, device)?,
                    below.downsampled(1, self.num_filters),
                ),
                (None, None) => {
                    return Err(DecoderError::MissingFeatureLevel { level: key });
                }
            };
            from_backbone.push(self.input_specs.contains_key(&key));
            input_resamples.push(resample);
            output_specs.insert(key, spec);
            previous = Some(spec);
        }

        let cells = (0..self.num_repeats)
            .map(|_| self.cell(device))
            .collect::<DecoderResult<Vec<_>>>()?;

        Ok(NasFpn {
            input_resamples,
            from_backbone: Ignored(from_backbone),
            cells,
            activation: Activation::new(self.activation),
            min_level: self.min_level,
            output_specs: Ignored(output_specs),
            kernel_regularizer: Ignored(self.kernel_regularizer.clone()),
        })
    }

    fn cell<B: Backend>(&self, device: &Device<B>) -> DecoderResult<NasFpnCell<B>> {
        let mut levels: Vec<usize> = (self.min_level..=self.max_level).collect();
        let mut nodes = Vec::with_capacity(NASFPN_BLOCK_SPECS.len());
        for spec in NASFPN_BLOCK_SPECS {
            let (input0, input1) = spec.inputs;
            let kind = if self.use_separable_conv {
                ConvKind::Separable
            } else {
                ConvKind::Standard
            };
            nodes.push(CellNode {
                resample0: self.resample(self.num_filters, levels[input0], spec.level, device)?,
                resample1: self.resample(self.num_filters, levels[input1], spec.level, device)?,
                conv: ConvNormActConfig::new(self.num_filters, self.num_filters)
                    .with_kernel_size(3)
                    .with_kind(kind)
                    .with_bias(true)
                    .with_norm(Some(self.norm.clone()))
                    .init(device)?,
            });
            levels.push(spec.level);
        }
        Ok(NasFpnCell { nodes })
    }

    fn resample<B: Backend>(
        &self,
        in_channels: usize,
        input_level: usize,
        target_level: usize,
        device: &Device<B>,
    ) -> DecoderResult<Resample<B>> {
        let projection = if in_channels == self.num_filters {
            None
        } else {
            Some(
                ConvNormActConfig::new(in_channels, self.num_filters)
                    .with_bias(true)
                    .with_norm(Some(self.norm.clone()))
                    .init(device)?,
            )
        };
        let pool_window = if input_level < target_level {
            1 << (target_level - input_level)
        } else {
            1
        };
        let pool = (pool_window > 1).then(|| {
            MaxPool2dConfig::new([pool_window, pool_window])
                .with_strides([pool_window, pool_window])
                .init()
        });
        let upsample = if input_level > target_level {
            1 << (input_level - target_level)
        } else {
            1
        };
        Ok(Resample {
            projection,
            pool,
            pool_window,
            upsample,
        })
    }
}

/// Moves a feature map to another level: optional 1x1 projection to
/// `num_filters`, then `"SAME"` max-pooling down or nearest upsampling up.
#[derive(Module, Debug)]
struct Resample<B: Backend> {
    projection: Option<ConvNormAct<B>>,
    pool: Option<MaxPool2d>,
    pool_window: usize,
    upsample: usize,
}

impl<B: Backend> Resample<B> {
    /// Resamples `x` onto a `[height, width]` grid.
    ///
    /// Pooling rounds up and upsampling multiplies, so maps whose sizes are
    /// not exact multiples of each other are snapped to `size` afterwards.
    fn forward(&self, x: Tensor<B, 4>, size: [usize; 2]) -> Tensor<B, 4> {
        let x = match &self.projection {
            Some(projection) => projection.forward(x),
            None => x,
        };
        let x = match &self.pool {
            Some(pool) => pool.forward(pad_same_pool(x, self.pool_window)),
            None => x,
        };
        resize_nearest(upsample_nearest(x, self.upsample), size)
    }

    fn projection(&self) -> Option<&ConvNormAct<B>> {
        self.projection.as_ref()
    }
}

#[derive(Module, Debug)]
struct CellNode<B: Backend> {
    resample0: Resample<B>,
    resample1: Resample<B>,
    conv: ConvNormAct<B>,
}

#[derive(Module, Debug)]
struct NasFpnCell<B: Backend> {
    nodes: Vec<CellNode<B>>,
}

impl<B: Backend> NasFpnCell<B> {
    /// `feats[i]` lives on level `min_level + i`; returns the cell outputs in
    /// the same order.
    fn forward(
        &self,
        feats: Vec<Tensor<B, 4>>,
        min_level: usize,
        activation: &Activation,
    ) -> Vec<Tensor<B, 4>> {
        let num_output_levels = feats.len();
        let mut levels: Vec<usize> = (min_level..min_level + feats.len()).collect();
        let mut num_outputs = vec![0usize; feats.len()];
        let mut feats = feats;

        for (spec, node) in NASFPN_BLOCK_SPECS.iter().zip(&self.nodes) {
            let (input0, input1) = spec.inputs;
            let [_, _, height, width] = feats[spec.level - min_level].dims();
            let node0 = node.resample0.forward(feats[input0].clone(), [height, width]);
            let node1 = node.resample1.forward(feats[input1].clone(), [height, width]);
            num_outputs[input0] += 1;
            num_outputs[input1] += 1;

            let mut new_node = match spec.combine {
                Combine::Sum => node0 + node1,
                Combine::Attention if levels[input0] >= levels[input1] => {
                    global_attention(node0, node1)
                }
                Combine::Attention => global_attention(node1, node0),
            };

            // Output nodes absorb same-level features nothing has consumed yet.
            if spec.is_output {
                for j in 0..feats.len() {
                    if num_outputs[j] == 0 && levels[j] == spec.level {
                        num_outputs[j] += 1;
                        new_node = new_node + feats[j].clone();
                    }
                }
            }

            let new_node = node.conv.forward(activation.forward(new_node));
            feats.push(new_node);
            levels.push(spec.level);
            num_outputs.push(0);
        }

        let first_output = feats.len() - num_output_levels;
        let mut outputs: Vec<(usize, Tensor<B, 4>)> = levels
            .into_iter()
            .zip(feats)
            .skip(first_output)
            .collect();
        outputs.sort_by_key(|(level, _)| *level);
        outputs.into_iter().map(|(_, feat)| feat).collect()
    }

    fn convs(&self) -> impl Iterator<Item = &ConvNormAct<B>> {
        self.nodes.iter().flat_map(|node| {
            node.resample0
                .projection()
                .into_iter()
                .chain(node.resample1.projection())
                .chain(std::iter::once(&node.conv))
        })
    }
}

/// Gates `low` by the spatial maximum of `high` and adds it to `high`.
fn global_attention<B: Backend>(high: Tensor<B, 4>, low: Tensor<B, 4>) -> Tensor<B, 4> {
    let gate = sigmoid(high.clone().max_dim(2).max_dim(3));
    high + low * gate
}

/// NAS-FPN decoder.
#[derive(Module, Debug)]
pub struct NasFpn<B: Backend> {
    input_resamples: Vec<Resample<B>>,
    /// Whether each input level is read from the backbone or derived from
    /// the level below.
    from_backbone: Ignored<Vec<bool>>,
    cells: Vec<NasFpnCell<B>>,
    activation: Activation,
    min_level: usize,
    output_specs: Ignored<InputSpecs>,
    kernel_regularizer: Ignored<Option<L2Regularizer>>,
}

impl<B: Backend> NasFpn<B> {
    /// Builds the pyramid from backbone features.
    ///
    /// # Errors
    ///
    /// Returns `MissingFeatureLevel` if a backbone level the decoder was built
    /// for is absent from `features`.
    pub fn forward(&self, mut features: FeatureMaps<B>) -> DecoderResult<FeatureMaps<B>> {
        let mut feats: Vec<Tensor<B, 4>> = Vec::with_capacity(self.input_resamples.len());
        for (offset, (resample, &from_backbone)) in self
            .input_resamples
            .iter()
            .zip(self.from_backbone.0.iter())
            .enumerate()
        {
            let key = level_key(self.min_level + offset);
            let (source, size) = match feats.last() {
                Some(below) if !from_backbone => {
                    let [_, _, height, width] = below.dims();
                    (below.clone(), [height.div_ceil(2), width.div_ceil(2)])
                }
                _ => {
                    let source = take_level(&mut features, &key)?;
                    let [_, _, height, width] = source.dims();
                    (source, [height, width])
                }
            };
            feats.push(resample.forward(source, size));
        }

        for cell in &self.cells {
            feats = cell.forward(feats, self.min_level, &self.activation);
        }

        Ok(feats
            .into_iter()
            .enumerate()
            .map(|(offset, feat)| (level_key(self.min_level + offset), feat))
            .collect())
    }

    /// Specs of the maps returned by [`NasFpn::forward`].
    pub fn output_specs(&self) -> &InputSpecs {
        &self.output_specs.0
    }

    /// L2 penalty over all convolution kernels, if a regularizer was configured.
    pub fn regularization_loss(&self) -> Option<Tensor<B, 1>> {
        let regularizer = self.kernel_regularizer.0.as_ref()?;
        sum_penalties(
            self.input_resamples
                .iter()
                .filter_map(Resample::projection)
                .chain(self.cells.iter().flat_map(NasFpnCell::convs))
                .map(|conv| conv.kernel_penalty(regularizer)),
        )
    }
}
