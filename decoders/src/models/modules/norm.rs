use burn::{
    nn::{BatchNorm, BatchNormConfig},
    prelude::*,
};

/// Batch normalization settings expressed the way training configs state them.
///
/// `momentum` is the decay of the moving statistics
/// (`running = momentum * running + (1 - momentum) * batch`); Burn's
/// `BatchNormConfig::momentum` weights the batch statistic instead.
#[derive(Config, Debug)]
pub struct NormSettings {
    /// Request cross-replica statistics. Burn keeps per-device statistics,
    /// so this only changes logging.
    #[config(default = "false")]
    pub use_sync_bn: bool,
    #[config(default = "0.99")]
    pub momentum: f64,
    #[config(default = "0.001")]
    pub epsilon: f64,
}

impl NormSettings {
    /// The equivalent `BatchNormConfig::momentum`.
    pub fn burn_momentum(&self) -> f64 {
        1.0 - self.momentum
    }

    /// Initializes a 2D batch normalization over `channels`.
    pub fn init<B: Backend>(&self, channels: usize, device: &Device<B>) -> BatchNorm<B, 2> {
        BatchNormConfig::new(channels)
            .with_momentum(self.burn_momentum())
            .with_epsilon(self.epsilon)
            .init(device)
    }
}
