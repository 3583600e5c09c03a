use burn::{
    module::Ignored,
    prelude::*,
    tensor::activation::{gelu, relu, sigmoid, silu},
};

use crate::config::ActivationKind;

/// An activation selected by name at construction time.
#[derive(Module, Debug, Clone)]
pub struct Activation {
    kind: Ignored<ActivationKind>,
}

impl Activation {
    pub const fn new(kind: ActivationKind) -> Self {
        Self {
            kind: Ignored(kind),
        }
    }

    pub fn forward<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self.kind.0 {
            ActivationKind::Relu => relu(x),
            ActivationKind::Relu6 => relu6(x),
            ActivationKind::Swish => silu(x),
            ActivationKind::HardSwish => x.clone() * relu6(x.add_scalar(3.0)).div_scalar(6.0),
            ActivationKind::Sigmoid => sigmoid(x),
            ActivationKind::Gelu => gelu(x),
            ActivationKind::Linear => x,
        }
    }
}

fn relu6<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    x.clamp(0.0, 6.0)
}
