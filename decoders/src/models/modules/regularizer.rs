use burn::prelude::*;

/// L2 weight penalty on convolution kernels: `l2 * sum(w^2)`.
#[derive(Config, Debug)]
pub struct L2Regularizer {
    /// Penalty weight.
    pub l2: f64,
}

impl L2Regularizer {
    /// The penalty of one kernel.
    pub fn penalty<B: Backend, const D: usize>(&self, weight: Tensor<B, D>) -> Tensor<B, 1> {
        weight.powf_scalar(2.0).sum().mul_scalar(self.l2)
    }
}

/// Sums per-layer penalties, `None` for an empty iterator.
pub fn sum_penalties<B: Backend>(
    penalties: impl IntoIterator<Item = Tensor<B, 1>>,
) -> Option<Tensor<B, 1>> {
    penalties.into_iter().reduce(|acc, p| acc + p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn penalty_scales_squared_norm() {
        let device = Default::default();
        let weight = Tensor::<TestBackend, 4>::ones([2, 3, 1, 1], &device).mul_scalar(2.0);
        let penalty: f32 = L2Regularizer::new(0.5).penalty(weight).into_scalar();
        // 6 weights of value 2 -> 24, times 0.5
        assert_eq!(penalty, 12.0);
    }
}
