//! # DropPath Regularization
//!
//! Stochastic depth: during training, the residual branch of a whole sample is zeroed
//! with probability `drop_prob` and the surviving samples are rescaled by the keep
//! probability. Outside of training the module is the identity.

use burn::{prelude::*, tensor::Distribution};

/// Configuration for the `DropPath` module.
#[derive(Config, Debug)]
pub struct DropPathConfig {
    /// The probability of dropping a path.
    #[config(default = "0.0")]
    pub drop_prob: f64,
    /// Whether to scale the output by the keep probability.
    #[config(default = "true")]
    pub scale_by_keep: bool,
}

impl DropPathConfig {
    /// Initializes a new `DropPath` module.
    pub const fn init(&self) -> DropPath {
        DropPath {
            drop_prob: self.drop_prob,
            scale_by_keep: self.scale_by_keep,
        }
    }
}

/// DropPath module.
///
/// Like Burn's `Dropout`, the module is only active when the backend records gradients,
/// so the same model is deterministic when evaluated on an inference backend.
#[derive(Module, Clone, Debug)]
pub struct DropPath {
    drop_prob: f64,
    scale_by_keep: bool,
}

impl DropPath {
    /// The configured drop probability.
    pub const fn drop_prob(&self) -> f64 {
        self.drop_prob
    }

    /// Applies DropPath to the input tensor.
    ///
    /// The mask is drawn per batch element and broadcast over every other dimension.
    ///
    /// # Shapes
    /// - input: `[batch_size, ...]`
    /// - output: `[batch_size, ...]`
    pub fn forward<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        if !B::ad_enabled() || self.drop_prob == 0.0 {
            return x;
        }
        let keep_prob = 1.0 - self.drop_prob;
        let batch_size = x.dims()[0];

        let mut mask_shape = [1; D];
        mask_shape[0] = batch_size;

        let random_tensor =
            Tensor::random(mask_shape, Distribution::Bernoulli(keep_prob), &x.device());

        if self.scale_by_keep {
            x * random_tensor / keep_prob
        } else {
            x * random_tensor
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{TestAutodiffBackend, TestBackend};

    #[test]
    fn droppath_is_identity_without_autodiff() {
        let device = Default::default();
        let drop_path = DropPathConfig::new().with_drop_prob(0.9).init();

        let x = Tensor::<TestBackend, 3>::ones([4, 3, 5], &device);
        let output = drop_path.forward(x.clone());

        let diff = (output - x).abs().sum().into_scalar();
        assert_eq!(diff, 0.0);
    }

    #[test]
    fn droppath_zero_prob_is_identity_in_training() {
        let device = Default::default();
        let drop_path = DropPathConfig::new().init();

        let x = Tensor::<TestAutodiffBackend, 2>::ones([2, 4], &device);
        let output = drop_path.forward(x.clone());

        let diff = (output - x).abs().sum().into_scalar();
        assert_eq!(diff, 0.0);
    }

    #[test]
    fn droppath_drops_or_rescales_whole_samples() {
        let device = Default::default();
        let drop_path = DropPathConfig::new().with_drop_prob(0.5).init();

        let x = Tensor::<TestAutodiffBackend, 3>::ones([16, 8, 4], &device);
        let output = drop_path.forward(x);

        for i in 0..16 {
            let sum = output
                .clone()
                .slice([i..i + 1, 0..8, 0..4])
                .sum()
                .into_scalar();
            // keep_prob = 0.5, so kept samples are scaled to 2.0 per element
            assert!(
                sum.abs() < 1e-6 || (sum - 64.0).abs() < 1e-4,
                "sample {i} was neither dropped nor rescaled: {sum}"
            );
        }
    }

    #[test]
    fn droppath_without_rescale_keeps_unit_values() {
        let device = Default::default();
        let drop_path = DropPathConfig::new()
            .with_drop_prob(0.5)
            .with_scale_by_keep(false)
            .init();

        let x = Tensor::<TestAutodiffBackend, 2>::ones([32, 3], &device);
        let values = drop_path
            .forward(x)
            .into_data()
            .to_vec::<f32>()
            .expect("f32 data");

        assert!(values.iter().all(|v| *v == 0.0 || *v == 1.0));
    }
}
