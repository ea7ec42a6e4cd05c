//! Post-construction weight initialization.
//!
//! Initialization is an explicit walk over the owned component tree: each component
//! hands every `Linear` and `LayerNorm` it owns to a [`WeightInitializer`] exactly once.
//! The patch projection convolution and the relative position bias tables are not
//! visited; the tables are initialized when their attention module is built.

use burn::{
    nn::{LayerNorm, Linear},
    prelude::*,
};
use burn_extra_ops::trunc_normal;

/// Initialization policy, applied per structural category.
pub trait WeightInitializer<B: Backend> {
    fn init_linear(&mut self, linear: Linear<B>) -> Linear<B>;

    fn init_layer_norm(&mut self, norm: LayerNorm<B>) -> LayerNorm<B>;
}

/// Components that can route their parameters through a [`WeightInitializer`].
pub trait InitWeights<B: Backend>: Sized {
    #[must_use]
    fn init_weights<I: WeightInitializer<B>>(self, init: &mut I) -> Self;
}

impl<B: Backend, T: InitWeights<B>> InitWeights<B> for Option<T> {
    fn init_weights<I: WeightInitializer<B>>(self, init: &mut I) -> Self {
        self.map(|inner| inner.init_weights(init))
    }
}

impl<B: Backend, T: InitWeights<B>> InitWeights<B> for Vec<T> {
    fn init_weights<I: WeightInitializer<B>>(self, init: &mut I) -> Self {
        self.into_iter().map(|inner| inner.init_weights(init)).collect()
    }
}

/// The standard vision-transformer policy.
///
/// Linear weights are drawn from `N(0, std²)` truncated to `[-2, 2]`, linear biases are
/// zeroed, and layer norms get unit scale and zero shift.
#[derive(Debug, Clone, Copy)]
pub struct TruncNormalInit {
    pub std: f64,
}

impl Default for TruncNormalInit {
    fn default() -> Self {
        Self { std: 0.02 }
    }
}

impl<B: Backend> WeightInitializer<B> for TruncNormalInit {
    fn init_linear(&mut self, mut linear: Linear<B>) -> Linear<B> {
        let std = self.std;
        linear.weight = linear
            .weight
            .map(|weight| trunc_normal(weight, 0.0, std, -2.0, 2.0));
        linear.bias = linear.bias.map(|bias| bias.map(|b| b.zeros_like()));
        linear
    }

    fn init_layer_norm(&mut self, mut norm: LayerNorm<B>) -> LayerNorm<B> {
        norm.gamma = norm.gamma.map(|gamma| gamma.ones_like());
        norm.beta = norm.beta.map(|beta| beta.zeros_like());
        norm
    }
}
