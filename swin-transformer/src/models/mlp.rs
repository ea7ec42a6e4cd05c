use burn::{
    nn::{Dropout, DropoutConfig, Gelu, Linear, LinearConfig},
    prelude::*,
};

use crate::init::{InitWeights, WeightInitializer};

/// Configuration for the feed-forward sub-block of a Swin block.
///
/// ```text
/// Input -> Linear -> GELU -> Dropout -> Linear -> Dropout -> Output
/// ```
///
/// `hidden_features` and `out_features` default to `in_features`.
#[derive(Config, Debug)]
pub struct MlpConfig {
    in_features: usize,
    #[config(default = "None")]
    hidden_features: Option<usize>,
    #[config(default = "None")]
    out_features: Option<usize>,
    #[config(default = "0.0")]
    drop: f64,
}

impl MlpConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Mlp<B> {
        let hidden_features = self.hidden_features.unwrap_or(self.in_features);
        let out_features = self.out_features.unwrap_or(self.in_features);

        Mlp {
            fc1: LinearConfig::new(self.in_features, hidden_features).init(device),
            act: Gelu::new(),
            fc2: LinearConfig::new(hidden_features, out_features).init(device),
            drop: DropoutConfig::new(self.drop).init(),
        }
    }
}

/// Two-layer perceptron with GELU, applied token-wise.
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    fc1: Linear<B>,
    act: Gelu,
    fc2: Linear<B>,
    drop: Dropout,
}

impl<B: Backend> Mlp<B> {
    /// # Shapes
    /// - input: `[batch_size, tokens, in_features]`
    /// - output: `[batch_size, tokens, out_features]`
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = self.drop.forward(self.act.forward(self.fc1.forward(x)));
        self.drop.forward(self.fc2.forward(x))
    }
}

impl<B: Backend> InitWeights<B> for Mlp<B> {
    fn init_weights<I: WeightInitializer<B>>(mut self, init: &mut I) -> Self {
        self.fc1 = init.init_linear(self.fc1);
        self.fc2 = init.init_linear(self.fc2);
        self
    }
}
