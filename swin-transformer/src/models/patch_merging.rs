use burn::{
    nn::{LayerNorm, LayerNormConfig, Linear, LinearConfig},
    prelude::*,
};

use crate::{
    error::{SwinError, SwinResult},
    init::{InitWeights, WeightInitializer},
};

/// Configuration for the Patch Merging layer.
///
/// # Arguments
/// - `dim`: Input channel dimension (output will be 2*dim channels)
#[derive(Config, Debug)]
pub struct PatchMergingConfig {
    dim: usize,
}

impl PatchMergingConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> PatchMerging<B> {
        PatchMerging {
            norm: LayerNormConfig::new(4 * self.dim).init(device),
            reduction: LinearConfig::new(4 * self.dim, 2 * self.dim)
                .with_bias(false)
                .init(device),
        }
    }
}

/// Patch Merging layer, the downsampling step between stages.
///
/// # Processing Steps
/// 1. Gather every 2x2 neighbourhood into one position (C -> 4C)
/// 2. Apply layer normalization
/// 3. Apply linear reduction (4C -> 2C) without bias
#[derive(Module, Debug)]
pub struct PatchMerging<B: Backend> {
    norm: LayerNorm<B>,
    reduction: Linear<B>,
}

impl<B: Backend> PatchMerging<B> {
    /// # Arguments
    /// - `x`: Input tensor of shape `[batch_size, height * width, channels]`
    /// - `height`, `width`: Spatial size of the feature map, both even
    ///
    /// # Returns
    /// `[batch_size, (height/2) * (width/2), 2*channels]` together with the halved
    /// resolution.
    ///
    /// # Errors
    /// `SwinError::Shape` when the sequence is not `height * width` long or either side
    /// is odd.
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        height: usize,
        width: usize,
    ) -> SwinResult<(Tensor<B, 3>, usize, usize)> {
        let x = merge_neighborhoods(x, height, width)?;
        let x = self.reduction.forward(self.norm.forward(x));
        Ok((x, height / 2, width / 2))
    }
}

/// Concatenates the channels of each 2x2 neighbourhood.
///
/// For a neighbourhood with top-left corner `(2i, 2j)` the output channels are, in
/// order, the tokens at `(2i, 2j)`, `(2i + 1, 2j)`, `(2i, 2j + 1)` and
/// `(2i + 1, 2j + 1)`.
pub fn merge_neighborhoods<B: Backend>(
    x: Tensor<B, 3>,
    height: usize,
    width: usize,
) -> SwinResult<Tensor<B, 3>> {
    let [b, l, c] = x.dims();
    if l != height * width {
        return Err(SwinError::shape(
            format!("sequence length {height}x{width} = {}", height * width),
            l.to_string(),
        ));
    }
    if height % 2 == 1 || width % 2 == 1 {
        return Err(SwinError::shape(
            "even spatial dims for patch merging",
            format!("{height}x{width}"),
        ));
    }

    let (h2, w2) = (height / 2, width / 2);
    // [b, h2, row offset, w2, col offset, c] -> [b, h2, w2, col offset, row offset, c]
    Ok(x.reshape([b, h2, 2, w2, 2, c])
        .permute([0, 1, 3, 4, 2, 5])
        .reshape([b, h2 * w2, 4 * c]))
}

impl<B: Backend> InitWeights<B> for PatchMerging<B> {
    fn init_weights<I: WeightInitializer<B>>(mut self, init: &mut I) -> Self {
        self.norm = init.init_layer_norm(self.norm);
        self.reduction = init.init_linear(self.reduction);
        self
    }
}
