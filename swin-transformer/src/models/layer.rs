use burn::prelude::*;

use super::{
    block::{SwinTransformerBlock, SwinTransformerBlockConfig},
    patch_merging::{PatchMerging, PatchMergingConfig},
};
use crate::{
    error::{SwinError, SwinResult},
    init::{InitWeights, WeightInitializer},
};

/// Configuration for a Basic Layer (stage) in Swin Transformer.
///
/// Even-indexed blocks use regular window attention (W-MSA), odd-indexed blocks use
/// shifted window attention (SW-MSA) with `shift_size = window_size / 2`.
///
/// # Arguments
/// - `dim`: Number of input channels for this stage
/// - `depth`: Number of Swin Transformer blocks in this stage
/// - `num_heads`: Number of attention heads
/// - `window_size`: Window size for attention computation (default: 7)
/// - `mlp_ratio`: Ratio of MLP hidden dimension to embedding dimension (default: 4.0)
/// - `qkv_bias`: Whether to add bias to QKV projections (default: true)
/// - `qk_scale`: Override default QK scale if provided
/// - `drop`: Dropout rate (default: 0.0)
/// - `attn_drop`: Attention dropout rate (default: 0.0)
/// - `drop_path`: Stochastic depth rate of each block, one entry per block
/// - `downsample`: Whether to add patch merging at the end (default: false)
/// - `use_checkpoint`: Checkpoint mode of every block (default: false)
#[derive(Config, Debug)]
pub struct BasicLayerConfig {
    dim: usize,
    depth: usize,
    num_heads: usize,
    #[config(default = "7")]
    window_size: usize,
    #[config(default = "4.0")]
    mlp_ratio: f64,
    #[config(default = "true")]
    qkv_bias: bool,
    #[config(default = "None")]
    qk_scale: Option<f64>,
    #[config(default = "0.0")]
    drop: f64,
    #[config(default = "0.0")]
    attn_drop: f64,
    #[config(default = "Vec::new()")]
    drop_path: Vec<f64>,
    #[config(default = "false")]
    downsample: bool,
    #[config(default = "false")]
    use_checkpoint: bool,
}

impl BasicLayerConfig {
    /// # Errors
    /// `SwinError::Configuration` when `drop_path` does not hold exactly `depth` rates or
    /// a block configuration is invalid.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SwinResult<BasicLayer<B>> {
        if self.drop_path.len() != self.depth {
            return Err(SwinError::configuration(format!(
                "stage of depth {} got {} stochastic depth rates",
                self.depth,
                self.drop_path.len()
            )));
        }

        let blocks = self
            .drop_path
            .iter()
            .enumerate()
            .map(|(i, &drop_path)| {
                SwinTransformerBlockConfig::new(self.dim, self.num_heads)
                    .with_window_size(self.window_size)
                    .with_shift_size(if i % 2 == 0 { 0 } else { self.window_size / 2 })
                    .with_mlp_ratio(self.mlp_ratio)
                    .with_qkv_bias(self.qkv_bias)
                    .with_qk_scale(self.qk_scale)
                    .with_drop(self.drop)
                    .with_attn_drop(self.attn_drop)
                    .with_drop_path(drop_path)
                    .with_use_checkpoint(self.use_checkpoint)
                    .init(device)
            })
            .collect::<SwinResult<Vec<_>>>()?;
        let downsample = self
            .downsample
            .then(|| PatchMergingConfig::new(self.dim).init(device));

        Ok(BasicLayer {
            dim: self.dim,
            blocks,
            downsample,
        })
    }
}

/// A feature map leaving a stage, with its spatial resolution.
#[derive(Debug, Clone)]
pub struct StageOutput<B: Backend> {
    /// `[batch_size, height * width, channels]`
    pub tokens: Tensor<B, 3>,
    pub height: usize,
    pub width: usize,
}

impl<B: Backend> StageOutput<B> {
    /// Channel-first view `[batch_size, channels, height, width]`.
    pub fn into_feature_map(self) -> Tensor<B, 4> {
        let [b, _, c] = self.tokens.dims();
        self.tokens
            .swap_dims(1, 2)
            .reshape([b, c, self.height, self.width])
    }
}

/// Basic Layer representing one stage of the Swin Transformer hierarchy.
///
/// Blocks run first at the stage resolution; the optional patch merging then hands a
/// halved resolution to the next stage.
#[derive(Module, Debug)]
pub struct BasicLayer<B: Backend> {
    dim: usize,
    blocks: Vec<SwinTransformerBlock<B>>,
    downsample: Option<PatchMerging<B>>,
}

impl<B: Backend> BasicLayer<B> {
    pub const fn dim(&self) -> usize {
        self.dim
    }

    pub fn blocks(&self) -> &[SwinTransformerBlock<B>] {
        &self.blocks
    }

    pub const fn has_downsample(&self) -> bool {
        self.downsample.is_some()
    }

    /// # Arguments
    /// - `x`: Input tensor of shape `[batch_size, height * width, channels]`
    /// - `height`, `width`: Stage resolution
    ///
    /// # Returns
    /// The stage output and its resolution, after the optional downsample.
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        height: usize,
        width: usize,
    ) -> SwinResult<(Tensor<B, 3>, usize, usize)> {
        let (_, next) = self.forward_with_features(x, height, width)?;
        Ok((next.tokens, next.height, next.width))
    }

    /// Like [`forward`](Self::forward), but also returns the blocks' output before the
    /// downsample.
    ///
    /// # Returns
    /// `(features, next)`: the pre-downsample stage features and the input of the next
    /// stage. Without a downsample both carry the same tensor.
    pub fn forward_with_features(
        &self,
        x: Tensor<B, 3>,
        height: usize,
        width: usize,
    ) -> SwinResult<(StageOutput<B>, StageOutput<B>)> {
        let mut x = x;
        for blk in &self.blocks {
            x = blk.forward(x, height, width)?;
        }

        let next = match &self.downsample {
            Some(downsample) => {
                let (tokens, height, width) = downsample.forward(x.clone(), height, width)?;
                StageOutput {
                    tokens,
                    height,
                    width,
                }
            }
            None => StageOutput {
                tokens: x.clone(),
                height,
                width,
            },
        };
        let features = StageOutput {
            tokens: x,
            height,
            width,
        };

        Ok((features, next))
    }
}

impl<B: Backend> InitWeights<B> for BasicLayer<B> {
    fn init_weights<I: WeightInitializer<B>>(mut self, init: &mut I) -> Self {
        self.blocks = self.blocks.init_weights(init);
        self.downsample = self.downsample.init_weights(init);
        self
    }
}
