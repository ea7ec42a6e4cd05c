use burn::{
    module::Ignored,
    nn::{LayerNorm, LayerNormConfig},
    prelude::*,
};
use burn_extra_ops::{DropPath, DropPathConfig};

use super::{
    attention::{WindowAttention, WindowAttentionConfig},
    mlp::{Mlp, MlpConfig},
    window::{cyclic_shift, window_partition, window_reverse, ShiftMaskCache, ShiftMaskKey},
};
use crate::{
    error::{SwinError, SwinResult},
    init::{InitWeights, WeightInitializer},
};

/// Configuration for a single Swin Transformer block.
///
/// # Arguments
/// - `dim`: Number of input channels
/// - `num_heads`: Number of attention heads
/// - `window_size`: Window size
/// - `shift_size`: Shift size for SW-MSA, `0` for W-MSA
/// - `mlp_ratio`: Ratio of MLP hidden dim to embedding dim
/// - `qkv_bias`: If true, add a learnable bias to query, key, value
/// - `qk_scale`: Override default qk scale of `head_dim ** -0.5` if set
/// - `drop`: Dropout rate
/// - `attn_drop`: Attention dropout rate
/// - `drop_path`: Stochastic depth rate
/// - `use_checkpoint`: Rebuild the shift mask on every call instead of caching it.
///   Activation recompute during backward comes from the autodiff backend's
///   checkpointing strategy, not from this flag.
#[derive(Config, Debug)]
pub struct SwinTransformerBlockConfig {
    dim: usize,
    num_heads: usize,
    #[config(default = "7")]
    window_size: usize,
    #[config(default = "0")]
    shift_size: usize,
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
    #[config(default = "0.0")]
    drop_path: f64,
    #[config(default = "false")]
    use_checkpoint: bool,
}

impl SwinTransformerBlockConfig {
    /// # Errors
    /// `SwinError::Configuration` when `window_size` is zero, `shift_size` is not smaller
    /// than `window_size`, or the attention geometry is invalid.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SwinResult<SwinTransformerBlock<B>> {
        if self.window_size == 0 {
            return Err(SwinError::configuration("window_size must be positive"));
        }
        if self.shift_size >= self.window_size {
            return Err(SwinError::configuration(format!(
                "shift_size {} must be smaller than window_size {}",
                self.shift_size, self.window_size
            )));
        }

        let attn = WindowAttentionConfig::new(self.dim, self.window_size, self.num_heads)
            .with_qkv_bias(self.qkv_bias)
            .with_qk_scale(self.qk_scale)
            .with_attn_drop(self.attn_drop)
            .with_proj_drop(self.drop)
            .init(device)?;

        let mlp_hidden_dim = (self.dim as f64 * self.mlp_ratio) as usize;

        Ok(SwinTransformerBlock {
            window_size: self.window_size,
            shift_size: self.shift_size,
            norm1: LayerNormConfig::new(self.dim).init(device),
            attn,
            drop_path: DropPathConfig::new().with_drop_prob(self.drop_path).init(),
            norm2: LayerNormConfig::new(self.dim).init(device),
            mlp: MlpConfig::new(self.dim)
                .with_hidden_features(Some(mlp_hidden_dim))
                .with_drop(self.drop)
                .init(device),
            use_checkpoint: self.use_checkpoint,
            mask_cache: Ignored(ShiftMaskCache::default()),
        })
    }
}

/// Swin Transformer block: (shifted) window attention and an MLP, each behind a
/// pre-norm residual with stochastic depth.
#[derive(Module, Debug)]
pub struct SwinTransformerBlock<B: Backend> {
    window_size: usize,
    shift_size: usize,
    norm1: LayerNorm<B>,
    attn: WindowAttention<B>,
    drop_path: DropPath,
    norm2: LayerNorm<B>,
    mlp: Mlp<B>,
    use_checkpoint: bool,
    mask_cache: Ignored<ShiftMaskCache>,
}

impl<B: Backend> SwinTransformerBlock<B> {
    pub const fn shift_size(&self) -> usize {
        self.shift_size
    }

    pub const fn drop_path_prob(&self) -> f64 {
        self.drop_path.drop_prob()
    }

    /// The cached shift mask, if one was built.
    pub fn cached_mask_key(&self) -> Option<ShiftMaskKey> {
        self.mask_cache.cached_key()
    }

    fn shift_mask(&self, key: ShiftMaskKey, device: &Device<B>) -> Tensor<B, 3> {
        let data = if self.use_checkpoint {
            key.build()
        } else {
            self.mask_cache.get_or_build(key)
        };
        Tensor::from_data(data, device)
    }

    /// # Shapes
    /// - input: `[batch_size, height * width, channels]`
    /// - output: `[batch_size, height * width, channels]`
    ///
    /// # Errors
    /// `SwinError::Shape` when the sequence length is not `height * width` or the grid is
    /// not divisible by the window size.
    pub fn forward(&self, x: Tensor<B, 3>, height: usize, width: usize) -> SwinResult<Tensor<B, 3>> {
        let [b, l, c] = x.dims();
        if l != height * width {
            return Err(SwinError::shape(
                format!("sequence length {height}x{width} = {}", height * width),
                l.to_string(),
            ));
        }
        if height % self.window_size != 0 || width % self.window_size != 0 {
            return Err(SwinError::shape(
                format!("resolution divisible by window size {}", self.window_size),
                format!("{height}x{width}"),
            ));
        }

        let device = x.device();
        let shift = self.shift_size;

        let shortcut = x.clone();
        let x = self.norm1.forward(x).reshape([b, height, width, c]);

        // cyclic shift
        let x = if shift > 0 {
            cyclic_shift(x, -(shift as i64))
        } else {
            x
        };

        let x_windows = window_partition(x, self.window_size)?;

        let mask = (shift > 0).then(|| {
            let key = ShiftMaskKey {
                height,
                width,
                window_size: self.window_size,
                shift_size: shift,
            };
            self.shift_mask(key, &device)
        });
        let attn_windows = self.attn.forward(x_windows, mask)?;

        let x = window_reverse(attn_windows, self.window_size, height, width)?;

        // reverse cyclic shift
        let x = if shift > 0 {
            cyclic_shift(x, shift as i64)
        } else {
            x
        };

        let x = shortcut + self.drop_path.forward(x.reshape([b, l, c]));
        let y = self.mlp.forward(self.norm2.forward(x.clone()));

        Ok(x + self.drop_path.forward(y))
    }
}

impl<B: Backend> InitWeights<B> for SwinTransformerBlock<B> {
    fn init_weights<I: WeightInitializer<B>>(mut self, init: &mut I) -> Self {
        self.norm1 = init.init_layer_norm(self.norm1);
        self.attn = self.attn.init_weights(init);
        self.norm2 = init.init_layer_norm(self.norm2);
        self.mlp = self.mlp.init_weights(init);
        self
    }
}
