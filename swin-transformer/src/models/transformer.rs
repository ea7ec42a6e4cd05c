use burn::{
    nn::{Dropout, DropoutConfig, LayerNorm, LayerNormConfig, Linear, LinearConfig},
    prelude::*,
};

use super::{
    layer::{BasicLayer, BasicLayerConfig},
    patch_embed::{PatchEmbed, PatchEmbedConfig},
};
use crate::{
    config::SwinTransformerConfig,
    error::SwinResult,
    init::{InitWeights, TruncNormalInit, WeightInitializer},
};

impl SwinTransformerConfig {
    /// Builds the model and runs the default [`TruncNormalInit`] pass over it.
    ///
    /// # Errors
    /// `SwinError::Configuration` when [`validate`](Self::validate) fails.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SwinResult<SwinTransformer<B>> {
        self.init_with(device, &mut TruncNormalInit::default())
    }

    /// Builds the model and hands every linear and layer norm to `initializer` once.
    ///
    /// # Errors
    /// `SwinError::Configuration` when [`validate`](Self::validate) fails.
    pub fn init_with<B: Backend, I: WeightInitializer<B>>(
        &self,
        device: &Device<B>,
        initializer: &mut I,
    ) -> SwinResult<SwinTransformer<B>> {
        self.validate()?;
        let num_layers = self.num_stages();

        let patch_embed = PatchEmbedConfig::new()
            .with_patch_size(self.patch_size)
            .with_in_channels(self.in_channels)
            .with_embed_dim(self.embed_dim)
            .with_norm_layer(self.patch_norm)
            .init(device)?;

        let dpr = self.drop_path_schedule();
        let stage_dims = self.stage_dims();

        let mut layers = Vec::with_capacity(num_layers);
        let mut start = 0;
        for (i_layer, (&dim, (&depth, &num_heads))) in stage_dims
            .iter()
            .zip(self.depths.iter().zip(&self.num_heads))
            .enumerate()
        {
            let layer = BasicLayerConfig::new(dim, depth, num_heads)
                .with_window_size(self.window_size)
                .with_mlp_ratio(self.mlp_ratio)
                .with_qkv_bias(self.qkv_bias)
                .with_qk_scale(self.qk_scale)
                .with_drop(self.drop_rate)
                .with_attn_drop(self.attn_drop_rate)
                .with_drop_path(dpr[start..start + depth].to_vec())
                .with_downsample(i_layer < num_layers - 1)
                .with_use_checkpoint(self.use_checkpoint)
                .init(device)?;
            layers.push(layer);
            start += depth;
        }

        let num_features = self.num_features();
        let head = usize::try_from(self.num_classes)
            .ok()
            .filter(|&classes| classes > 0)
            .map(|classes| LinearConfig::new(num_features, classes).init(device));

        tracing::debug!(
            embed_dim = self.embed_dim,
            depths = ?self.depths,
            num_heads = ?self.num_heads,
            window_size = self.window_size,
            num_features,
            num_classes = self.num_classes,
            use_checkpoint = self.use_checkpoint,
            "built swin transformer"
        );

        let model = SwinTransformer {
            patch_embed,
            pos_drop: DropoutConfig::new(self.drop_rate).init(),
            layers,
            norm: LayerNormConfig::new(num_features).init(device),
            head,
            num_features,
        };
        Ok(model.init_weights(initializer))
    }
}

/// Swin Transformer image classifier.
///
/// ```text
/// image -> PatchEmbed -> Dropout -> stage 1 .. stage N -> LayerNorm -> mean -> head
/// ```
///
/// Every stage but the last ends with a patch merging, so stage `i` runs at
/// `1 / (patch_size * 2^i)` of the input resolution with `embed_dim * 2^i` channels.
#[derive(Module, Debug)]
pub struct SwinTransformer<B: Backend> {
    patch_embed: PatchEmbed<B>,
    pos_drop: Dropout,
    layers: Vec<BasicLayer<B>>,
    norm: LayerNorm<B>,
    head: Option<Linear<B>>,
    num_features: usize,
}

impl<B: Backend> SwinTransformer<B> {
    /// Width of the pooled feature vector.
    pub const fn num_features(&self) -> usize {
        self.num_features
    }

    /// Number of logits, `0` in feature mode.
    pub fn num_classes(&self) -> usize {
        self.head
            .as_ref()
            .map_or(0, |head| head.weight.val().dims()[1])
    }

    /// Channel width of every stage.
    pub fn embed_dims(&self) -> Vec<usize> {
        self.layers.iter().map(BasicLayer::dim).collect()
    }

    pub fn layers(&self) -> &[BasicLayer<B>] {
        &self.layers
    }

    fn embed(&self, x: Tensor<B, 4>) -> SwinResult<(Tensor<B, 3>, usize, usize)> {
        let (x, h, w) = self.patch_embed.forward(x)?;
        Ok((self.pos_drop.forward(x), h, w))
    }

    /// Pooled, normalized features.
    ///
    /// # Shapes
    /// - input: `[batch_size, in_channels, height, width]`
    /// - output: `[batch_size, num_features]`
    ///
    /// # Errors
    /// `SwinError::Shape` when the image does not divide into patches and windows at
    /// every stage.
    pub fn forward_features(&self, x: Tensor<B, 4>) -> SwinResult<Tensor<B, 2>> {
        let (mut x, mut h, mut w) = self.embed(x)?;
        for layer in &self.layers {
            (x, h, w) = layer.forward(x, h, w)?;
        }

        let x = self.norm.forward(x);
        let [b, _, c] = x.dims();
        Ok(x.mean_dim(1).reshape([b, c]))
    }

    /// Class logits `[batch_size, num_classes]`, or the pooled features
    /// `[batch_size, num_features]` when the model has no head.
    ///
    /// # Errors
    /// See [`forward_features`](Self::forward_features).
    pub fn forward(&self, x: Tensor<B, 4>) -> SwinResult<Tensor<B, 2>> {
        let x = self.forward_features(x)?;
        Ok(match &self.head {
            Some(head) => head.forward(x),
            None => x,
        })
    }

    /// The output of every stage before its downsample, as
    /// `[batch_size, channels, height, width]` feature maps.
    ///
    /// # Errors
    /// See [`forward_features`](Self::forward_features).
    pub fn forward_stages(&self, x: Tensor<B, 4>) -> SwinResult<Vec<Tensor<B, 4>>> {
        let (mut x, mut h, mut w) = self.embed(x)?;
        let mut outs = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let (features, next) = layer.forward_with_features(x, h, w)?;
            outs.push(features.into_feature_map());
            (x, h, w) = (next.tokens, next.height, next.width);
        }
        Ok(outs)
    }
}

impl<B: Backend> InitWeights<B> for SwinTransformer<B> {
    fn init_weights<I: WeightInitializer<B>>(mut self, init: &mut I) -> Self {
        self.patch_embed = self.patch_embed.init_weights(init);
        self.layers = self.layers.init_weights(init);
        self.norm = init.init_layer_norm(self.norm);
        self.head = self.head.map(|head| init.init_linear(head));
        self
    }
}

/// Creates a Swin-T classifier.
///
/// # Errors
/// Never fails for the preset itself; the `Result` mirrors [`SwinTransformerConfig::init`].
pub fn swin_t<B: Backend>(device: &Device<B>) -> SwinResult<SwinTransformer<B>> {
    SwinTransformerConfig::swin_t().init(device)
}

/// Creates a Swin-S classifier.
///
/// # Errors
/// See [`swin_t`].
pub fn swin_s<B: Backend>(device: &Device<B>) -> SwinResult<SwinTransformer<B>> {
    SwinTransformerConfig::swin_s().init(device)
}

/// Creates a Swin-B classifier.
///
/// # Errors
/// See [`swin_t`].
pub fn swin_b<B: Backend>(device: &Device<B>) -> SwinResult<SwinTransformer<B>> {
    SwinTransformerConfig::swin_b().init(device)
}

/// Creates a Swin-L classifier.
///
/// # Errors
/// See [`swin_t`].
pub fn swin_l<B: Backend>(device: &Device<B>) -> SwinResult<SwinTransformer<B>> {
    SwinTransformerConfig::swin_l().init(device)
}
