use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        LayerNorm, LayerNormConfig,
    },
    prelude::*,
};

use crate::{
    error::{SwinError, SwinResult},
    init::{InitWeights, WeightInitializer},
};

/// Configuration for the Patch Embedding layer.
///
/// An image of size `(H, W)` is cut into non-overlapping `patch_size x patch_size`
/// patches, each projected to `embed_dim` channels by a strided convolution.
///
/// # Arguments
/// - `patch_size`: Size of each patch (default: 4)
/// - `in_channels`: Number of input image channels (default: 3)
/// - `embed_dim`: Embedding dimension for each patch (default: 96)
/// - `norm_layer`: Whether to apply layer normalization (default: false)
#[derive(Config, Debug)]
pub struct PatchEmbedConfig {
    #[config(default = "4")]
    patch_size: usize,
    #[config(default = "3")]
    in_channels: usize,
    #[config(default = "96")]
    embed_dim: usize,
    #[config(default = "false")]
    norm_layer: bool,
}

impl PatchEmbedConfig {
    /// # Errors
    /// `SwinError::Configuration` when `patch_size`, `in_channels` or `embed_dim` is zero.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SwinResult<PatchEmbed<B>> {
        if self.patch_size == 0 || self.in_channels == 0 || self.embed_dim == 0 {
            return Err(SwinError::configuration(format!(
                "patch embedding needs positive sizes, got patch_size {}, in_channels {}, embed_dim {}",
                self.patch_size, self.in_channels, self.embed_dim
            )));
        }

        let proj = Conv2dConfig::new(
            [self.in_channels, self.embed_dim],
            [self.patch_size, self.patch_size],
        )
        .with_stride([self.patch_size, self.patch_size])
        .init(device);
        let norm = self
            .norm_layer
            .then(|| LayerNormConfig::new(self.embed_dim).init(device));

        Ok(PatchEmbed {
            in_channels: self.in_channels,
            patch_size: self.patch_size,
            proj,
            norm,
        })
    }
}

/// Patch Embedding layer: image to patch token sequence.
#[derive(Module, Debug)]
pub struct PatchEmbed<B: Backend> {
    in_channels: usize,
    patch_size: usize,
    proj: Conv2d<B>,
    norm: Option<LayerNorm<B>>,
}

impl<B: Backend> PatchEmbed<B> {
    /// # Arguments
    /// - `x`: Input tensor of shape `[batch_size, in_channels, height, width]`
    ///
    /// # Returns
    /// The token sequence `[batch_size, (height/patch_size) * (width/patch_size),
    /// embed_dim]` and the patch grid resolution.
    ///
    /// # Errors
    /// `SwinError::Shape` when the channel count differs from `in_channels` or either
    /// side is not a multiple of `patch_size`.
    pub fn forward(&self, x: Tensor<B, 4>) -> SwinResult<(Tensor<B, 3>, usize, usize)> {
        let [_, channels, height, width] = x.dims();
        if channels != self.in_channels {
            return Err(SwinError::shape(
                format!("{} input channels", self.in_channels),
                format!("{channels} channels"),
            ));
        }
        if height % self.patch_size != 0 || width % self.patch_size != 0 {
            return Err(SwinError::shape(
                format!("image size divisible by patch size {}", self.patch_size),
                format!("{height}x{width}"),
            ));
        }

        let x = self.proj.forward(x);
        let [_, _, wh, ww] = x.dims();
        let x: Tensor<B, 3> = x.flatten(2, 3).swap_dims(1, 2);

        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };
        Ok((x, wh, ww))
    }
}

impl<B: Backend> InitWeights<B> for PatchEmbed<B> {
    fn init_weights<I: WeightInitializer<B>>(mut self, init: &mut I) -> Self {
        self.norm = self.norm.map(|norm| init.init_layer_norm(norm));
        self
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::Distribution;
    use rstest::rstest;

    use super::*;
    use crate::tests::TestBackend;

    #[rstest]
    #[case(4, 3, 96, 224, 224, true)]
    #[case(4, 3, 128, 64, 32, false)]
    #[case(2, 1, 16, 8, 10, true)]
    fn patch_embed_converts_image_to_patch_tokens(
        #[case] patch_size: usize,
        #[case] in_channels: usize,
        #[case] embed_dim: usize,
        #[case] height: usize,
        #[case] width: usize,
        #[case] norm_layer: bool,
    ) {
        let device = Default::default();
        let patch_embed = PatchEmbedConfig::new()
            .with_patch_size(patch_size)
            .with_in_channels(in_channels)
            .with_embed_dim(embed_dim)
            .with_norm_layer(norm_layer)
            .init::<TestBackend>(&device)
            .expect("valid config");

        let input = Tensor::<TestBackend, 4>::random(
            [2, in_channels, height, width],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let (output, h, w) = patch_embed.forward(input).expect("divisible input");

        assert_eq!((h, w), (height / patch_size, width / patch_size));
        assert_eq!(output.dims(), [2, h * w, embed_dim]);
    }

    #[rstest]
    #[case(3, 225, 224)]
    #[case(3, 224, 226)]
    #[case(1, 224, 224)]
    fn mismatched_input_is_a_shape_error(
        #[case] channels: usize,
        #[case] height: usize,
        #[case] width: usize,
    ) {
        let device = Default::default();
        let patch_embed = PatchEmbedConfig::new()
            .init::<TestBackend>(&device)
            .expect("valid config");
        let input = Tensor::<TestBackend, 4>::zeros([1, channels, height, width], &device);

        assert!(matches!(
            patch_embed.forward(input),
            Err(SwinError::Shape { .. })
        ));
    }

    #[rstest]
    #[case(0, 3, 96)]
    #[case(4, 0, 96)]
    #[case(4, 3, 0)]
    fn zero_sized_patch_embed_is_rejected(
        #[case] patch_size: usize,
        #[case] in_channels: usize,
        #[case] embed_dim: usize,
    ) {
        let device = Default::default();
        let result = PatchEmbedConfig::new()
            .with_patch_size(patch_size)
            .with_in_channels(in_channels)
            .with_embed_dim(embed_dim)
            .init::<TestBackend>(&device);

        assert!(matches!(result, Err(SwinError::Configuration { .. })));
    }
}
