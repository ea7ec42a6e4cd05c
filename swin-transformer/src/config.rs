use burn::prelude::*;

use crate::error::{SwinError, SwinResult};

/// Construction parameters of a Swin Transformer classifier.
///
/// The defaults describe Swin-T at 224x224: patch 4, embedding 96, depths
/// `[2, 2, 6, 2]`, heads `[3, 6, 12, 24]`, window 7 and 1000 classes. A
/// `num_classes` of zero or less builds the backbone without a head.
#[derive(Config, Debug)]
pub struct SwinTransformerConfig {
    #[config(default = "4")]
    pub patch_size: usize,
    #[config(default = "3")]
    pub in_channels: usize,
    #[config(default = "1000")]
    pub num_classes: i64,
    #[config(default = "96")]
    pub embed_dim: usize,
    #[config(default = "vec![2, 2, 6, 2]")]
    pub depths: Vec<usize>,
    #[config(default = "vec![3, 6, 12, 24]")]
    pub num_heads: Vec<usize>,
    #[config(default = "7")]
    pub window_size: usize,
    #[config(default = "4.0")]
    pub mlp_ratio: f64,
    #[config(default = "true")]
    pub qkv_bias: bool,
    #[config(default = "None")]
    pub qk_scale: Option<f64>,
    #[config(default = "0.0")]
    pub drop_rate: f64,
    #[config(default = "0.0")]
    pub attn_drop_rate: f64,
    #[config(default = "0.1")]
    pub drop_path_rate: f64,
    #[config(default = "true")]
    pub patch_norm: bool,
    #[config(default = "false")]
    pub use_checkpoint: bool,
}

impl SwinTransformerConfig {
    /// Swin-T: embedding 96, depths `[2, 2, 6, 2]`, heads `[3, 6, 12, 24]`.
    pub fn swin_t() -> Self {
        Self::new()
    }

    /// Swin-S: embedding 96, depths `[2, 2, 18, 2]`, heads `[3, 6, 12, 24]`.
    pub fn swin_s() -> Self {
        Self::new()
            .with_depths(vec![2, 2, 18, 2])
            .with_drop_path_rate(0.3)
    }

    /// Swin-B: embedding 128, depths `[2, 2, 18, 2]`, heads `[4, 8, 16, 32]`.
    pub fn swin_b() -> Self {
        Self::new()
            .with_embed_dim(128)
            .with_depths(vec![2, 2, 18, 2])
            .with_num_heads(vec![4, 8, 16, 32])
            .with_drop_path_rate(0.5)
    }

    /// Swin-L: embedding 192, depths `[2, 2, 18, 2]`, heads `[6, 12, 24, 48]`.
    pub fn swin_l() -> Self {
        Self::new()
            .with_embed_dim(192)
            .with_depths(vec![2, 2, 18, 2])
            .with_num_heads(vec![6, 12, 24, 48])
            .with_drop_path_rate(0.5)
    }

    pub fn num_stages(&self) -> usize {
        self.depths.len()
    }

    /// Channel width of every stage, `embed_dim * 2^i`.
    pub fn stage_dims(&self) -> Vec<usize> {
        (0..self.num_stages())
            .map(|i| self.embed_dim << i)
            .collect()
    }

    /// Width of the pooled feature vector, the last stage width.
    pub fn num_features(&self) -> usize {
        self.stage_dims().last().copied().unwrap_or(self.embed_dim)
    }

    /// Checks the configuration for logical consistency.
    ///
    /// # Errors
    /// `SwinError::Configuration` describing the first violated constraint.
    pub fn validate(&self) -> SwinResult<()> {
        for (name, value) in [
            ("patch_size", self.patch_size),
            ("in_channels", self.in_channels),
            ("embed_dim", self.embed_dim),
            ("window_size", self.window_size),
        ] {
            if value == 0 {
                return Err(SwinError::configuration(format!("{name} must be positive")));
            }
        }

        if self.depths.is_empty() {
            return Err(SwinError::configuration("at least one stage is required"));
        }
        if self.depths.len() != self.num_heads.len() {
            return Err(SwinError::configuration(format!(
                "{} stage depths but {} head counts",
                self.depths.len(),
                self.num_heads.len()
            )));
        }
        if let Some(stage) = self.depths.iter().position(|&depth| depth == 0) {
            return Err(SwinError::configuration(format!(
                "stage {stage} has no blocks"
            )));
        }
        for (stage, (&dim, &heads)) in self.stage_dims().iter().zip(&self.num_heads).enumerate() {
            if heads == 0 || dim % heads != 0 {
                return Err(SwinError::configuration(format!(
                    "stage {stage} width {dim} is not divisible into {heads} heads"
                )));
            }
        }

        if self.mlp_ratio.is_nan() || self.mlp_ratio <= 0.0 {
            return Err(SwinError::configuration(format!(
                "mlp_ratio must be positive, got {}",
                self.mlp_ratio
            )));
        }
        for (name, rate) in [
            ("drop_rate", self.drop_rate),
            ("attn_drop_rate", self.attn_drop_rate),
            ("drop_path_rate", self.drop_path_rate),
        ] {
            if !(0.0..1.0).contains(&rate) {
                return Err(SwinError::configuration(format!(
                    "{name} must lie in [0, 1), got {rate}"
                )));
            }
        }

        Ok(())
    }

    /// Per-block stochastic depth rates in stage-major, block-minor order.
    pub fn drop_path_schedule(&self) -> Vec<f64> {
        stochastic_depth_schedule(self.drop_path_rate, self.depths.iter().sum())
    }
}

/// `steps` rates spaced evenly from `0` to `max_rate`, both ends included.
///
/// A single step yields `[0.0]`.
pub fn stochastic_depth_schedule(max_rate: f64, steps: usize) -> Vec<f64> {
    match steps {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => {
            let step_size = max_rate / (steps - 1) as f64;
            let mut rates: Vec<f64> = (0..steps - 1).map(|i| i as f64 * step_size).collect();
            rates.push(max_rate);
            rates
        }
    }
}
