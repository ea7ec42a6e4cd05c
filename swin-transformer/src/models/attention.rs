use burn::{
    module::Param,
    nn::{Dropout, DropoutConfig, Linear, LinearConfig},
    prelude::*,
    tensor::{activation::softmax, TensorData},
};
use burn_extra_ops::trunc_normal;

use super::window::relative_position_index;
use crate::{
    error::{SwinError, SwinResult},
    init::{InitWeights, WeightInitializer},
};

/// Configuration for window-based multi-head self-attention (W-MSA / SW-MSA).
///
/// # Arguments
/// - `dim`: Number of input channels
/// - `window_size`: Side of the square attention window
/// - `num_heads`: Number of attention heads; must divide `dim`
/// - `qkv_bias`: Whether the query/key/value projection has a bias
/// - `qk_scale`: Override of the default `head_dim^-0.5` score scale
/// - `attn_drop`: Dropout on the attention weights
/// - `proj_drop`: Dropout on the output projection
#[derive(Config, Debug)]
pub struct WindowAttentionConfig {
    dim: usize,
    window_size: usize,
    num_heads: usize,
    #[config(default = "true")]
    qkv_bias: bool,
    #[config(default = "None")]
    qk_scale: Option<f64>,
    #[config(default = "0.0")]
    attn_drop: f64,
    #[config(default = "0.0")]
    proj_drop: f64,
}

impl WindowAttentionConfig {
    /// # Errors
    /// `SwinError::Configuration` when `window_size` or `num_heads` is zero, or when
    /// `num_heads` does not divide `dim`.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SwinResult<WindowAttention<B>> {
        if self.window_size == 0 {
            return Err(SwinError::configuration("window_size must be positive"));
        }
        if self.num_heads == 0 || self.dim % self.num_heads != 0 {
            return Err(SwinError::configuration(format!(
                "dim {} is not divisible into {} attention heads",
                self.dim, self.num_heads
            )));
        }

        let head_dim = self.dim / self.num_heads;
        let span = 2 * self.window_size - 1;
        let tokens = self.window_size * self.window_size;

        let relative_position_bias_table = Param::from_tensor(trunc_normal(
            Tensor::zeros([span * span, self.num_heads], device),
            0.0,
            0.02,
            -2.0,
            2.0,
        ));
        let relative_position_index = Tensor::from_data(
            TensorData::new(relative_position_index(self.window_size), [tokens * tokens]),
            device,
        );

        Ok(WindowAttention {
            dim: self.dim,
            window_size: self.window_size,
            num_heads: self.num_heads,
            scale: self
                .qk_scale
                .unwrap_or_else(|| (head_dim as f64).powf(-0.5)),
            relative_position_bias_table,
            relative_position_index,
            qkv: LinearConfig::new(self.dim, self.dim * 3)
                .with_bias(self.qkv_bias)
                .init(device),
            attn_drop: DropoutConfig::new(self.attn_drop).init(),
            proj: LinearConfig::new(self.dim, self.dim).init(device),
            proj_drop: DropoutConfig::new(self.proj_drop).init(),
        })
    }
}

/// Multi-head self-attention inside square windows with a learned relative position
/// bias.
///
/// The bias table holds one row per relative offset, `(2 * window_size - 1)²` rows of
/// `num_heads` values; the constant `relative_position_index` selects the row for every
/// token pair of a window.
#[derive(Module, Debug)]
pub struct WindowAttention<B: Backend> {
    dim: usize,
    window_size: usize,
    num_heads: usize,
    scale: f64,
    relative_position_bias_table: Param<Tensor<B, 2>>,
    relative_position_index: Tensor<B, 1, Int>,
    qkv: Linear<B>,
    attn_drop: Dropout,
    proj: Linear<B>,
    proj_drop: Dropout,
}

impl<B: Backend> WindowAttention<B> {
    pub const fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub const fn window_size(&self) -> usize {
        self.window_size
    }

    /// The gathered bias, `[num_heads, window_size², window_size²]`.
    pub fn relative_position_bias(&self) -> Tensor<B, 3> {
        let tokens = self.window_size * self.window_size;
        self.relative_position_bias_table
            .val()
            .select(0, self.relative_position_index.clone())
            .reshape([tokens, tokens, self.num_heads])
            .permute([2, 0, 1])
    }

    /// Attention over a batch of windows.
    ///
    /// # Arguments
    /// - `x`: `[batch * num_windows, window_size², dim]`
    /// - `mask`: optional additive mask `[num_windows, window_size², window_size²]`,
    ///   broadcast over the batch and the heads
    ///
    /// # Returns
    /// Tensor with the same shape as `x`.
    ///
    /// # Errors
    /// `SwinError::Shape` when `x` is not a batch of windows of this module's geometry,
    /// or when the window batch is not a multiple of the mask's window count.
    pub fn forward(&self, x: Tensor<B, 3>, mask: Option<Tensor<B, 3>>) -> SwinResult<Tensor<B, 3>> {
        let [b, n, c] = x.dims();
        let tokens = self.window_size * self.window_size;
        if n != tokens || c != self.dim {
            return Err(SwinError::shape(
                format!("[_, {tokens}, {}]", self.dim),
                format!("{:?}", [b, n, c]),
            ));
        }
        let head_dim = c / self.num_heads;

        // [3, b, heads, n, head_dim]
        let qkv = self
            .qkv
            .forward(x)
            .reshape([b, n, 3, self.num_heads, head_dim])
            .permute([2, 0, 3, 1, 4]);
        let part = |i: usize| -> Tensor<B, 4> {
            qkv.clone()
                .narrow(0, i, 1)
                .reshape([b, self.num_heads, n, head_dim])
        };
        let (q, k, v) = (part(0), part(1), part(2));

        let attn = q.mul_scalar(self.scale).matmul(k.swap_dims(2, 3));
        let attn = attn + self.relative_position_bias().unsqueeze::<4>();

        let attn = match mask {
            Some(mask) => {
                let [nw, mask_n, mask_m] = mask.dims();
                if nw == 0 || b % nw != 0 || mask_n != n || mask_m != n {
                    return Err(SwinError::shape(
                        format!("mask [k, {n}, {n}] with k dividing {b}"),
                        format!("{:?}", [nw, mask_n, mask_m]),
                    ));
                }
                let attn = attn.reshape([b / nw, nw, self.num_heads, n, n])
                    + mask.reshape([1, nw, 1, n, n]);
                attn.reshape([b, self.num_heads, n, n])
            }
            None => attn,
        };

        let attn = self.attn_drop.forward(softmax(attn, 3));
        let x = attn.matmul(v).swap_dims(1, 2).reshape([b, n, c]);

        Ok(self.proj_drop.forward(self.proj.forward(x)))
    }
}

impl<B: Backend> InitWeights<B> for WindowAttention<B> {
    fn init_weights<I: WeightInitializer<B>>(mut self, init: &mut I) -> Self {
        self.qkv = init.init_linear(self.qkv);
        self.proj = init.init_linear(self.proj);
        self
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::Distribution;
    use rstest::rstest;

    use super::*;
    use crate::{models::window::MASKED_SCORE, tests::TestBackend};

    fn to_vec<const D: usize>(x: Tensor<TestBackend, D>) -> Vec<f32> {
        x.into_data().to_vec::<f32>().expect("f32 data")
    }

    #[rstest]
    #[case(96, 7, 3, 4)]
    #[case(128, 8, 4, 6)]
    #[case(48, 4, 3, 1)]
    #[case(16, 1, 2, 5)]
    fn window_attention_preserves_input_shape(
        #[case] dim: usize,
        #[case] window_size: usize,
        #[case] num_heads: usize,
        #[case] num_windows: usize,
    ) {
        let device = Default::default();
        let attention = WindowAttentionConfig::new(dim, window_size, num_heads)
            .init::<TestBackend>(&device)
            .expect("valid config");

        let tokens = window_size * window_size;
        let input = Tensor::<TestBackend, 3>::random(
            [num_windows, tokens, dim],
            Distribution::Normal(0.0, 1.0),
            &device,
        );

        let output = attention.forward(input, None).expect("matching shape");
        assert_eq!(output.dims(), [num_windows, tokens, dim]);
    }

    #[test]
    fn relative_position_bias_has_table_geometry() {
        let device = Default::default();
        let attention = WindowAttentionConfig::new(96, 7, 3)
            .init::<TestBackend>(&device)
            .expect("valid config");

        assert_eq!(attention.relative_position_bias_table.val().dims(), [169, 3]);
        assert_eq!(attention.relative_position_bias().dims(), [3, 49, 49]);
    }

    #[test]
    fn zero_mask_matches_no_mask() {
        let device = Default::default();
        let attention = WindowAttentionConfig::new(32, 4, 4)
            .init::<TestBackend>(&device)
            .expect("valid config");
        let input = Tensor::<TestBackend, 3>::random(
            [4, 16, 32],
            Distribution::Normal(0.0, 1.0),
            &device,
        );

        let unmasked = attention.forward(input.clone(), None).expect("shape");
        let zero_mask = Tensor::<TestBackend, 3>::zeros([2, 16, 16], &device);
        let masked = attention.forward(input, Some(zero_mask)).expect("shape");

        for (a, b) in to_vec(unmasked).iter().zip(to_vec(masked)) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn masked_pairs_do_not_contribute() {
        let device = Default::default();
        let attention = WindowAttentionConfig::new(8, 2, 2)
            .init::<TestBackend>(&device)
            .expect("valid config");

        // Token 0 may only attend to itself, so perturbing the other tokens must leave
        // its output unchanged.
        let mut mask = vec![0.0_f32; 16];
        for j in 1..4 {
            mask[j] = MASKED_SCORE;
            mask[j * 4] = MASKED_SCORE;
        }
        let mask = Tensor::<TestBackend, 3>::from_data(TensorData::new(mask, [1, 4, 4]), &device);

        let base = Tensor::<TestBackend, 3>::random(
            [1, 4, 8],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let noise = Tensor::<TestBackend, 3>::random(
            [1, 3, 8],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let perturbed = Tensor::cat(
            vec![base.clone().narrow(1, 0, 1), base.clone().narrow(1, 1, 3) + noise],
            1,
        );

        let a = attention.forward(base, Some(mask.clone())).expect("shape");
        let b = attention.forward(perturbed, Some(mask)).expect("shape");

        let a = to_vec(a.narrow(1, 0, 1));
        let b = to_vec(b.narrow(1, 0, 1));
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-4);
        }
    }

    #[test]
    fn mask_window_count_must_divide_batch() {
        let device = Default::default();
        let attention = WindowAttentionConfig::new(8, 2, 2)
            .init::<TestBackend>(&device)
            .expect("valid config");
        let input = Tensor::<TestBackend, 3>::zeros([3, 4, 8], &device);
        let mask = Tensor::<TestBackend, 3>::zeros([2, 4, 4], &device);

        assert!(matches!(
            attention.forward(input, Some(mask)),
            Err(SwinError::Shape { .. })
        ));
    }

    #[rstest]
    #[case(96, 7, 5)]
    #[case(96, 0, 3)]
    #[case(96, 7, 0)]
    fn invalid_geometry_is_rejected(
        #[case] dim: usize,
        #[case] window_size: usize,
        #[case] num_heads: usize,
    ) {
        let device = Default::default();
        let result =
            WindowAttentionConfig::new(dim, window_size, num_heads).init::<TestBackend>(&device);
        assert!(matches!(result, Err(SwinError::Configuration { .. })));
    }
}
