//! # Truncated Normal Distribution
//!
//! Inverse-CDF sampling of a normal distribution restricted to `[a, b]`, the scheme
//! vision transformers use for linear weights and relative position bias tables.

use burn::{prelude::*, tensor::Distribution};

use super::erfinv::Erfinv;

/// Returns a tensor shaped like `x` whose values follow `N(mean, std²)` truncated to
/// `[a, b]`.
///
/// Uniform samples are drawn between the CDF values of the two bounds, mapped back
/// through `erfinv`, then scaled, shifted and clamped.
pub fn trunc_normal<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    mean: f64,
    std: f64,
    a: f64,
    b: f64,
) -> Tensor<B, D> {
    fn norm_cdf(x: f64) -> f64 {
        (1.0 + libm::erf(x / core::f64::consts::SQRT_2)) / 2.0
    }

    let lower = norm_cdf((a - mean) / std);
    let upper = norm_cdf((b - mean) / std);

    x.random_like(Distribution::Uniform(
        2.0f64.mul_add(lower, -1.0),
        2.0f64.mul_add(upper, -1.0),
    ))
    .erfinv()
    .mul_scalar(std * core::f64::consts::SQRT_2)
    .add_scalar(mean)
    .clamp(a, b)
}
