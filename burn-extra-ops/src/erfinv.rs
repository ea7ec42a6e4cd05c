//! # Inverse Error Function
//!
//! Element-wise `erfinv` for Burn float tensors, used to turn uniform samples into
//! truncated-normal samples. A rational approximation gives the initial guess on the
//! central (`|y| <= 0.7`) and tail (`0.7 < |y| < 1`) ranges, followed by two
//! Newton-Raphson refinements. `|y| >= 1` maps to `±inf`.

use burn::prelude::*;
use core::f64::consts::PI;

const CENTRAL_RANGE: f64 = 0.7;

const CENTRAL_NUM: [f64; 4] = [0.886226899, -1.645349621, 0.914624893, -0.140543331];
const CENTRAL_DEN: [f64; 4] = [-2.118377725, 1.442710462, -0.329097515, 0.012229801];
const TAIL_NUM: [f64; 4] = [-1.970840454, -1.624906493, 3.429567803, 1.641345311];
const TAIL_DEN: [f64; 2] = [3.543889200, 1.637067800];

/// Element-wise inverse error function.
pub trait Erfinv {
    /// Computes `erfinv` for every element.
    fn erfinv(self) -> Self;
}

impl<B: Backend, const D: usize> Erfinv for Tensor<B, D> {
    fn erfinv(self) -> Self {
        erfinv(self)
    }
}

/// Computes `erfinv` for every element of `y`.
pub fn erfinv<B: Backend, const D: usize>(y: Tensor<B, D>) -> Tensor<B, D> {
    let y_abs = y.clone().abs();
    let sign = y.clone().sign();

    // Saturated entries produce NaN below and are overwritten at the end.
    let saturated = y_abs.clone().greater_equal_elem(1.0);

    let central = central_guess(y.clone());
    let tail = tail_guess(y.clone());
    let guess = tail.mask_where(y_abs.lower_equal_elem(CENTRAL_RANGE), central);

    let refined = newton_refine(guess, y);

    refined.mask_where(saturated, sign * f64::INFINITY)
}

fn central_guess<B: Backend, const D: usize>(y: Tensor<B, D>) -> Tensor<B, D> {
    let z = y.clone().powf_scalar(2.0);

    let num = ((z.clone() * CENTRAL_NUM[3] + CENTRAL_NUM[2]) * z.clone() + CENTRAL_NUM[1])
        * z.clone()
        + CENTRAL_NUM[0];
    let den = (((z.clone() * CENTRAL_DEN[3] + CENTRAL_DEN[2]) * z.clone() + CENTRAL_DEN[1])
        * z.clone()
        + CENTRAL_DEN[0])
        * z
        + 1.0;

    y * num / den
}

fn tail_guess<B: Backend, const D: usize>(y: Tensor<B, D>) -> Tensor<B, D> {
    let z = y.clone().abs().neg().add_scalar(1.0).div_scalar(2.0).log().neg().sqrt();

    let num = ((z.clone() * TAIL_NUM[3] + TAIL_NUM[2]) * z.clone() + TAIL_NUM[1]) * z.clone()
        + TAIL_NUM[0];
    let den = (z.clone() * TAIL_DEN[1] + TAIL_DEN[0]) * z + 1.0;

    y.sign() * num / den
}

fn newton_refine<B: Backend, const D: usize>(
    mut x: Tensor<B, D>,
    y: Tensor<B, D>,
) -> Tensor<B, D> {
    let two_over_sqrt_pi = 2.0 / PI.sqrt();
    for _ in 0..2 {
        let slope = x.clone().powf_scalar(2.0).neg().exp() * two_over_sqrt_pi;
        x = x.clone() - (x.erf() - y.clone()) / slope;
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn erfinv_matches_reference_values() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 1>::from_floats([0.0, 0.5, -0.5, 0.9], &device);
        let values = erfinv(x).into_data().to_vec::<f32>().expect("f32 data");

        let expected = [0.0_f32, 0.476_936, -0.476_936, 1.163_087];
        for (actual, expected) in values.iter().zip(expected) {
            assert!(
                (actual - expected).abs() < 1e-3,
                "erfinv mismatch: {actual} vs {expected}"
            );
        }
    }

    #[test]
    fn erfinv_saturates_to_infinity() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 1>::from_floats([1.0, -1.0], &device);
        let values = erfinv(x).into_data().to_vec::<f32>().expect("f32 data");

        assert_eq!(values[0], f32::INFINITY);
        assert_eq!(values[1], f32::NEG_INFINITY);
    }
}
