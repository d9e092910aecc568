// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Training loss over predicted disparity sequences.
//!
//! Three terms: absolute disparity error, gradient consistency through the
//! fixed Sobel bank, and surface normal consistency between the gradient
//! fields. The gradient terms use valid padding, so border pixels only
//! contribute to the absolute term.

use crate::math::sobel;
use crate::misc::type_aliases::{Float, Tensor2, Tensor3};

/// The individual terms of the loss, all means over the batch element.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct LossTerms {
    /// Mean absolute disparity error.
    pub disparity: Float,
    /// Mean absolute difference of the Sobel gradients, dx plus dy.
    pub gradient: Float,
    /// Mean deviation of the surface normal cosine similarity from one.
    pub normal: Float,
}

impl LossTerms {
    /// The scalar training objective.
    pub fn total(&self) -> Float {
        self.disparity + self.gradient + self.normal
    }
}

/// Evaluate the loss of a predicted `(frames, height, width)` disparity
/// sequence against the ground truth of the same shape.
pub fn disparity_loss(pred: &Tensor3, truth: &Tensor3) -> LossTerms {
    assert_eq!(pred.dim(), truth.dim(), "Prediction and truth shapes disagree");
    let (frames, _, _) = pred.dim();

    let disparity = mean_abs_diff(pred.iter(), truth.iter());

    let mut gradient_sum = 0.0;
    let mut normal_sum = 0.0;
    let mut gradient_count = 0;
    for t in 0..frames {
        let (pred_dx, pred_dy) = sobel::gradients(pred.slice(ndarray::s![t, .., ..]));
        let (true_dx, true_dy) = sobel::gradients(truth.slice(ndarray::s![t, .., ..]));
        gradient_sum += sum_abs_diff(&pred_dx, &true_dx) + sum_abs_diff(&pred_dy, &true_dy);
        normal_sum += sum_normal_deviation(&pred_dx, &pred_dy, &true_dx, &true_dy);
        gradient_count += pred_dx.len();
    }

    LossTerms {
        disparity,
        // dx and dy are averaged separately in the objective,
        // so each mean runs over gradient_count elements.
        gradient: gradient_sum / gradient_count as Float,
        normal: normal_sum / gradient_count as Float,
    }
}

fn mean_abs_diff<'a, I>(a: I, b: I) -> Float
where
    I: ExactSizeIterator<Item = &'a Float>,
{
    let count = a.len() as Float;
    a.zip(b).map(|(x, y)| (x - y).abs()).sum::<Float>() / count
}

fn sum_abs_diff(a: &Tensor2, b: &Tensor2) -> Float {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum()
}

/// Sum of `|1 - cos(n_pred, n_true)|` over all gradient pixels, with the
/// surface normal `n = (-dx, -dy, 1)`.
fn sum_normal_deviation(
    pred_dx: &Tensor2,
    pred_dy: &Tensor2,
    true_dx: &Tensor2,
    true_dy: &Tensor2,
) -> Float {
    let mut sum = 0.0;
    for (((pdx, pdy), tdx), tdy) in pred_dx
        .iter()
        .zip(pred_dy.iter())
        .zip(true_dx.iter())
        .zip(true_dy.iter())
    {
        let dot = pdx * tdx + pdy * tdy + 1.0;
        let norm_p = (pdx * pdx + pdy * pdy + 1.0).sqrt();
        let norm_t = (tdx * tdx + tdy * tdy + 1.0).sqrt();
        sum += (1.0 - dot / (norm_p * norm_t)).abs();
    }
    sum
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use approx;

    fn ramp(frames: usize, height: usize, width: usize) -> Tensor3 {
        Tensor3::from_shape_fn((frames, height, width), |(t, y, x)| {
            0.5 * t as Float + 0.1 * y as Float + 0.2 * x as Float
        })
    }

    #[test]
    fn perfect_prediction_has_zero_loss() {
        let truth = ramp(2, 8, 9);
        let terms = disparity_loss(&truth.clone(), &truth);
        assert!(approx::abs_diff_eq!(terms.disparity, 0.0));
        assert!(approx::abs_diff_eq!(terms.gradient, 0.0));
        assert!(approx::abs_diff_eq!(terms.normal, 0.0, epsilon = 1e-6));
        assert!(terms.total() < 1e-5);
    }

    #[test]
    fn constant_offset_only_hits_the_disparity_term() {
        let truth = ramp(2, 8, 9);
        let pred = truth.mapv(|v| v + 0.5);
        let terms = disparity_loss(&pred, &truth);
        assert!(approx::relative_eq!(terms.disparity, 0.5, max_relative = 1e-5));
        // A constant offset leaves gradients, hence normals, untouched.
        assert!(terms.gradient < 1e-5);
        assert!(terms.normal < 1e-5);
    }

    #[test]
    fn tilt_mismatch_hits_the_gradient_terms() {
        let truth = ramp(1, 10, 10);
        let pred = Tensor3::from_shape_fn((1, 10, 10), |(_, y, x)| {
            0.1 * y as Float - 0.2 * x as Float
        });
        let terms = disparity_loss(&pred, &truth);
        assert!(terms.gradient > 0.1);
        assert!(terms.normal > 0.0);
    }
}
