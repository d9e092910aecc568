// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Angular feature branch: a 3D convolution stack collapsing the angular
//! view axis of one frame into a flat spatial feature map.
//!
//! One branch owns one weight set and is applied to every frame of its
//! view sequence, so the weights are shared across time by construction:
//! the branch is a pure function of (weights, frame).

use ndarray::ArrayView4;
use rand::Rng;

use crate::core::conv::{self, Padding};
use crate::math::activation::relu;
use crate::math::initializer::Initializer;
use crate::misc::type_aliases::{Float, Tensor1, Tensor3, Tensor4, Tensor5};

/// One 3D convolution layer of the branch.
#[derive(Clone, Debug)]
pub struct Conv3dLayer {
    /// Kernel `(kd, kh, kw, cin, cout)`.
    pub kernel: Tensor5,
    /// Per-output-channel bias.
    pub bias: Tensor1,
}

/// Weights of one angular branch.
#[derive(Clone, Debug)]
pub struct AngularBranch {
    /// Convolution stack, applied in order with ReLU between layers.
    pub layers: Vec<Conv3dLayer>,
    /// Zero padding applied to both spatial axes before the stack,
    /// sized so the stack gives back the input spatial extent.
    pub spatial_pad: usize,
}

impl AngularBranch {
    /// Build a branch collapsing `angular` views of `in_channels` channel
    /// frames through convolutions with the given filter counts
    /// (3x3x3 kernels, valid padding).
    ///
    /// The stack must consume the angular axis exactly: after
    /// `layers` valid convolutions the angular extent `angular - 2*layers`
    /// has to be 1. Anything else is a configuration error.
    pub fn build<R: Rng>(
        angular: usize,
        in_channels: usize,
        filters: &[usize],
        initializer: Initializer,
        rng: &mut R,
    ) -> Result<Self, String> {
        if filters.is_empty() {
            return Err("The angular branch needs at least one convolution".to_string());
        }
        let consumed = 2 * filters.len();
        if angular <= consumed || angular - consumed != 1 {
            return Err(format!(
                "{} convolutions cannot collapse {} angular views to a single one",
                filters.len(),
                angular
            ));
        }
        let mut layers = Vec::with_capacity(filters.len());
        let mut cin = in_channels;
        for &cout in filters.iter() {
            layers.push(Conv3dLayer {
                kernel: initializer.conv3d_kernel(rng, (3, 3, 3, cin, cout)),
                bias: Initializer::Zeros.vector(rng, cout),
            });
            cin = cout;
        }
        Ok(Self {
            layers,
            spatial_pad: filters.len(),
        })
    }

    /// Number of feature channels produced.
    pub fn out_channels(&self) -> usize {
        self.layers.last().map(|l| l.kernel.dim().4).unwrap_or(0)
    }

    /// Process one frame's angular stack `(angular, height, width, channels)`
    /// into a `(height, width, out_channels)` feature map.
    ///
    /// The input is centered by subtracting its per-channel mean before
    /// the convolution stack, making the features invariant to global
    /// intensity shifts of the capture.
    pub fn forward(&self, views: ArrayView4<Float>) -> Tensor3 {
        let (angular, height, width, channels) = views.dim();

        // Per-channel centering.
        let count = (angular * height * width) as Float;
        let mut means = vec![0.0; channels];
        for a in 0..angular {
            for y in 0..height {
                for x in 0..width {
                    for c in 0..channels {
                        means[c] += views[(a, y, x, c)];
                    }
                }
            }
        }
        for mean in means.iter_mut() {
            *mean /= count;
        }
        let centered = Tensor4::from_shape_fn((angular, height, width, channels), |(a, y, x, c)| {
            views[(a, y, x, c)] - means[c]
        });

        let mut features = conv::zero_pad_spatial(centered.view(), self.spatial_pad);
        for layer in self.layers.iter() {
            features = conv::conv3d(
                features.view(),
                layer.kernel.view(),
                Some(layer.bias.view()),
                Padding::Valid,
            );
            features.mapv_inplace(relu);
        }

        let (depth, out_h, out_w, out_c) = features.dim();
        assert_eq!(depth, 1, "Angular axis must collapse to a single view");
        assert_eq!((out_h, out_w), (height, width));
        features
            .into_shape((out_h, out_w, out_c))
            .expect("Collapsed features are contiguous")
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn angular_mismatch_is_a_build_error() {
        let mut rng = StdRng::seed_from_u64(0);
        // 4 layers consume 8 views, so 7 angular views cannot work.
        let result = AngularBranch::build(7, 3, &[8, 8, 8, 8], Initializer::GlorotUniform, &mut rng);
        assert!(result.is_err());
        let result = AngularBranch::build(9, 3, &[], Initializer::GlorotUniform, &mut rng);
        assert!(result.is_err());
    }

    #[test]
    fn forward_preserves_spatial_extent() {
        let mut rng = StdRng::seed_from_u64(1);
        let branch =
            AngularBranch::build(9, 3, &[4, 6, 6, 8], Initializer::GlorotUniform, &mut rng).unwrap();
        assert_eq!(branch.out_channels(), 8);
        let views = Tensor4::from_shape_fn((9, 12, 10, 3), |(a, y, x, c)| {
            0.01 * (a + y + x + c) as Float
        });
        let features = branch.forward(views.view());
        assert_eq!(features.dim(), (12, 10, 8));
    }

    #[test]
    fn forward_is_invariant_to_global_offset() {
        let mut rng = StdRng::seed_from_u64(2);
        let branch =
            AngularBranch::build(5, 1, &[2, 3], Initializer::GlorotUniform, &mut rng).unwrap();
        let views = Tensor4::from_shape_fn((5, 8, 8, 1), |(a, y, x, _)| {
            0.05 * (a * 3 + y * 2 + x) as Float
        });
        let shifted = views.mapv(|v| v + 10.0);
        let base = branch.forward(views.view());
        let offset = branch.forward(shifted.view());
        let close = base
            .iter()
            .zip(offset.iter())
            .all(|(a, b)| (a - b).abs() <= 1e-4);
        assert!(close);
    }
}
