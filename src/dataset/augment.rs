// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Geometric and photometric augmentation of patch samples.
//!
//! Flips and rotations must keep the light field geometry consistent:
//! flipping the width axis also reverses the horizontal angular axis, and
//! a 90 degree rotation swaps the roles of the horizontal and vertical
//! view sequences. The model downstream makes no orientation assumption,
//! so any composition of these is a valid training example.

use ndarray::Axis;
use rand::Rng;

use crate::misc::type_aliases::{Float, Tensor3, Tensor5};

/// Which augmentations are enabled. Each enabled geometric augmentation is
/// applied with probability 1/2 (rotation draws 0 to 3 quarter turns).
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Augmentation {
    /// Random gamma in [0.8, 1.2] on the views.
    pub gamma: bool,
    /// Random flip of the width axis.
    pub horizontal_flip: bool,
    /// Random flip of the height axis.
    pub vertical_flip: bool,
    /// Random number of 90 degree rotations.
    pub rotation: bool,
}

impl Augmentation {
    /// Everything disabled (validation and test data).
    pub fn none() -> Self {
        Self {
            gamma: false,
            horizontal_flip: false,
            vertical_flip: false,
            rotation: false,
        }
    }

    /// Everything enabled (training data).
    pub fn full() -> Self {
        Self {
            gamma: true,
            horizontal_flip: true,
            vertical_flip: true,
            rotation: true,
        }
    }

    /// Apply the enabled augmentations in place to one normalized sample.
    ///
    /// `views_h` and `views_v` are `(frames, angular, height, width, channels)`
    /// in [0, 1], `disparity` is `(frames, height, width)`.
    pub fn apply<R: Rng>(
        &self,
        rng: &mut R,
        views_h: &mut Tensor5,
        views_v: &mut Tensor5,
        disparity: &mut Tensor3,
    ) {
        if self.gamma {
            let gamma: Float = 0.8 + 0.4 * rng.gen::<Float>();
            views_h.mapv_inplace(|v| v.powf(gamma));
            views_v.mapv_inplace(|v| v.powf(gamma));
        }
        if self.horizontal_flip && rng.gen::<bool>() {
            // Reversing the width axis mirrors the horizontal parallax,
            // so the horizontal angular order reverses with it.
            views_h.invert_axis(Axis(1));
            views_h.invert_axis(Axis(3));
            views_v.invert_axis(Axis(3));
            disparity.invert_axis(Axis(2));
        }
        if self.vertical_flip && rng.gen::<bool>() {
            views_h.invert_axis(Axis(2));
            views_v.invert_axis(Axis(1));
            views_v.invert_axis(Axis(2));
            disparity.invert_axis(Axis(1));
        }
        if self.rotation {
            let quarter_turns = rng.gen_range(0, 4);
            for _ in 0..quarter_turns {
                let rotated_h = rot90_views(views_h);
                let mut rotated_v = rot90_views(views_v);
                // The rotated vertical views become the horizontal ones,
                // with their angular order reversed.
                rotated_v.invert_axis(Axis(1));
                *views_h = rotated_v;
                *views_v = rotated_h;
                *disparity = rot90_disparity(disparity);
            }
        }
    }
}

/// Rotate the spatial axes of a view sequence by 90 degrees
/// (counter-clockwise, like the corresponding numpy convention).
fn rot90_views(views: &Tensor5) -> Tensor5 {
    let (frames, angular, height, width, channels) = views.dim();
    Tensor5::from_shape_fn((frames, angular, width, height, channels), |(t, a, i, j, c)| {
        views[(t, a, j, width - 1 - i, c)]
    })
}

/// Rotate the spatial axes of a disparity sequence by 90 degrees.
fn rot90_disparity(disparity: &Tensor3) -> Tensor3 {
    let (frames, height, width) = disparity.dim();
    Tensor3::from_shape_fn((frames, width, height), |(t, i, j)| {
        disparity[(t, j, width - 1 - i)]
    })
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn sample() -> (Tensor5, Tensor5, Tensor3) {
        let shape = (2, 3, 4, 4, 1);
        let views_h = Tensor5::from_shape_fn(shape, |(t, a, y, x, _)| {
            0.01 * (t * 31 + a * 17 + y * 4 + x) as Float
        });
        let views_v = views_h.mapv(|v| 1.0 - v);
        let disparity =
            Tensor3::from_shape_fn((2, 4, 4), |(t, y, x)| (t * 16 + y * 4 + x) as Float);
        (views_h, views_v, disparity)
    }

    #[test]
    fn four_rotations_are_identity() {
        let (views_h, _, disparity) = sample();
        let mut rotated = views_h.clone();
        let mut rotated_disp = disparity.clone();
        for _ in 0..4 {
            rotated = rot90_views(&rotated);
            rotated_disp = rot90_disparity(&rotated_disp);
        }
        assert_eq!(rotated, views_h);
        assert_eq!(rotated_disp, disparity);
    }

    #[test]
    fn rotation_moves_the_top_right_corner() {
        let (_, _, disparity) = sample();
        let rotated = rot90_disparity(&disparity);
        // Counter-clockwise: the top right corner lands at the top left.
        assert_eq!(rotated[(0, 0, 0)], disparity[(0, 0, 3)]);
    }

    #[test]
    fn disabled_augmentation_is_identity() {
        let (mut views_h, mut views_v, mut disparity) = sample();
        let reference = (views_h.clone(), views_v.clone(), disparity.clone());
        let mut rng = StdRng::seed_from_u64(0);
        Augmentation::none().apply(&mut rng, &mut views_h, &mut views_v, &mut disparity);
        assert_eq!((views_h, views_v, disparity), reference);
    }

    #[test]
    fn gamma_keeps_unit_range() {
        let (mut views_h, mut views_v, mut disparity) = sample();
        let augment = Augmentation {
            gamma: true,
            ..Augmentation::none()
        };
        let mut rng = StdRng::seed_from_u64(1);
        augment.apply(&mut rng, &mut views_h, &mut views_v, &mut disparity);
        assert!(views_h.iter().chain(views_v.iter()).all(|&v| v >= 0.0 && v <= 1.0));
    }

    #[test]
    fn augmentation_is_deterministic_given_seed() {
        let (mut a_h, mut a_v, mut a_d) = sample();
        let (mut b_h, mut b_v, mut b_d) = sample();
        let augment = Augmentation::full();
        let mut rng_a = StdRng::seed_from_u64(2);
        let mut rng_b = StdRng::seed_from_u64(2);
        augment.apply(&mut rng_a, &mut a_h, &mut a_v, &mut a_d);
        augment.apply(&mut rng_b, &mut b_h, &mut b_v, &mut b_d);
        assert_eq!(a_h, b_h);
        assert_eq!(a_v, b_v);
        assert_eq!(a_d, b_d);
    }
}
