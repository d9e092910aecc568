// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Fixed Sobel convolution bank for disparity gradients.
//!
//! The two 3x3 kernels are not learned. They feed the gradient and surface
//! normal consistency terms of the loss function.

use ndarray::ArrayView2;

use crate::core::conv::{self, Padding};
use crate::misc::type_aliases::{Float, Tensor2, Tensor4};

/// Horizontal Sobel kernel.
pub const KERNEL_X: [[Float; 3]; 3] = [[1.0, 0.0, -1.0], [2.0, 0.0, -2.0], [1.0, 0.0, -1.0]];

/// Vertical Sobel kernel.
pub const KERNEL_Y: [[Float; 3]; 3] = [[1.0, 2.0, 1.0], [0.0, 0.0, 0.0], [-1.0, -2.0, -1.0]];

/// The two Sobel kernels packed as a `(3, 3, 1, 2)` convolution bank,
/// horizontal gradient in output channel 0, vertical in channel 1.
pub fn bank() -> Tensor4 {
    Tensor4::from_shape_fn((3, 3, 1, 2), |(j, i, _, oc)| match oc {
        0 => KERNEL_X[j][i],
        _ => KERNEL_Y[j][i],
    })
}

/// Compute the `(dx, dy)` gradient maps of a single-channel map with the
/// Sobel bank, valid padding. Each output is smaller by 2 in both axes.
pub fn gradients(map: ArrayView2<Float>) -> (Tensor2, Tensor2) {
    let (height, width) = map.dim();
    let as_channels = map
        .into_shape((height, width, 1))
        .expect("Map is not contiguous");
    let grad = conv::conv2d(as_channels, bank().view(), None, Padding::Valid);
    let dx = grad.slice(ndarray::s![.., .., 0]).to_owned();
    let dy = grad.slice(ndarray::s![.., .., 1]).to_owned();
    (dx, dy)
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use approx;

    #[test]
    fn horizontal_ramp_gradients() {
        // map(y, x) = x, so dx should be -8 everywhere (kernel sums to -8
        // on a unit ramp) and dy should be 0.
        let map = Tensor2::from_shape_fn((5, 6), |(_, x)| x as Float);
        let (dx, dy) = gradients(map.view());
        assert_eq!(dx.dim(), (3, 4));
        assert!(dx.iter().all(|&g| approx::relative_eq!(g, -8.0)));
        assert!(dy.iter().all(|&g| approx::relative_eq!(g, 0.0)));
    }

    #[test]
    fn vertical_ramp_gradients() {
        let map = Tensor2::from_shape_fn((6, 5), |(y, _)| 2.0 * y as Float);
        let (dx, dy) = gradients(map.view());
        assert!(dx.iter().all(|&g| approx::relative_eq!(g, 0.0)));
        assert!(dy.iter().all(|&g| approx::relative_eq!(g, -16.0)));
    }

    #[test]
    fn constant_map_has_zero_gradients() {
        let map = Tensor2::from_elem((4, 4), 3.5);
        let (dx, dy) = gradients(map.view());
        assert!(dx.iter().chain(dy.iter()).all(|&g| g == 0.0));
    }
}
