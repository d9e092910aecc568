// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Interoperability conversions between the image and tensor types.

use image::RgbImage;
use ndarray::Array3;

use crate::misc::type_aliases::{Float, Tensor2};

/// Convert an `RgbImage` into an `(height, width, 3)` tensor of `u8`.
///
/// The image buffer is row major so no transposition is needed,
/// the raw buffer is reinterpreted in place.
pub fn tensor_from_rgb(img: RgbImage) -> Array3<u8> {
    let (width, height) = img.dimensions();
    Array3::from_shape_vec((height as usize, width as usize, 3), img.into_raw())
        .expect("Image buffer has inconsistent dimensions")
}

/// Convert a raw 16 bits disparity buffer into a `(height, width)` tensor,
/// dividing by the dataset disparity scale.
pub fn disparity_from_raw(width: usize, height: usize, data: &[u16], scale: Float) -> Tensor2 {
    assert_eq!(data.len(), width * height);
    Tensor2::from_shape_fn((height, width), |(y, x)| {
        Float::from(data[y * width + x]) / scale
    })
}

/// Convert a disparity map back into a raw 16 bits buffer with a given scale.
/// Inverse operation of `disparity_from_raw`.
///
/// Values are clamped to the representable `u16` range.
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
pub fn raw_from_disparity(map: &Tensor2, scale: Float) -> (usize, usize, Vec<u16>) {
    let (height, width) = map.dim();
    let raw = map
        .iter()
        .map(|&d| (d * scale).round().max(0.0).min(Float::from(std::u16::MAX)) as u16)
        .collect();
    (width, height, raw)
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn disparity_raw_round_trip() {
        let raw: Vec<u16> = vec![0, 256, 512, 1024, 2048, 65535];
        let map = disparity_from_raw(3, 2, &raw, 256.0);
        assert_eq!(map.dim(), (2, 3));
        assert_eq!(map[(0, 1)], 1.0);
        let (width, height, back) = raw_from_disparity(&map, 256.0);
        assert_eq!((width, height), (3, 2));
        assert_eq!(back, raw);
    }
}
