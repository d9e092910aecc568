// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Type aliases for common types used all over the code base.

use ndarray;

/// At the moment, the library is focused on f32 computation.
pub type Float = f32;

/// A vector of Floats, typically per-channel parameters.
pub type Tensor1 = ndarray::Array1<Float>;
/// A 2D tensor of Floats, typically a single-channel map (height, width).
pub type Tensor2 = ndarray::Array2<Float>;
/// A 3D tensor of Floats.
///
/// Either a feature map (height, width, channels)
/// or a disparity sequence (frames, height, width) depending on context.
pub type Tensor3 = ndarray::Array3<Float>;
/// A 4D tensor of Floats, e.g. a 2D convolution kernel (kh, kw, cin, cout)
/// or a per-frame angular stack (angular, height, width, channels).
pub type Tensor4 = ndarray::Array4<Float>;
/// A 5D tensor of Floats, e.g. a 3D convolution kernel (kd, kh, kw, cin, cout)
/// or an angular view sequence (frames, angular, height, width, channels).
pub type Tensor5 = ndarray::Array5<Float>;
