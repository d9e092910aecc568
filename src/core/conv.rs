// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Plain 2D and 3D convolutions over channels-last tensors.
//!
//! Nothing clever here, just the explicit loops. Kernels are laid out
//! `(kh, kw, cin, cout)` for 2D and `(kd, kh, kw, cin, cout)` for 3D.

use ndarray::{ArrayView1, ArrayView3, ArrayView4, ArrayView5};

use crate::misc::type_aliases::{Float, Tensor3, Tensor4};

/// Spatial padding mode of a convolution.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Padding {
    /// No padding, output shrinks by `kernel - 1`.
    Valid,
    /// Zero padding such that the output keeps the input size.
    Same,
}

/// 2D convolution of a `(height, width, cin)` feature map with a
/// `(kh, kw, cin, cout)` kernel, with optional per-output-channel bias.
///
/// Panics if the channel counts of input and kernel disagree,
/// or if a `Valid` convolution does not fit in the input.
pub fn conv2d(
    input: ArrayView3<Float>,
    kernel: ArrayView4<Float>,
    bias: Option<ArrayView1<Float>>,
    padding: Padding,
) -> Tensor3 {
    let (height, width, cin) = input.dim();
    let (kh, kw, kcin, cout) = kernel.dim();
    assert_eq!(cin, kcin, "Input and kernel channel counts disagree");
    if let Some(b) = bias {
        assert_eq!(b.len(), cout, "Bias length and output channels disagree");
    }

    let (out_h, out_w, pad_y, pad_x) = match padding {
        Padding::Valid => {
            assert!(height >= kh && width >= kw, "Kernel does not fit in input");
            (height - kh + 1, width - kw + 1, 0, 0)
        }
        Padding::Same => (height, width, (kh - 1) / 2, (kw - 1) / 2),
    };

    let mut out = Tensor3::zeros((out_h, out_w, cout));
    for y in 0..out_h {
        for x in 0..out_w {
            for j in 0..kh {
                // Offsets relative to the (possibly padded) input origin.
                let yy = y + j;
                if yy < pad_y || yy - pad_y >= height {
                    continue;
                }
                for i in 0..kw {
                    let xx = x + i;
                    if xx < pad_x || xx - pad_x >= width {
                        continue;
                    }
                    for ic in 0..cin {
                        let value = input[(yy - pad_y, xx - pad_x, ic)];
                        for oc in 0..cout {
                            out[(y, x, oc)] += value * kernel[(j, i, ic, oc)];
                        }
                    }
                }
            }
        }
    }
    if let Some(b) = bias {
        for y in 0..out_h {
            for x in 0..out_w {
                for oc in 0..cout {
                    out[(y, x, oc)] += b[oc];
                }
            }
        }
    }
    out
}

/// 3D convolution of a `(depth, height, width, cin)` tensor with a
/// `(kd, kh, kw, cin, cout)` kernel, with optional bias.
///
/// Panics under the same conditions as `conv2d`.
pub fn conv3d(
    input: ArrayView4<Float>,
    kernel: ArrayView5<Float>,
    bias: Option<ArrayView1<Float>>,
    padding: Padding,
) -> Tensor4 {
    let (depth, height, width, cin) = input.dim();
    let (kd, kh, kw, kcin, cout) = kernel.dim();
    assert_eq!(cin, kcin, "Input and kernel channel counts disagree");
    if let Some(b) = bias {
        assert_eq!(b.len(), cout, "Bias length and output channels disagree");
    }

    let (out_d, out_h, out_w, pad_z, pad_y, pad_x) = match padding {
        Padding::Valid => {
            assert!(
                depth >= kd && height >= kh && width >= kw,
                "Kernel does not fit in input"
            );
            (depth - kd + 1, height - kh + 1, width - kw + 1, 0, 0, 0)
        }
        Padding::Same => (depth, height, width, (kd - 1) / 2, (kh - 1) / 2, (kw - 1) / 2),
    };

    let mut out = Tensor4::zeros((out_d, out_h, out_w, cout));
    for z in 0..out_d {
        for y in 0..out_h {
            for x in 0..out_w {
                for k in 0..kd {
                    let zz = z + k;
                    if zz < pad_z || zz - pad_z >= depth {
                        continue;
                    }
                    for j in 0..kh {
                        let yy = y + j;
                        if yy < pad_y || yy - pad_y >= height {
                            continue;
                        }
                        for i in 0..kw {
                            let xx = x + i;
                            if xx < pad_x || xx - pad_x >= width {
                                continue;
                            }
                            for ic in 0..cin {
                                let value = input[(zz - pad_z, yy - pad_y, xx - pad_x, ic)];
                                for oc in 0..cout {
                                    out[(z, y, x, oc)] += value * kernel[(k, j, i, ic, oc)];
                                }
                            }
                        }
                    }
                }
            }
        }
    }
    if let Some(b) = bias {
        for z in 0..out_d {
            for y in 0..out_h {
                for x in 0..out_w {
                    for oc in 0..cout {
                        out[(z, y, x, oc)] += b[oc];
                    }
                }
            }
        }
    }
    out
}

/// Zero-pad the two spatial axes of a `(depth, height, width, channels)`
/// tensor by `pad` pixels on each side. The depth axis is left untouched.
pub fn zero_pad_spatial(input: ArrayView4<Float>, pad: usize) -> Tensor4 {
    let (depth, height, width, channels) = input.dim();
    let mut out = Tensor4::zeros((depth, height + 2 * pad, width + 2 * pad, channels));
    out.slice_mut(ndarray::s![
        ..,
        pad..pad + height,
        pad..pad + width,
        ..
    ])
    .assign(&input);
    out
}

// TESTS #############################################################
