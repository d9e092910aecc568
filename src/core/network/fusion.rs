// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Fusion head merging the horizontal and vertical branch features.

use ndarray::ArrayView3;
use rand::Rng;

use crate::core::conv::{self, Padding};
use crate::math::activation::relu;
use crate::math::initializer::Initializer;
use crate::misc::type_aliases::{Float, Tensor1, Tensor3, Tensor4};

/// One 2D convolution layer.
#[derive(Clone, Debug)]
pub struct Conv2dLayer {
    /// Kernel `(kh, kw, cin, cout)`.
    pub kernel: Tensor4,
    /// Per-output-channel bias.
    pub bias: Tensor1,
}

impl Conv2dLayer {
    /// Initialize a `kernel_size` square layer.
    pub fn build<R: Rng>(
        kernel_size: usize,
        cin: usize,
        cout: usize,
        initializer: Initializer,
        rng: &mut R,
    ) -> Self {
        Self {
            kernel: initializer.conv2d_kernel(rng, (kernel_size, kernel_size, cin, cout)),
            bias: Initializer::Zeros.vector(rng, cout),
        }
    }

    /// Same-size convolution with bias, no activation.
    pub fn forward(&self, input: ArrayView3<Float>) -> Tensor3 {
        conv::conv2d(input, self.kernel.view(), Some(self.bias.view()), Padding::Same)
    }
}

/// Stack of 3x3 same-size ReLU convolutions compressing the concatenated
/// branch features into the per-frame input of the estimation head.
#[derive(Clone, Debug)]
pub struct FusionHead {
    /// Convolution stack, applied in order.
    pub layers: Vec<Conv2dLayer>,
}

impl FusionHead {
    /// Build the stack for `in_channels` input channels with the given
    /// filter counts.
    pub fn build<R: Rng>(
        in_channels: usize,
        filters: &[usize],
        initializer: Initializer,
        rng: &mut R,
    ) -> Result<Self, String> {
        if filters.is_empty() {
            return Err("The fusion head needs at least one convolution".to_string());
        }
        let mut layers = Vec::with_capacity(filters.len());
        let mut cin = in_channels;
        for &cout in filters.iter() {
            layers.push(Conv2dLayer::build(3, cin, cout, initializer, rng));
            cin = cout;
        }
        Ok(Self { layers })
    }

    /// Number of feature channels produced.
    pub fn out_channels(&self) -> usize {
        self.layers.last().map(|l| l.kernel.dim().3).unwrap_or(0)
    }

    /// Process a `(height, width, cin)` map into `(height, width, out_channels)`.
    pub fn forward(&self, input: ArrayView3<Float>) -> Tensor3 {
        let mut features = input.to_owned();
        for layer in self.layers.iter() {
            features = layer.forward(features.view());
            features.mapv_inplace(relu);
        }
        features
    }
}

/// Concatenate two feature maps of identical spatial extent along channels.
pub fn concat_channels(a: ArrayView3<Float>, b: ArrayView3<Float>) -> Tensor3 {
    let (height, width, ca) = a.dim();
    let (hb, wb, cb) = b.dim();
    assert_eq!((height, width), (hb, wb), "Spatial extents disagree");
    let mut out = Tensor3::zeros((height, width, ca + cb));
    out.slice_mut(ndarray::s![.., .., 0..ca]).assign(&a);
    out.slice_mut(ndarray::s![.., .., ca..]).assign(&b);
    out
}

// TESTS #############################################################
