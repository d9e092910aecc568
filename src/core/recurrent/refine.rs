// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Residual refine sub-network applied once per recurrence step.
//!
//! It sharpens the fused gate/carry state of the recurrent cell before
//! that state becomes the emitted disparity estimate and the propagated
//! hidden state.

use ndarray::ArrayView3;
use rand::Rng;

use crate::core::batch_norm::BatchNorm;
use crate::core::conv::{self, Padding};
use crate::math::activation::relu;
use crate::math::initializer::Initializer;
use crate::misc::type_aliases::{Float, Tensor1, Tensor3, Tensor4};

/// Weights of the refine sub-network.
///
/// Two 5x5 convolution / batch-norm / ReLU blocks preserving the channel
/// count, then two parallel linear heads from the intermediate map:
/// a 3x3 projection to the next hidden state and a 5x5 projection to the
/// single-channel disparity estimate. The first two convolutions carry no
/// bias, normalization provides the offset.
#[derive(Clone, Debug)]
pub struct RefineNet {
    /// First 5x5 kernel, `(5, 5, c, c)`, no bias.
    pub conv1: Tensor4,
    /// Normalization after the first convolution.
    pub bn1: BatchNorm,
    /// Second 5x5 kernel, `(5, 5, c, c)`, no bias.
    pub conv2: Tensor4,
    /// Normalization after the second convolution.
    pub bn2: BatchNorm,
    /// Hidden state head kernel, `(3, 3, c, hidden)`.
    pub hidden_kernel: Tensor4,
    /// Hidden state head bias.
    pub hidden_bias: Tensor1,
    /// Disparity head kernel, `(5, 5, c, 1)`.
    pub disparity_kernel: Tensor4,
    /// Disparity head bias.
    pub disparity_bias: Tensor1,
}

impl RefineNet {
    /// Initialize a refine net taking `input_channels` fused channels and
    /// emitting an `hidden_channels` hidden state.
    pub fn build<R: Rng>(
        input_channels: usize,
        hidden_channels: usize,
        kernel_initializer: Initializer,
        rng: &mut R,
    ) -> Self {
        let c = input_channels;
        Self {
            conv1: kernel_initializer.conv2d_kernel(rng, (5, 5, c, c)),
            bn1: BatchNorm::identity(c),
            conv2: kernel_initializer.conv2d_kernel(rng, (5, 5, c, c)),
            bn2: BatchNorm::identity(c),
            hidden_kernel: kernel_initializer.conv2d_kernel(rng, (3, 3, c, hidden_channels)),
            hidden_bias: Initializer::Zeros.vector(rng, hidden_channels),
            disparity_kernel: kernel_initializer.conv2d_kernel(rng, (5, 5, c, 1)),
            disparity_bias: Initializer::Zeros.vector(rng, 1),
        }
    }

    /// Number of fused input channels.
    pub fn input_channels(&self) -> usize {
        self.conv1.dim().2
    }

    /// Number of hidden state channels produced.
    pub fn hidden_channels(&self) -> usize {
        self.hidden_kernel.dim().3
    }

    /// Refine a fused `(height, width, c)` state into the pair
    /// `(next_hidden_state, emitted_disparity)`.
    ///
    /// Both heads are raw linear projections, no terminal activation.
    pub fn forward(&self, fused: ArrayView3<Float>) -> (Tensor3, Tensor3) {
        let mut r = conv::conv2d(fused, self.conv1.view(), None, Padding::Same);
        r = self.bn1.normalize(r.view());
        r.mapv_inplace(relu);
        let mut r = conv::conv2d(r.view(), self.conv2.view(), None, Padding::Same);
        r = self.bn2.normalize(r.view());
        r.mapv_inplace(relu);
        let hidden = conv::conv2d(
            r.view(),
            self.hidden_kernel.view(),
            Some(self.hidden_bias.view()),
            Padding::Same,
        );
        let disparity = conv::conv2d(
            r.view(),
            self.disparity_kernel.view(),
            Some(self.disparity_bias.view()),
            Padding::Same,
        );
        (hidden, disparity)
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn forward_shapes() {
        let mut rng = StdRng::seed_from_u64(0);
        let net = RefineNet::build(24, 8, Initializer::GlorotUniform, &mut rng);
        assert_eq!(net.input_channels(), 24);
        assert_eq!(net.hidden_channels(), 8);
        let fused = Tensor3::from_elem((6, 7, 24), 0.1);
        let (hidden, disparity) = net.forward(fused.view());
        assert_eq!(hidden.dim(), (6, 7, 8));
        assert_eq!(disparity.dim(), (6, 7, 1));
    }

    #[test]
    fn heads_are_linear_in_bias() {
        // With zero kernels the heads reduce to their bias, proving that
        // no activation clamps the raw projections.
        let mut rng = StdRng::seed_from_u64(1);
        let mut net = RefineNet::build(4, 2, Initializer::Zeros, &mut rng);
        net.hidden_bias[0] = -3.0;
        net.disparity_bias[0] = -7.5;
        let fused = Tensor3::from_elem((3, 3, 4), 1.0);
        let (hidden, disparity) = net.forward(fused.view());
        assert!(hidden.slice(ndarray::s![.., .., 0]).iter().all(|&v| v == -3.0));
        assert!(disparity.iter().all(|&v| v == -7.5));
    }
}
