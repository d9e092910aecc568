// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Per-channel batch normalization parameters and statistics.

use ndarray::ArrayView3;

use crate::misc::type_aliases::{Float, Tensor1, Tensor3};

/// Learned scale/offset and running statistics of one normalization layer.
///
/// The running statistics are mutable training state. Exactly one training
/// loop may hold write access to them (through `update_statistics`); any
/// concurrent inference path must work on an immutable snapshot.
#[derive(Clone, Debug)]
pub struct BatchNorm {
    /// Learned per-channel scale.
    pub gamma: Tensor1,
    /// Learned per-channel offset.
    pub beta: Tensor1,
    /// Running mean of the channel activations.
    pub mean: Tensor1,
    /// Running variance of the channel activations.
    pub variance: Tensor1,
    /// Small constant avoiding division by zero.
    pub epsilon: Float,
}

impl BatchNorm {
    /// Identity normalization over `channels` channels:
    /// unit scale, zero offset, zero mean, unit variance.
    pub fn identity(channels: usize) -> Self {
        Self {
            gamma: Tensor1::from(vec![1.0; channels]),
            beta: Tensor1::zeros(channels),
            mean: Tensor1::zeros(channels),
            variance: Tensor1::from(vec![1.0; channels]),
            epsilon: 1e-3,
        }
    }

    /// Number of channels this layer normalizes.
    pub fn channels(&self) -> usize {
        self.gamma.len()
    }

    /// Normalize a `(height, width, channels)` feature map with the stored
    /// statistics. Pure with respect to `self`.
    pub fn normalize(&self, input: ArrayView3<Float>) -> Tensor3 {
        let (height, width, channels) = input.dim();
        assert_eq!(channels, self.channels(), "Channel counts disagree");
        // Fold scale and statistics into one multiply-add per channel.
        let scale: Vec<Float> = (0..channels)
            .map(|c| self.gamma[c] / (self.variance[c] + self.epsilon).sqrt())
            .collect();
        let offset: Vec<Float> = (0..channels)
            .map(|c| self.beta[c] - scale[c] * self.mean[c])
            .collect();
        Tensor3::from_shape_fn((height, width, channels), |(y, x, c)| {
            scale[c] * input[(y, x, c)] + offset[c]
        })
    }

    /// Fold a batch of observed channel statistics into the running ones.
    /// Owned by the training procedure, never called during inference.
    pub fn update_statistics(&mut self, batch_mean: &Tensor1, batch_variance: &Tensor1, momentum: Float) {
        assert_eq!(batch_mean.len(), self.channels());
        assert_eq!(batch_variance.len(), self.channels());
        for c in 0..self.channels() {
            self.mean[c] = momentum * self.mean[c] + (1.0 - momentum) * batch_mean[c];
            self.variance[c] = momentum * self.variance[c] + (1.0 - momentum) * batch_variance[c];
        }
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use approx;

    #[test]
    fn identity_is_nearly_identity() {
        let bn = BatchNorm::identity(2);
        let input = Tensor3::from_shape_fn((3, 3, 2), |(y, x, c)| (y + 2 * x + c) as Float);
        let out = bn.normalize(input.view());
        // Unit variance plus epsilon means a scale slightly below one.
        for (o, i) in out.iter().zip(input.iter()) {
            assert!(approx::relative_eq!(*o, i / (1.0 + 1e-3 as Float).sqrt(), max_relative = 1e-5));
        }
    }

    #[test]
    fn statistics_are_applied() {
        let mut bn = BatchNorm::identity(1);
        bn.mean[0] = 2.0;
        bn.variance[0] = 4.0;
        bn.epsilon = 0.0;
        bn.gamma[0] = 3.0;
        bn.beta[0] = 1.0;
        let input = Tensor3::from_elem((1, 1, 1), 4.0);
        let out = bn.normalize(input.view());
        // (4 - 2) / 2 * 3 + 1 = 4
        assert!(approx::relative_eq!(out[(0, 0, 0)], 4.0));
    }

    #[test]
    fn update_statistics_moves_towards_batch() {
        let mut bn = BatchNorm::identity(1);
        let batch_mean = Tensor1::from(vec![10.0]);
        let batch_var = Tensor1::from(vec![5.0]);
        bn.update_statistics(&batch_mean, &batch_var, 0.9);
        assert!(approx::relative_eq!(bn.mean[0], 1.0));
        assert!(approx::relative_eq!(bn.variance[0], 0.9 + 0.5));
    }
}
