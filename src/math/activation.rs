// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Pointwise activation functions.
//!
//! Activations are an enumerated configuration option resolved at
//! construction time, never looked up dynamically at call time.

use crate::misc::type_aliases::Float;

/// Pointwise non-linearity applied to feature maps.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Activation {
    /// Identity, `f(x) = x`.
    Linear,
    /// Rectified linear unit, `f(x) = max(0, x)`.
    Relu,
    /// Hyperbolic tangent.
    Tanh,
    /// Saturating piecewise-linear sigmoid approximation,
    /// `f(x) = clamp(0.2 x + 0.5, 0, 1)`.
    HardSigmoid,
}

impl Activation {
    /// Apply the activation to a single value.
    #[inline]
    pub fn apply(self, x: Float) -> Float {
        match self {
            Activation::Linear => x,
            Activation::Relu => relu(x),
            Activation::Tanh => x.tanh(),
            Activation::HardSigmoid => hard_sigmoid(x),
        }
    }
}

/// Rectified linear unit.
#[inline]
pub fn relu(x: Float) -> Float {
    x.max(0.0)
}

/// Saturating hard sigmoid, the cheap approximation used by the gate
/// non-linearities of the recurrent cell.
#[inline]
pub fn hard_sigmoid(x: Float) -> Float {
    (0.2 * x + 0.5).max(0.0).min(1.0)
}

// TESTS #############################################################
