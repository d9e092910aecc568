// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The spatio-temporal convolutional recurrent cell.
//!
//! A convolutional LSTM variant: at each step a convolved input and a
//! convolved previous hidden state feed four gates. The input, forget and
//! candidate gates are sized to the hidden filter count; the output gate
//! keeps the input channel count as a residual pass-through slot. The
//! gated output and activated carry are fused and refined into the emitted
//! disparity and the next hidden state.

use ndarray::{ArrayView1, ArrayView3, ArrayView4};
use rand::Rng;

use crate::core::conv::{self, Padding};
use crate::core::recurrent::refine::RefineNet;
use crate::math::activation::Activation;
use crate::math::initializer::Initializer;
use crate::misc::type_aliases::{Float, Tensor1, Tensor3, Tensor4};

/// Configuration of a recurrent cell, resolved once at build time.
///
/// `input_channels` must be known before the cell can be built; leaving it
/// undefined is a configuration error, never silently defaulted.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct CellConfig {
    /// Number of hidden filters of the cell state.
    pub filters: usize,
    /// Convolution kernel size `(kh, kw)`.
    pub kernel_size: (usize, usize),
    /// Channel count of the per-frame input feature maps.
    pub input_channels: Option<usize>,
    /// Padding of the input convolution. The recurrent convolution is
    /// always same-size.
    pub padding: Padding,
    /// Whether gates carry an additive bias.
    pub use_bias: bool,
    /// Initialize the forget gate bias slice to one, encouraging the cell
    /// to retain memory early in training.
    pub unit_forget_bias: bool,
    /// Candidate and carry activation.
    pub activation: Activation,
    /// Gate activation.
    pub recurrent_activation: Activation,
    /// Scheme for the input kernel.
    pub kernel_initializer: Initializer,
    /// Scheme for the recurrent kernel.
    pub recurrent_initializer: Initializer,
}

impl CellConfig {
    /// Conventional configuration for a cell with `filters` hidden
    /// filters reading `input_channels` channel inputs.
    pub fn new(filters: usize, input_channels: usize) -> Self {
        Self {
            filters,
            kernel_size: (3, 3),
            input_channels: Some(input_channels),
            padding: Padding::Same,
            use_bias: true,
            unit_forget_bias: true,
            activation: Activation::Tanh,
            recurrent_activation: Activation::HardSigmoid,
            kernel_initializer: Initializer::GlorotUniform,
            recurrent_initializer: Initializer::Orthogonal,
        }
    }

    /// Build the cell weights. Configuration errors are fatal here,
    /// never deferred to call time.
    pub fn build<R: Rng>(&self, rng: &mut R) -> Result<SpatioTemporalCell, String> {
        let input_channels = self.input_channels.ok_or_else(|| {
            "The channel dimension of the cell inputs should be defined. Found None.".to_string()
        })?;
        if self.filters == 0 {
            return Err("The cell needs at least one hidden filter".to_string());
        }
        let (kh, kw) = self.kernel_size;
        if kh == 0 || kw == 0 {
            return Err("Cell kernel size must be at least 1x1".to_string());
        }

        // One slot per gate: three hidden-sized gates plus the
        // input-sized residual output gate.
        let gate_channels = 3 * self.filters + input_channels;
        let kernel = self
            .kernel_initializer
            .conv2d_kernel(rng, (kh, kw, input_channels, gate_channels));
        let recurrent_kernel = self
            .recurrent_initializer
            .conv2d_kernel(rng, (kh, kw, self.filters, gate_channels));
        let bias = if self.use_bias {
            let mut bias = Initializer::Zeros.vector(rng, gate_channels);
            if self.unit_forget_bias {
                for b in bias
                    .slice_mut(ndarray::s![self.filters..2 * self.filters])
                    .iter_mut()
                {
                    *b = 1.0;
                }
            }
            Some(bias)
        } else {
            None
        };

        Ok(SpatioTemporalCell {
            filters: self.filters,
            input_channels,
            padding: self.padding,
            activation: self.activation,
            recurrent_activation: self.recurrent_activation,
            kernel,
            recurrent_kernel,
            bias,
            refine: RefineNet::build(
                input_channels + self.filters,
                self.filters,
                self.kernel_initializer,
                rng,
            ),
        })
    }
}

/// The hidden/carry state pair persisted between recurrence steps.
#[derive(Clone, PartialEq, Debug)]
pub struct CellState {
    /// Refined short term state, `(height, width, filters)`.
    pub hidden: Tensor3,
    /// Raw accumulated gate output, `(height, width, filters)`.
    pub carry: Tensor3,
}

/// A built recurrent cell: resolved configuration plus weights.
#[derive(Clone, Debug)]
pub struct SpatioTemporalCell {
    /// Hidden filter count.
    pub filters: usize,
    /// Input channel count, statically known since build time.
    pub input_channels: usize,
    /// Padding of the input convolution.
    pub padding: Padding,
    /// Candidate and carry activation.
    pub activation: Activation,
    /// Gate activation.
    pub recurrent_activation: Activation,
    /// Combined input kernel, `(kh, kw, input_channels, 3*filters + input_channels)`.
    pub kernel: Tensor4,
    /// Combined recurrent kernel, `(kh, kw, filters, 3*filters + input_channels)`.
    pub recurrent_kernel: Tensor4,
    /// Optional combined gate bias, split like the kernels.
    pub bias: Option<Tensor1>,
    /// Refine sub-network producing the emitted output and next hidden state.
    pub refine: RefineNet,
}

/// The four per-gate slices of a combined kernel or bias, in the order
/// input, forget, candidate, output.
struct GateSplit<T> {
    i: T,
    f: T,
    c: T,
    o: T,
}

impl SpatioTemporalCell {
    /// Zero-valued initial state for a `height x width` input.
    pub fn zero_state(&self, height: usize, width: usize) -> CellState {
        CellState {
            hidden: Tensor3::zeros((height, width, self.filters)),
            carry: Tensor3::zeros((height, width, self.filters)),
        }
    }

    /// Split a combined kernel along its output channel axis into the four
    /// gate kernels. The first three slots are hidden-sized, the last one
    /// is input-sized.
    fn split_kernel<'a>(&self, kernel: &'a Tensor4) -> GateSplit<ArrayView4<'a, Float>> {
        let f = self.filters;
        let d = self.input_channels;
        GateSplit {
            i: kernel.slice(ndarray::s![.., .., .., 0..f]),
            f: kernel.slice(ndarray::s![.., .., .., f..2 * f]),
            c: kernel.slice(ndarray::s![.., .., .., 2 * f..3 * f]),
            o: kernel.slice(ndarray::s![.., .., .., 3 * f..3 * f + d]),
        }
    }

    fn split_bias<'a>(&self, bias: &'a Tensor1) -> GateSplit<ArrayView1<'a, Float>> {
        let f = self.filters;
        let d = self.input_channels;
        GateSplit {
            i: bias.slice(ndarray::s![0..f]),
            f: bias.slice(ndarray::s![f..2 * f]),
            c: bias.slice(ndarray::s![2 * f..3 * f]),
            o: bias.slice(ndarray::s![3 * f..3 * f + d]),
        }
    }

    /// One recurrence step.
    ///
    /// Combines the convolved input and convolved previous hidden state
    /// through the four gates, updates the carry, fuses the gated output
    /// with the activated carry and refines the result. Returns the
    /// emitted disparity estimate `(height, width, 1)` and the next state.
    ///
    /// Deterministic: same weights, input and state give bit-identical
    /// results.
    pub fn step(&self, input: ArrayView3<Float>, state: &CellState) -> (Tensor3, CellState) {
        let (_, _, channels) = input.dim();
        assert_eq!(channels, self.input_channels, "Unexpected input channel count");

        let kernels = self.split_kernel(&self.kernel);
        let recurrent = self.split_kernel(&self.recurrent_kernel);
        let biases = self.bias.as_ref().map(|b| self.split_bias(b));
        let (bias_i, bias_f, bias_c, bias_o) = match &biases {
            Some(split) => (Some(split.i), Some(split.f), Some(split.c), Some(split.o)),
            None => (None, None, None, None),
        };

        let x_i = conv::conv2d(input, kernels.i, bias_i, self.padding);
        let x_f = conv::conv2d(input, kernels.f, bias_f, self.padding);
        let x_c = conv::conv2d(input, kernels.c, bias_c, self.padding);
        let x_o = conv::conv2d(input, kernels.o, bias_o, self.padding);
        let hidden = state.hidden.view();
        let h_i = conv::conv2d(hidden, recurrent.i, None, Padding::Same);
        let h_f = conv::conv2d(hidden, recurrent.f, None, Padding::Same);
        let h_c = conv::conv2d(hidden, recurrent.c, None, Padding::Same);
        let h_o = conv::conv2d(hidden, recurrent.o, None, Padding::Same);

        let gate = |x: Tensor3, h: Tensor3| -> Tensor3 {
            let mut g = x + &h;
            g.mapv_inplace(|v| self.recurrent_activation.apply(v));
            g
        };
        let gate_i = gate(x_i, h_i);
        let gate_f = gate(x_f, h_f);
        let gate_o = gate(x_o, h_o);
        let mut candidate = x_c + &h_c;
        candidate.mapv_inplace(|v| self.activation.apply(v));

        // c_t = f . c_{t-1} + i . g
        let carry = &gate_f * &state.carry + &gate_i * &candidate;

        // Fused state: gated output next to the activated carry.
        let (height, width, _) = gate_o.dim();
        let mut fused = Tensor3::zeros((height, width, self.input_channels + self.filters));
        fused
            .slice_mut(ndarray::s![.., .., 0..self.input_channels])
            .assign(&gate_o);
        fused
            .slice_mut(ndarray::s![.., .., self.input_channels..])
            .assign(&carry.mapv(|v| self.activation.apply(v)));

        let (hidden, output) = self.refine.forward(fused.view());
        (output, CellState { hidden, carry })
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use approx;
    use rand::{rngs::StdRng, SeedableRng};

    fn small_cell(seed: u64) -> SpatioTemporalCell {
        CellConfig::new(4, 6).build(&mut StdRng::seed_from_u64(seed)).unwrap()
    }

    #[test]
    fn missing_input_channels_is_a_build_error() {
        let mut config = CellConfig::new(8, 16);
        config.input_channels = None;
        let result = config.build(&mut StdRng::seed_from_u64(0));
        assert!(result.is_err());
    }

    #[test]
    fn zero_filters_is_a_build_error() {
        let config = CellConfig::new(0, 16);
        assert!(config.build(&mut StdRng::seed_from_u64(0)).is_err());
    }

    #[test]
    fn kernel_shapes_reserve_residual_slot() {
        let cell = small_cell(0);
        assert_eq!(cell.kernel.dim(), (3, 3, 6, 3 * 4 + 6));
        assert_eq!(cell.recurrent_kernel.dim(), (3, 3, 4, 3 * 4 + 6));
        assert_eq!(cell.bias.as_ref().unwrap().len(), 3 * 4 + 6);
        assert_eq!(cell.refine.input_channels(), 6 + 4);
    }

    #[test]
    fn unit_forget_bias_slice() {
        let cell = small_cell(0);
        let bias = cell.bias.as_ref().unwrap();
        assert!(bias.slice(ndarray::s![0..4]).iter().all(|&b| b == 0.0));
        assert!(bias.slice(ndarray::s![4..8]).iter().all(|&b| b == 1.0));
        assert!(bias.slice(ndarray::s![8..]).iter().all(|&b| b == 0.0));
    }

    #[test]
    fn step_is_deterministic() {
        let cell = small_cell(42);
        let input = Tensor3::from_shape_fn((5, 5, 6), |(y, x, c)| {
            0.1 * y as Float - 0.2 * x as Float + 0.05 * c as Float
        });
        let state = cell.zero_state(5, 5);
        let (out_a, next_a) = cell.step(input.view(), &state);
        let (out_b, next_b) = cell.step(input.view(), &state);
        assert_eq!(out_a, out_b);
        assert_eq!(next_a, next_b);
    }

    #[test]
    fn step_shapes() {
        let cell = small_cell(1);
        let input = Tensor3::zeros((7, 9, 6));
        let state = cell.zero_state(7, 9);
        let (output, next) = cell.step(input.view(), &state);
        assert_eq!(output.dim(), (7, 9, 1));
        assert_eq!(next.hidden.dim(), (7, 9, 4));
        assert_eq!(next.carry.dim(), (7, 9, 4));
    }

    #[test]
    fn saturated_gates_increment_carry() {
        // Saturate every gate and the candidate with huge biases:
        // i = f = 1 and g = 1, so c_t must equal c_{t-1} + 1.
        let mut cell = small_cell(2);
        let filters = cell.filters;
        let bias = cell.bias.as_mut().unwrap();
        for b in bias.slice_mut(ndarray::s![0..3 * filters]).iter_mut() {
            *b = 1000.0;
        }
        let input = Tensor3::zeros((4, 4, 6));
        let mut state = cell.zero_state(4, 4);
        state.carry.fill(0.25);
        let previous_carry = state.carry.clone();
        let (_, next) = cell.step(input.view(), &state);
        for (c, p) in next.carry.iter().zip(previous_carry.iter()) {
            assert!(approx::relative_eq!(*c, p + 1.0, max_relative = 1e-5));
        }
    }
}
