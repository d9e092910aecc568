// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Unrolling of the recurrent cell over a temporal sequence.

use ndarray::ArrayView4;

use crate::core::recurrent::cell::{CellState, SpatioTemporalCell};
use crate::misc::type_aliases::{Float, Tensor4};

/// Unroll the cell over a `(frames, height, width, channels)` sequence of
/// feature maps and return one emitted estimate per frame,
/// `(frames, height, width, 1)`. The final state is discarded.
///
/// The recurrence is inherently sequential: step `t` starts only once the
/// state of step `t - 1` is available.
pub fn unroll(
    cell: &SpatioTemporalCell,
    inputs: ArrayView4<Float>,
    initial_state: Option<CellState>,
) -> Tensor4 {
    unroll_with_state(cell, inputs, initial_state).0
}

/// Like `unroll`, but also return the final hidden/carry state pair
/// for callers that keep the recurrence going across sequences.
pub fn unroll_with_state(
    cell: &SpatioTemporalCell,
    inputs: ArrayView4<Float>,
    initial_state: Option<CellState>,
) -> (Tensor4, CellState) {
    let (frames, height, width, _) = inputs.dim();
    assert!(frames >= 1, "Cannot unroll over an empty sequence");
    let mut state = initial_state.unwrap_or_else(|| cell.zero_state(height, width));
    assert_eq!(state.hidden.dim(), (height, width, cell.filters));
    assert_eq!(state.carry.dim(), (height, width, cell.filters));

    let mut outputs = Tensor4::zeros((frames, height, width, 1));
    for t in 0..frames {
        let (output, next_state) = cell.step(inputs.slice(ndarray::s![t, .., .., ..]), &state);
        outputs.slice_mut(ndarray::s![t, .., .., ..]).assign(&output);
        state = next_state;
    }
    (outputs, state)
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use crate::core::recurrent::cell::CellConfig;
    use rand::{rngs::StdRng, SeedableRng};

    fn sequence_input(frames: usize) -> Tensor4 {
        Tensor4::from_shape_fn((frames, 4, 4, 3), |(t, y, x, c)| {
            0.3 * t as Float + 0.1 * y as Float - 0.1 * x as Float + 0.02 * c as Float
        })
    }

    #[test]
    fn one_output_per_frame() {
        let cell = CellConfig::new(2, 3).build(&mut StdRng::seed_from_u64(0)).unwrap();
        let inputs = sequence_input(5);
        let outputs = unroll(&cell, inputs.view(), None);
        assert_eq!(outputs.dim(), (5, 4, 4, 1));
    }

    #[test]
    fn state_carries_across_steps() {
        // Feeding the same frame twice must not give the same output for
        // both steps, since the second step sees an updated state.
        let cell = CellConfig::new(2, 3).build(&mut StdRng::seed_from_u64(1)).unwrap();
        let mut inputs = Tensor4::zeros((2, 4, 4, 3));
        let frame = sequence_input(1);
        inputs.slice_mut(ndarray::s![0, .., .., ..]).assign(&frame.slice(ndarray::s![0, .., .., ..]));
        inputs.slice_mut(ndarray::s![1, .., .., ..]).assign(&frame.slice(ndarray::s![0, .., .., ..]));
        let outputs = unroll(&cell, inputs.view(), None);
        let first = outputs.slice(ndarray::s![0, .., .., ..]).to_owned();
        let second = outputs.slice(ndarray::s![1, .., .., ..]).to_owned();
        assert_ne!(first, second);
    }

    #[test]
    fn split_unroll_equals_full_unroll() {
        // Unrolling 2 + 3 frames with the carried state must match
        // unrolling all 5 frames at once.
        let cell = CellConfig::new(2, 3).build(&mut StdRng::seed_from_u64(2)).unwrap();
        let inputs = sequence_input(5);
        let full = unroll(&cell, inputs.view(), None);
        let (head, state) = unroll_with_state(&cell, inputs.slice(ndarray::s![0..2, .., .., ..]), None);
        let (tail, _) = unroll_with_state(&cell, inputs.slice(ndarray::s![2..5, .., .., ..]), Some(state));
        assert_eq!(full.slice(ndarray::s![0..2, .., .., ..]), head.view());
        assert_eq!(full.slice(ndarray::s![2..5, .., .., ..]), tail.view());
    }

    #[test]
    fn caller_supplied_seed_state_is_used() {
        let cell = CellConfig::new(2, 3).build(&mut StdRng::seed_from_u64(3)).unwrap();
        let inputs = sequence_input(1);
        let zero = unroll(&cell, inputs.view(), None);
        let mut seeded_state = cell.zero_state(4, 4);
        seeded_state.carry.fill(5.0);
        let seeded = unroll(&cell, inputs.view(), Some(seeded_state));
        assert_ne!(zero, seeded);
    }

    #[test]
    fn outputs_are_finite() {
        let cell = CellConfig::new(2, 3).build(&mut StdRng::seed_from_u64(4)).unwrap();
        let outputs = unroll(&cell, sequence_input(4).view(), None);
        assert!(outputs.iter().all(|v| v.is_finite()));
    }
}
