// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use criterion::{black_box, criterion_group, criterion_main, Bencher, Criterion, Fun};
use light_field_depth_rs::core::recurrent::cell::{CellConfig, SpatioTemporalCell};
use light_field_depth_rs::core::recurrent::sequence;
use light_field_depth_rs::misc::type_aliases::{Float, Tensor3, Tensor4};
use rand::rngs::StdRng;
use rand::SeedableRng;

const FILTERS: usize = 8;
const INPUT_CHANNELS: usize = 16;
const PATCH: usize = 32;

// Functions.

fn build_cell() -> SpatioTemporalCell {
    let mut rng = StdRng::seed_from_u64(0);
    CellConfig::new(FILTERS, INPUT_CHANNELS)
        .build(&mut rng)
        .unwrap()
}

fn patch_input() -> Tensor3 {
    Tensor3::from_shape_fn((PATCH, PATCH, INPUT_CHANNELS), |(y, x, c)| {
        0.01 * (y + x + c) as Float
    })
}

// Benches.

fn bench_single_step(b: &mut Bencher, _: &usize) {
    let cell = build_cell();
    let input = patch_input();
    let state = cell.zero_state(PATCH, PATCH);
    b.iter(|| black_box(cell.step(input.view(), &state)));
}

fn bench_unroll_sequence(b: &mut Bencher, nb_frames: &usize) {
    let cell = build_cell();
    let mut inputs = Tensor4::zeros((*nb_frames, PATCH, PATCH, INPUT_CHANNELS));
    for t in 0..*nb_frames {
        inputs
            .slice_mut(ndarray::s![t, .., .., ..])
            .assign(&patch_input());
    }
    b.iter(|| black_box(sequence::unroll(&cell, inputs.view(), None)));
}

fn criterion_benchmark(c: &mut Criterion) {
    let funs = vec![
        Fun::new("SingleStep", bench_single_step),
        Fun::new("UnrollSequence", bench_unroll_sequence),
    ];
    c.bench_functions("RecurrentCell", funs, 5);
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
