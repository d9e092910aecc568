// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use criterion::{black_box, criterion_group, criterion_main, Bencher, Criterion, Fun};
use light_field_depth_rs::core::tiling::{self, PatchGrid};
use light_field_depth_rs::misc::type_aliases::{Float, Tensor3};

// Functions.

fn tile_only(seq: &Tensor3, grid: &PatchGrid) -> usize {
    tiling::tile_sequence(seq.view(), grid, 0).len()
}

fn tile_and_stitch(seq: &Tensor3, grid: &PatchGrid) -> Tensor3 {
    let patches = tiling::tile_sequence(seq.view(), grid, 0);
    tiling::stitch(&patches, grid)
}

// Benches.

fn bench_tile(b: &mut Bencher, size: &(usize, usize)) {
    let (height, width) = *size;
    let grid = PatchGrid::new(height, width, 32, 16).unwrap();
    let seq = Tensor3::from_shape_fn((5, height, width), |(t, y, x)| {
        (t + y + x) as Float * 0.01
    });
    b.iter(|| black_box(tile_only(&seq, &grid)));
}

fn bench_tile_and_stitch(b: &mut Bencher, size: &(usize, usize)) {
    let (height, width) = *size;
    let grid = PatchGrid::new(height, width, 32, 16).unwrap();
    let seq = Tensor3::from_shape_fn((5, height, width), |(t, y, x)| {
        (t + y + x) as Float * 0.01
    });
    b.iter(|| black_box(tile_and_stitch(&seq, &grid)));
}

fn criterion_benchmark(c: &mut Criterion) {
    let funs = vec![
        Fun::new("Tile", bench_tile),
        Fun::new("TileAndStitch", bench_tile_and_stitch),
    ];
    c.bench_functions("Tiling", funs, (128, 256));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
