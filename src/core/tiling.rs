// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tiling of frame sequences into overlapping patches and the inverse
//! stitching with overlap averaging.
//!
//! Tiling walks a regular grid in row major order (y outer, x inner).
//! Stitching sums every patch into a full resolution accumulator and then
//! divides each pixel by its overlap multiplicity. The multiplicity field
//! is derived by counting covering patches per pixel, so it stays correct
//! for any stride, not only the 50% overlap case where it degenerates to
//! the well known 4/2/1 bands.

use itertools::iproduct;
use ndarray::{Array3, ArrayView3, ArrayView5};

use crate::misc::type_aliases::{Float, Tensor2, Tensor3};

/// Tiling geometry of a frame into overlapping square patches.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct PatchGrid {
    /// Side length P of the square patches.
    pub patch_size: usize,
    /// Stride S between neighboring patch corners, `S <= P`.
    pub stride: usize,
    /// Number of patches along the horizontal axis.
    pub nx: usize,
    /// Number of patches along the vertical axis.
    pub ny: usize,
}

/// A patch of data tagged with its position in the tiling grid.
#[derive(Clone, PartialEq, Debug)]
pub struct Patch<T> {
    /// Horizontal grid coordinate, patch corner at `ix * stride`.
    pub ix: usize,
    /// Vertical grid coordinate, patch corner at `iy * stride`.
    pub iy: usize,
    /// Index of the key frame this patch group was cut from.
    pub key_frame: usize,
    /// The patch content.
    pub data: T,
}

impl PatchGrid {
    /// Compute the tiling grid of a `height x width` frame.
    ///
    /// Fails if the stride is zero, larger than the patch size,
    /// or if a single patch does not fit in the frame.
    pub fn new(height: usize, width: usize, patch_size: usize, stride: usize) -> Result<Self, String> {
        if stride == 0 {
            return Err("Tiling stride must be at least 1".to_string());
        }
        if stride > patch_size {
            return Err(format!(
                "Tiling stride ({}) must not exceed the patch size ({})",
                stride, patch_size
            ));
        }
        if patch_size > height || patch_size > width {
            return Err(format!(
                "A {0}x{0} patch does not fit in a {1}x{2} frame",
                patch_size, height, width
            ));
        }
        let overlap = patch_size - stride;
        Ok(Self {
            patch_size,
            stride,
            nx: (width - overlap) / stride,
            ny: (height - overlap) / stride,
        })
    }

    /// Total number of patches per key frame window.
    pub fn nb_patches(&self) -> usize {
        self.nx * self.ny
    }

    /// Height of the region covered by the grid, `(ny - 1) * S + P`.
    /// Bottom rows of the frame beyond this are not tiled.
    pub fn covered_height(&self) -> usize {
        (self.ny - 1) * self.stride + self.patch_size
    }

    /// Width of the region covered by the grid, `(nx - 1) * S + P`.
    pub fn covered_width(&self) -> usize {
        (self.nx - 1) * self.stride + self.patch_size
    }

    /// Overlap multiplicity of every covered pixel, i.e. the number of
    /// patches containing it. Derived by actually counting covering
    /// patches along each axis (the per-axis counts multiply), never from
    /// hard coded interior/border/corner bands.
    ///
    /// Every covered pixel belongs to at least one patch, so the field is
    /// at least 1 everywhere and safe to divide by.
    pub fn multiplicity(&self) -> Tensor2 {
        let cov_y = axis_coverage(self.ny, self.patch_size, self.stride);
        let cov_x = axis_coverage(self.nx, self.patch_size, self.stride);
        Tensor2::from_shape_fn((cov_y.len(), cov_x.len()), |(y, x)| {
            (cov_y[y] * cov_x[x]) as Float
        })
    }
}

/// Count, for every coordinate of one axis, how many patches cover it.
fn axis_coverage(nb_patches: usize, patch_size: usize, stride: usize) -> Vec<u32> {
    let len = (nb_patches - 1) * stride + patch_size;
    let mut coverage = vec![0; len];
    for i in 0..nb_patches {
        for y in i * stride..i * stride + patch_size {
            coverage[y] += 1;
        }
    }
    coverage
}

/// Key frame windows of a sequence: one window of `window_length`
/// consecutive frames per key frame index `0 ..= nb_frames - window_length`.
///
/// Returns an empty vector when the sequence is shorter than one window.
pub fn sliding_windows(nb_frames: usize, window_length: usize) -> Vec<std::ops::Range<usize>> {
    assert!(window_length >= 1, "Window length must be at least 1");
    if window_length > nb_frames {
        return Vec::new();
    }
    (0..=nb_frames - window_length)
        .map(|k| k..k + window_length)
        .collect()
}

/// Cut a `(frames, height, width)` sequence into its grid of patches,
/// in row major order, each tagged with its grid coordinates.
pub fn tile_sequence<A: Copy>(
    seq: ArrayView3<A>,
    grid: &PatchGrid,
    key_frame: usize,
) -> Vec<Patch<Array3<A>>> {
    let stride = grid.stride;
    let patch = grid.patch_size;
    iproduct!(0..grid.ny, 0..grid.nx)
        .map(|(iy, ix)| {
            let (py, px) = (iy * stride, ix * stride);
            let data = seq
                .slice(ndarray::s![.., py..py + patch, px..px + patch])
                .to_owned();
            Patch {
                ix,
                iy,
                key_frame,
                data,
            }
        })
        .collect()
}

/// Cut the spatial axes of a `(frames, angular, height, width, channels)`
/// view sequence at one grid position.
pub fn view_patch<A: Copy>(
    views: ArrayView5<A>,
    grid: &PatchGrid,
    iy: usize,
    ix: usize,
) -> ndarray::Array5<A> {
    let (py, px) = (iy * grid.stride, ix * grid.stride);
    let patch = grid.patch_size;
    views
        .slice(ndarray::s![.., .., py..py + patch, px..px + patch, ..])
        .to_owned()
}

/// Recompose a full frame sequence from the `nx * ny` patches of one key
/// frame window. Patches are placed at the position their tags declare;
/// overlapping contributions are summed, then every pixel is divided by
/// its overlap multiplicity.
///
/// Panics if the number of patches does not match the grid or if a patch
/// has a shape inconsistent with the grid (programming errors).
pub fn stitch(patches: &[Patch<Tensor3>], grid: &PatchGrid) -> Tensor3 {
    assert_eq!(
        patches.len(),
        grid.nb_patches(),
        "Expected exactly one patch per grid position"
    );
    let (frames, ph, pw) = patches[0].data.dim();
    assert_eq!((ph, pw), (grid.patch_size, grid.patch_size));

    let mut accumulator = Tensor3::zeros((frames, grid.covered_height(), grid.covered_width()));
    for patch in patches.iter() {
        assert_eq!(patch.data.dim(), (frames, ph, pw));
        let (py, px) = (patch.iy * grid.stride, patch.ix * grid.stride);
        let mut region =
            accumulator.slice_mut(ndarray::s![.., py..py + ph, px..px + pw]);
        region += &patch.data;
    }

    let multiplicity = grid.multiplicity();
    for t in 0..frames {
        for y in 0..grid.covered_height() {
            for x in 0..grid.covered_width() {
                accumulator[(t, y, x)] /= multiplicity[(y, x)];
            }
        }
    }
    accumulator
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use quickcheck::TestResult;

    fn pseudo_sequence(frames: usize, height: usize, width: usize) -> Tensor3 {
        Tensor3::from_shape_fn((frames, height, width), |(t, y, x)| {
            (1 + t) as Float * (0.25 * y as Float - 0.5 * x as Float + 3.0)
        })
    }

    #[test]
    fn grid_coverage_sintel_dimensions() {
        let grid = PatchGrid::new(436, 1024, 32, 16).unwrap();
        assert_eq!(grid.ny, 26);
        assert_eq!(grid.nx, 63);
        assert_eq!(grid.nb_patches(), 1638);
        assert_eq!(grid.covered_height(), 432);
        assert_eq!(grid.covered_width(), 1024);
        let patches = tile_sequence(pseudo_sequence(5, 436, 1024).view(), &grid, 0);
        assert_eq!(patches.len(), 1638);
        assert!(patches.iter().all(|p| p.data.dim() == (5, 32, 32)));
    }

    #[test]
    fn patches_are_row_major() {
        let grid = PatchGrid::new(32, 48, 16, 8).unwrap();
        let patches = tile_sequence(pseudo_sequence(1, 32, 48).view(), &grid, 0);
        // y outer, x inner.
        assert_eq!((patches[0].iy, patches[0].ix), (0, 0));
        assert_eq!((patches[1].iy, patches[1].ix), (0, 1));
        assert_eq!((patches[grid.nx].iy, patches[grid.nx].ix), (1, 0));
    }

    #[test]
    fn sliding_window_count() {
        assert_eq!(sliding_windows(10, 5).len(), 6);
        assert_eq!(sliding_windows(10, 5)[0], 0..5);
        assert_eq!(sliding_windows(10, 5)[5], 5..10);
        assert_eq!(sliding_windows(3, 5).len(), 0);
        assert_eq!(sliding_windows(5, 5).len(), 1);
    }

    #[test]
    fn invalid_grids_are_rejected() {
        assert!(PatchGrid::new(64, 64, 32, 0).is_err());
        assert!(PatchGrid::new(64, 64, 32, 33).is_err());
        assert!(PatchGrid::new(16, 64, 32, 16).is_err());
    }

    #[quickcheck_macros::quickcheck]
    fn round_trip_at_half_overlap(ny: u8, nx: u8, half: u8) -> TestResult {
        // Frame sizes built so the grid covers them exactly at 50% overlap.
        let ny = 1 + (ny % 5) as usize;
        let nx = 1 + (nx % 5) as usize;
        let stride = 1 + (half % 6) as usize;
        let patch = 2 * stride;
        let height = (ny - 1) * stride + patch;
        let width = (nx - 1) * stride + patch;
        let grid = match PatchGrid::new(height, width, patch, stride) {
            Ok(grid) => grid,
            Err(_) => return TestResult::discard(),
        };
        if (grid.ny, grid.nx) != (ny, nx) {
            return TestResult::discard();
        }
        let seq = pseudo_sequence(2, height, width);
        let patches = tile_sequence(seq.view(), &grid, 0);
        let restored = stitch(&patches, &grid);
        let close = seq
            .iter()
            .zip(restored.iter())
            .all(|(a, b)| (a - b).abs() <= 1e-4 * a.abs().max(1.0));
        TestResult::from_bool(close)
    }

    #[quickcheck_macros::quickcheck]
    fn multiplicity_matches_brute_force(ny: u8, nx: u8, patch: u8, stride: u8) -> TestResult {
        // Arbitrary (P, S) pairs, not only the 50% overlap case.
        let ny = 1 + (ny % 4) as usize;
        let nx = 1 + (nx % 4) as usize;
        let patch = 2 + (patch % 7) as usize;
        let stride = 1 + (stride as usize % patch);
        let height = (ny - 1) * stride + patch;
        let width = (nx - 1) * stride + patch;
        let grid = match PatchGrid::new(height, width, patch, stride) {
            Ok(grid) => grid,
            Err(_) => return TestResult::discard(),
        };
        if (grid.ny, grid.nx) != (ny, nx) {
            return TestResult::discard();
        }
        // Brute force: accumulate a patch of ones at every grid position.
        let mut counts = Tensor2::zeros((height, width));
        for iy in 0..ny {
            for ix in 0..nx {
                for y in iy * stride..iy * stride + patch {
                    for x in ix * stride..ix * stride + patch {
                        counts[(y, x)] += 1.0;
                    }
                }
            }
        }
        TestResult::from_bool(grid.multiplicity() == counts)
    }

    #[test]
    fn half_overlap_multiplicity_has_classic_bands() {
        let grid = PatchGrid::new(48, 64, 16, 8).unwrap();
        let mult = grid.multiplicity();
        // Corners covered once, edge strips twice, interior four times.
        assert_eq!(mult[(0, 0)], 1.0);
        assert_eq!(mult[(0, 20)], 2.0);
        assert_eq!(mult[(20, 0)], 2.0);
        assert_eq!(mult[(20, 20)], 4.0);
        assert_eq!(mult[(47, 63)], 1.0);
    }

    #[test]
    fn stitch_places_by_tag_not_by_order() {
        let grid = PatchGrid::new(24, 24, 16, 8).unwrap();
        let seq = pseudo_sequence(1, 24, 24);
        let mut patches = tile_sequence(seq.view(), &grid, 0);
        patches.reverse();
        let restored = stitch(&patches, &grid);
        let close = seq
            .iter()
            .zip(restored.iter())
            .all(|(a, b)| (a - b).abs() <= 1e-4);
        assert!(close);
    }
}
