// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Evaluation of reconstructed full frame disparity maps against ground
//! truth: metric reductions, CSV reporting and the tiled full frame
//! prediction pipeline.

use csv;
use itertools::iproduct;
use ndarray::ArrayView5;
use rayon::prelude::*;
use std::fs::File;
use std::path::Path;

use crate::core::network::model::DepthModel;
use crate::core::tiling::{self, Patch, PatchGrid};
use crate::dataset::patches;
use crate::misc::type_aliases::{Float, Tensor3};

/// The evaluation metrics of one reconstructed key frame window.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Metrics {
    /// Mean relative error.
    pub mre: Float,
    /// Mean squared error.
    pub mse: Float,
    /// Root mean squared error.
    pub rmse: Float,
    /// Mean absolute log10 error, non-finite rows excluded.
    pub log10: Float,
    /// Percentage of pixels off by more than 0.07.
    pub badpix_7: Float,
    /// Percentage of pixels off by more than 0.03.
    pub badpix_3: Float,
    /// Percentage of pixels off by more than 0.01.
    pub badpix_1: Float,
}

impl Metrics {
    /// Compute every metric of a prediction against the ground truth.
    pub fn compute(pred: &Tensor3, truth: &Tensor3) -> Self {
        Self {
            mre: mean_relative_error(pred, truth),
            mse: mean_squared_error(pred, truth),
            rmse: root_mean_squared_error(pred, truth),
            log10: mean_log10_error(pred, truth),
            badpix_7: bad_pixel_ratio(pred, truth, 0.07),
            badpix_3: bad_pixel_ratio(pred, truth, 0.03),
            badpix_1: bad_pixel_ratio(pred, truth, 0.01),
        }
    }
}

/// Mean of `|pred - truth| / truth`.
pub fn mean_relative_error(pred: &Tensor3, truth: &Tensor3) -> Float {
    assert_eq!(pred.dim(), truth.dim());
    let sum: Float = pred
        .iter()
        .zip(truth.iter())
        .map(|(p, t)| (p - t).abs() / t)
        .sum();
    sum / pred.len() as Float
}

/// Mean of `(pred - truth)^2`.
pub fn mean_squared_error(pred: &Tensor3, truth: &Tensor3) -> Float {
    assert_eq!(pred.dim(), truth.dim());
    let sum: Float = pred
        .iter()
        .zip(truth.iter())
        .map(|(p, t)| (p - t) * (p - t))
        .sum();
    sum / pred.len() as Float
}

/// Square root of the mean squared error.
pub fn root_mean_squared_error(pred: &Tensor3, truth: &Tensor3) -> Float {
    mean_squared_error(pred, truth).sqrt()
}

/// Mean of `|log10(pred) - log10(truth)|`.
///
/// The log is undefined wherever prediction or truth is non-positive;
/// such rows are excluded from the mean instead of poisoning it.
/// Returns NaN if no row is usable.
pub fn mean_log10_error(pred: &Tensor3, truth: &Tensor3) -> Float {
    assert_eq!(pred.dim(), truth.dim());
    let mut sum = 0.0;
    let mut count = 0;
    for (p, t) in pred.iter().zip(truth.iter()) {
        let diff = (p.log10() - t.log10()).abs();
        if diff.is_finite() {
            sum += diff;
            count += 1;
        }
    }
    if count == 0 {
        std::f32::NAN
    } else {
        sum / count as Float
    }
}

/// Percentage of pixels with an absolute error above `threshold`.
pub fn bad_pixel_ratio(pred: &Tensor3, truth: &Tensor3, threshold: Float) -> Float {
    assert_eq!(pred.dim(), truth.dim());
    let bad = pred
        .iter()
        .zip(truth.iter())
        .filter(|(p, t)| (*p - *t).abs() > threshold)
        .count();
    100.0 * bad as Float / pred.len() as Float
}

// Full frame prediction #######################################################

/// Predict the full resolution disparity of one key frame window by
/// tiling the raw views, predicting every patch (in parallel, patches are
/// mutually independent) and stitching the predictions back together.
///
/// `views_h` and `views_v` are the window's raw `u8` view sequences,
/// `(frames, angular, height, width, channels)`. The result covers the
/// tiled region of the frame, `(frames, covered_height, covered_width)`.
pub fn predict_window(
    model: &DepthModel,
    views_h: ArrayView5<u8>,
    views_v: ArrayView5<u8>,
    grid: &PatchGrid,
) -> Tensor3 {
    let positions: Vec<(usize, usize)> = iproduct!(0..grid.ny, 0..grid.nx).collect();
    let predictions: Vec<Patch<Tensor3>> = positions
        .par_iter()
        .map(|&(iy, ix)| {
            let patch_h = tiling::view_patch(views_h, grid, iy, ix);
            let patch_v = tiling::view_patch(views_v, grid, iy, ix);
            let data = model.predict(
                patches::normalize_views(&patch_h).view(),
                patches::normalize_views(&patch_v).view(),
            );
            Patch {
                ix,
                iy,
                key_frame: 0,
                data,
            }
        })
        .collect();
    tiling::stitch(&predictions, grid)
}

// CSV report ##################################################################

/// Append-only CSV report of per key frame metrics.
pub struct MetricsReport {
    writer: csv::Writer<File>,
}

impl MetricsReport {
    /// Create the report file and write the header row.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let mut writer = csv::Writer::from_path(path).map_err(|e| e.to_string())?;
        writer
            .write_record(&[
                "scene_name",
                "key_frame",
                "mre",
                "mse",
                "rmse",
                "log10",
                "Badpix7",
                "Badpix3",
                "Badpix1",
            ])
            .map_err(|e| e.to_string())?;
        Ok(Self { writer })
    }

    /// Append the metrics of one key frame window.
    pub fn append(&mut self, scene: &str, key_frame: usize, metrics: &Metrics) -> Result<(), String> {
        self.writer
            .write_record(&[
                scene.to_string(),
                key_frame.to_string(),
                metrics.mre.to_string(),
                metrics.mse.to_string(),
                metrics.rmse.to_string(),
                metrics.log10.to_string(),
                metrics.badpix_7.to_string(),
                metrics.badpix_3.to_string(),
                metrics.badpix_1.to_string(),
            ])
            .map_err(|e| e.to_string())?;
        self.writer.flush().map_err(|e| e.to_string())
    }
}

// TESTS #############################################################
