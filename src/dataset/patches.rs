// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Patch training records and their binary serialization.
//!
//! One record holds the views and ground truth of one patch of one key
//! frame window. Records are numbered so that reading a scene directory
//! in file name order yields whole key frame groups in row major patch
//! order, exactly as the stitcher expects them.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use itertools::iproduct;
use ndarray::Array5;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::core::tiling::{self, PatchGrid};
use crate::dataset::sintel_lf::SceneSequence;
use crate::misc::type_aliases::{Float, Tensor3, Tensor5};

const MAGIC: &[u8; 4] = b"LFDP";
const VERSION: u32 = 1;

/// Extension of the patch record files.
pub const PATCH_EXTENSION: &str = "lfp";

/// One patch training example.
#[derive(Clone, PartialEq, Debug)]
pub struct PatchSample {
    /// Name of the source scene.
    pub scene: String,
    /// Key frame index of the temporal window.
    pub key_frame: usize,
    /// Vertical grid coordinate.
    pub iy: usize,
    /// Horizontal grid coordinate.
    pub ix: usize,
    /// Horizontal views, `(frames, angular, patch, patch, channels)`, raw `u8`.
    pub views_h: Array5<u8>,
    /// Vertical views, same shape.
    pub views_v: Array5<u8>,
    /// Ground truth disparity, `(frames, patch, patch)`.
    pub disparity: Tensor3,
}

impl PatchSample {
    /// Views normalized to [0, 1], the model input convention.
    pub fn normalized_views(&self) -> (Tensor5, Tensor5) {
        (normalize_views(&self.views_h), normalize_views(&self.views_v))
    }

    /// Serialize the record to a file.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), String> {
        let file = File::create(path).map_err(|e| e.to_string())?;
        let mut writer = BufWriter::new(file);
        let io_err = |e: std::io::Error| e.to_string();

        writer.write_all(MAGIC).map_err(io_err)?;
        writer.write_u32::<LittleEndian>(VERSION).map_err(io_err)?;
        writer
            .write_u32::<LittleEndian>(self.scene.len() as u32)
            .map_err(io_err)?;
        writer.write_all(self.scene.as_bytes()).map_err(io_err)?;
        for &tag in [self.key_frame, self.iy, self.ix].iter() {
            writer.write_u32::<LittleEndian>(tag as u32).map_err(io_err)?;
        }
        let (frames, angular, patch, _, channels) = self.views_h.dim();
        assert_eq!(self.views_v.dim(), self.views_h.dim());
        assert_eq!(self.disparity.dim(), (frames, patch, patch));
        for &dim in [frames, angular, patch, channels].iter() {
            writer.write_u32::<LittleEndian>(dim as u32).map_err(io_err)?;
        }
        for &value in self.views_h.iter().chain(self.views_v.iter()) {
            writer.write_u8(value).map_err(io_err)?;
        }
        for &value in self.disparity.iter() {
            writer.write_f32::<LittleEndian>(value).map_err(io_err)?;
        }
        Ok(())
    }

    /// Deserialize a record from a file.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let file = File::open(&path).map_err(|e| e.to_string())?;
        let mut reader = BufReader::new(file);
        let io_err = |e: std::io::Error| e.to_string();

        let mut magic = [0_u8; 4];
        reader.read_exact(&mut magic).map_err(io_err)?;
        if &magic != MAGIC {
            return Err(format!(
                "Not a patch record (bad magic): {}",
                path.as_ref().display()
            ));
        }
        let version = reader.read_u32::<LittleEndian>().map_err(io_err)?;
        if version != VERSION {
            return Err(format!("Unsupported patch record version: {}", version));
        }
        let scene_len = reader.read_u32::<LittleEndian>().map_err(io_err)? as usize;
        let mut scene_bytes = vec![0; scene_len];
        reader.read_exact(&mut scene_bytes).map_err(io_err)?;
        let scene = String::from_utf8(scene_bytes).map_err(|e| e.to_string())?;
        let key_frame = reader.read_u32::<LittleEndian>().map_err(io_err)? as usize;
        let iy = reader.read_u32::<LittleEndian>().map_err(io_err)? as usize;
        let ix = reader.read_u32::<LittleEndian>().map_err(io_err)? as usize;
        let frames = reader.read_u32::<LittleEndian>().map_err(io_err)? as usize;
        let angular = reader.read_u32::<LittleEndian>().map_err(io_err)? as usize;
        let patch = reader.read_u32::<LittleEndian>().map_err(io_err)? as usize;
        let channels = reader.read_u32::<LittleEndian>().map_err(io_err)? as usize;

        let view_len = frames * angular * patch * patch * channels;
        let mut views = vec![0_u8; 2 * view_len];
        reader.read_exact(&mut views).map_err(io_err)?;
        let views_v_raw = views.split_off(view_len);
        let shape = (frames, angular, patch, patch, channels);
        let views_h = Array5::from_shape_vec(shape, views).map_err(|e| e.to_string())?;
        let views_v = Array5::from_shape_vec(shape, views_v_raw).map_err(|e| e.to_string())?;

        let mut disparity_raw = vec![0.0; frames * patch * patch];
        reader
            .read_f32_into::<LittleEndian>(&mut disparity_raw)
            .map_err(io_err)?;
        let disparity = Tensor3::from_shape_vec((frames, patch, patch), disparity_raw)
            .map_err(|e| e.to_string())?;

        Ok(Self {
            scene,
            key_frame,
            iy,
            ix,
            views_h,
            views_v,
            disparity,
        })
    }
}

/// Normalize raw `u8` views to [0, 1] floats.
pub fn normalize_views(views: &Array5<u8>) -> Tensor5 {
    views.mapv(|v| Float::from(v) / 255.0)
}

/// Cut a scene into patch records and write them under `save_dir`,
/// one file per patch, numbered so that file name order is
/// (key frame, iy, ix) row major order. Returns the number of records.
pub fn write_scene_patches<P: AsRef<Path>>(
    save_dir: P,
    scene: &str,
    seq: &SceneSequence,
    window_length: usize,
    grid: &PatchGrid,
) -> Result<usize, String> {
    let save_dir = save_dir.as_ref();
    fs::create_dir_all(save_dir).map_err(|e| e.to_string())?;

    let windows = tiling::sliding_windows(seq.nb_frames(), window_length);
    let mut nb_records = 0;
    for (key_frame, window) in windows.into_iter().enumerate() {
        let views_h = seq
            .views_h
            .slice(ndarray::s![window.clone(), .., .., .., ..]);
        let views_v = seq
            .views_v
            .slice(ndarray::s![window.clone(), .., .., .., ..]);
        let disparity = seq.disparity.slice(ndarray::s![window.clone(), .., ..]);

        for (iy, ix) in iproduct!(0..grid.ny, 0..grid.nx) {
            let (py, px) = (iy * grid.stride, ix * grid.stride);
            let patch = grid.patch_size;
            let sample = PatchSample {
                scene: scene.to_string(),
                key_frame,
                iy,
                ix,
                views_h: tiling::view_patch(views_h, grid, iy, ix),
                views_v: tiling::view_patch(views_v, grid, iy, ix),
                disparity: disparity
                    .slice(ndarray::s![.., py..py + patch, px..px + patch])
                    .to_owned(),
            };
            let numbering = grid.nb_patches() * key_frame + iy * grid.nx + ix;
            sample.write(save_dir.join(format!("{:05}.{}", numbering, PATCH_EXTENSION)))?;
            nb_records += 1;
        }
    }
    Ok(nb_records)
}

/// Sorted paths of the patch records of one scene directory.
pub fn scene_patch_paths<P: AsRef<Path>>(scene_dir: P) -> Result<Vec<PathBuf>, String> {
    let entries = fs::read_dir(&scene_dir)
        .map_err(|e| format!("Cannot read {}: {}", scene_dir.as_ref().display(), e))?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .map(|ext| ext == PATCH_EXTENSION)
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    Ok(paths)
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use crate::misc::type_aliases::Float;

    fn small_sample() -> PatchSample {
        let shape = (2, 3, 4, 4, 1);
        PatchSample {
            scene: "alley_1".to_string(),
            key_frame: 7,
            iy: 2,
            ix: 5,
            views_h: Array5::from_shape_fn(shape, |(t, a, y, x, _)| (t + a + y + x) as u8),
            views_v: Array5::from_shape_fn(shape, |(t, a, y, x, _)| (2 * t + a + y + x) as u8),
            disparity: Tensor3::from_shape_fn((2, 4, 4), |(t, y, x)| {
                0.5 * t as Float + 0.25 * (y + x) as Float
            }),
        }
    }

    #[test]
    fn record_round_trip() {
        let sample = small_sample();
        let mut path = std::env::temp_dir();
        path.push(format!("lfd_test_{}_record.lfp", std::process::id()));
        sample.write(&path).unwrap();
        let restored = PatchSample::read(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(restored, sample);
    }

    #[test]
    fn normalization_is_in_unit_range() {
        let sample = small_sample();
        let (views_h, views_v) = sample.normalized_views();
        assert!(views_h.iter().chain(views_v.iter()).all(|&v| v >= 0.0 && v <= 1.0));
        assert_eq!(views_h[(0, 0, 1, 1, 0)], 2.0 / 255.0);
    }

    #[test]
    fn bad_magic_is_an_error() {
        let mut path = std::env::temp_dir();
        path.push(format!("lfd_test_{}_bad.lfp", std::process::id()));
        std::fs::write(&path, b"nope").unwrap();
        let result = PatchSample::read(&path);
        std::fs::remove_file(&path).ok();
        assert!(result.is_err());
    }
}
