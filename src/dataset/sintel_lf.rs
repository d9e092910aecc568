// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Helper functions to handle scenes of the Sintel light field video
//! dataset.
//!
//! A scene directory holds, per frame, 9 horizontal and 9 vertical angular
//! view images (8 bit RGB) and one disparity map (16 bit gray, scaled):
//!
//! ```text
//! scene/
//!   horizontal_00 .. horizontal_08 / frame_0000.png ...
//!   vertical_00   .. vertical_08   / frame_0000.png ...
//!   disparity                      / frame_0000.png ...
//! ```

use image;
use ndarray::Array5;
use std::fs;
use std::path::Path;

use crate::misc::helper;
use crate::misc::interop;
use crate::misc::type_aliases::{Float, Tensor3};

/// Frame height of the rendered dataset.
pub const FRAME_HEIGHT: usize = 436;
/// Frame width of the rendered dataset.
pub const FRAME_WIDTH: usize = 1024;
/// Number of angular views per direction.
pub const NB_ANGULAR_VIEWS: usize = 9;
/// Channels of one view image.
pub const VIEW_CHANNELS: usize = 3;

/// U16 disparity values are scaled for better precision.
/// So 256 in the 16 bits gray png corresponds to 1 pixel of disparity.
pub const DISPARITY_SCALE: Float = 256.0;

/// One scene loaded in memory: angular view sequences as raw `u8` and the
/// ground truth disparity sequence in disparity units.
pub struct SceneSequence {
    /// Horizontal views, `(frames, angular, height, width, channels)`.
    pub views_h: Array5<u8>,
    /// Vertical views, same shape.
    pub views_v: Array5<u8>,
    /// Ground truth disparity, `(frames, height, width)`.
    pub disparity: Tensor3,
}

impl SceneSequence {
    /// Number of frames in the scene.
    pub fn nb_frames(&self) -> usize {
        self.disparity.dim().0
    }
}

/// Load a whole scene directory.
///
/// Every frame must have the same dimensions as the first one;
/// anything else is a broken scene and reported as an error.
pub fn read_scene<P: AsRef<Path>>(scene_dir: P) -> Result<SceneSequence, String> {
    let scene_dir = scene_dir.as_ref();
    let nb_frames = count_frames(&scene_dir.join("disparity"))?;
    if nb_frames == 0 {
        return Err(format!("No disparity frame found in {}", scene_dir.display()));
    }

    // Probe the first disparity frame for the scene dimensions.
    let (width, height, _) = read_disparity_raw(scene_dir, 0)?;

    let mut views_h = Array5::zeros((nb_frames, NB_ANGULAR_VIEWS, height, width, VIEW_CHANNELS));
    let mut views_v = Array5::zeros((nb_frames, NB_ANGULAR_VIEWS, height, width, VIEW_CHANNELS));
    let mut disparity = Tensor3::zeros((nb_frames, height, width));

    for t in 0..nb_frames {
        let (w, h, raw) = read_disparity_raw(scene_dir, t)?;
        if (w, h) != (width, height) {
            return Err(format!(
                "Disparity frame {} is {}x{}, expected {}x{}",
                t, w, h, width, height
            ));
        }
        disparity
            .slice_mut(ndarray::s![t, .., ..])
            .assign(&interop::disparity_from_raw(w, h, &raw, DISPARITY_SCALE));

        for a in 0..NB_ANGULAR_VIEWS {
            let view_h = read_view(scene_dir, "horizontal", a, t)?;
            let view_v = read_view(scene_dir, "vertical", a, t)?;
            if view_h.dim() != (height, width, VIEW_CHANNELS)
                || view_v.dim() != (height, width, VIEW_CHANNELS)
            {
                return Err(format!(
                    "View images of frame {} do not match the disparity dimensions",
                    t
                ));
            }
            views_h.slice_mut(ndarray::s![t, a, .., .., ..]).assign(&view_h);
            views_v.slice_mut(ndarray::s![t, a, .., .., ..]).assign(&view_v);
        }
    }

    Ok(SceneSequence {
        views_h,
        views_v,
        disparity,
    })
}

/// File name of one frame inside its view or disparity directory.
pub fn frame_file_name(frame: usize) -> String {
    format!("frame_{:04}.png", frame)
}

fn count_frames(disparity_dir: &Path) -> Result<usize, String> {
    let entries = fs::read_dir(disparity_dir)
        .map_err(|e| format!("Cannot read {}: {}", disparity_dir.display(), e))?;
    Ok(entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with("frame_")
        })
        .count())
}

fn read_disparity_raw(
    scene_dir: &Path,
    frame: usize,
) -> Result<(usize, usize, Vec<u16>), String> {
    let path = scene_dir.join("disparity").join(frame_file_name(frame));
    let (width, height, raw) =
        helper::read_png_16bits(&path).map_err(|e| format!("{}: {:?}", path.display(), e))?;
    Ok((width, height, raw))
}

fn read_view(
    scene_dir: &Path,
    direction: &str,
    angular: usize,
    frame: usize,
) -> Result<ndarray::Array3<u8>, String> {
    let path = scene_dir
        .join(format!("{}_{:02}", direction, angular))
        .join(frame_file_name(frame));
    let img = image::open(&path)
        .map_err(|e| format!("{}: {}", path.display(), e))?
        .to_rgb();
    Ok(interop::tensor_from_rgb(img))
}

/// Parse scene list files (train/validation/test splits) holding one scene
/// name per line, with `#` comments.
pub mod parse {
    use nom::{alt, anychar, do_parse, is_not, many0, map, named, tag, types::CompleteStr};

    /// Parse a scene list file into a vector of scene names.
    pub fn scene_list(file_content: &str) -> Result<Vec<String>, String> {
        let mut scenes = Vec::new();
        for line in file_content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match scene_line(CompleteStr(line)) {
                Ok((_, Some(name))) => scenes.push(name),
                Ok(_) => (),
                Err(_) => return Err("Parsing error".to_string()),
            }
        }
        Ok(scenes)
    }

    // nom parsers #############################################################

    // A line is either a comment or a scene name.
    named!(scene_line<CompleteStr, Option<String> >,
        alt!( map!(comment, |_| None) | map!(scene_name, Some) )
    );

    // Parse a comment.
    named!(comment<CompleteStr, ()>,
        do_parse!( tag!("#") >> many0!(anychar) >> () )
    );

    // Parse a scene name.
    named!(scene_name<CompleteStr, String>,
        map!(is_not!(" \t\r\n"), |s| (*s).to_string())
    );
} // pub mod parse

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn scene_list_parsing() {
        let content = "# training split\nalley_1\nbamboo_2\n\nmarket_5\n";
        let scenes = parse::scene_list(content).unwrap();
        assert_eq!(scenes, vec!["alley_1", "bamboo_2", "market_5"]);
    }

    #[test]
    fn frame_file_names_are_zero_padded() {
        assert_eq!(frame_file_name(3), "frame_0003.png");
        assert_eq!(frame_file_name(42), "frame_0042.png");
    }
}
