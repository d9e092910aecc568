// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

extern crate light_field_depth_rs as lfd;

use std::{env, error::Error, fs, path::PathBuf};

use lfd::core::network::model::{DepthModel, ModelConfig};
use lfd::core::tiling::{self, PatchGrid};
use lfd::dataset::sintel_lf;
use lfd::eval;
use lfd::misc::{helper, interop};
use lfd::runtime;

/// Patch size used for tiled inference.
const PATCH_SIZE: usize = 32;
/// Stride between patches, 50% overlap.
const STRIDE: usize = 16;

fn main() {
    let args: Vec<String> = env::args().collect();
    if let Err(error) = my_run(&args) {
        eprintln!("{:?}", error);
    }
}

const USAGE: &str = "Usage: ./lfd_infer model_weights_path scene_dir output_dir [frame_length]";

fn my_run(args: &[String]) -> Result<(), Box<dyn Error>> {
    // Check that the arguments are correct.
    let valid_args = check_args(args)?;

    // One process-wide initialization of the compute pool.
    runtime::initialize(&runtime::Config::default())?;

    // Load model and scene.
    let config = ModelConfig::sintel(valid_args.frame_length);
    let model = DepthModel::load(&valid_args.weights_path, config)?;
    let seq = sintel_lf::read_scene(&valid_args.scene_dir)?;
    let (_, height, width) = seq.disparity.dim();
    let grid = PatchGrid::new(height, width, PATCH_SIZE, STRIDE)?;
    fs::create_dir_all(&valid_args.output_dir)?;

    // Predict every key frame window by tiling and stitching.
    for (key_frame, window) in tiling::sliding_windows(seq.nb_frames(), valid_args.frame_length)
        .into_iter()
        .enumerate()
    {
        let views_h = seq.views_h.slice(ndarray::s![window.clone(), .., .., .., ..]);
        let views_v = seq.views_v.slice(ndarray::s![window.clone(), .., .., .., ..]);
        let prediction = eval::predict_window(&model, views_h, views_v, &grid);

        for (t, frame) in window.enumerate() {
            let map = prediction.slice(ndarray::s![t, .., ..]).to_owned();
            let (w, h, raw) = interop::raw_from_disparity(&map, sintel_lf::DISPARITY_SCALE);
            let path = valid_args
                .output_dir
                .join(format!("key_{:03}_{}", key_frame, sintel_lf::frame_file_name(frame)));
            helper::write_png_16bits(&path, w, h, &raw)?;
        }
        println!("stitched key frame {:03}", key_frame);
    }

    Ok(())
}

struct Args {
    weights_path: PathBuf,
    scene_dir: PathBuf,
    output_dir: PathBuf,
    frame_length: usize,
}

/// Verify that command line arguments are correct.
fn check_args(args: &[String]) -> Result<Args, String> {
    let (weights_str, scene_str, output_str, frame_length) = match args {
        [_, weights, scene, output] => (weights, scene, output, 5),
        [_, weights, scene, output, frame_length_str] => {
            let frame_length = frame_length_str
                .parse()
                .map_err(|_| format!("Invalid frame length: {}", frame_length_str))?;
            (weights, scene, output, frame_length)
        }
        _ => {
            eprintln!("{}", USAGE);
            return Err("Wrong number of arguments".to_string());
        }
    };
    let weights_path = PathBuf::from(weights_str);
    if !weights_path.is_file() {
        eprintln!("{}", USAGE);
        return Err(format!(
            "The weights file does not exist or is not reachable: {}",
            weights_str
        ));
    }
    let scene_dir = PathBuf::from(scene_str);
    if !scene_dir.is_dir() {
        eprintln!("{}", USAGE);
        return Err(format!(
            "The scene directory does not exist or is not reachable: {}",
            scene_str
        ));
    }
    Ok(Args {
        weights_path,
        scene_dir,
        output_dir: PathBuf::from(output_str),
        frame_length,
    })
}
