// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

extern crate light_field_depth_rs as lfd;
extern crate rayon;

use rayon::prelude::*;
use std::{env, error::Error, fs, path::Path, path::PathBuf};

use lfd::core::network::model::{DepthModel, ModelConfig};
use lfd::core::tiling::{self, Patch, PatchGrid};
use lfd::dataset::patches::PatchSample;
use lfd::dataset::{patches, sintel_lf};
use lfd::eval::{Metrics, MetricsReport};
use lfd::misc::type_aliases::Tensor3;
use lfd::misc::{helper, interop};
use lfd::runtime;
use lfd::weights;

/// Patch size of the stored records.
const PATCH_SIZE: usize = 32;
/// Stride between patches, 50% overlap.
const STRIDE: usize = 16;

fn main() {
    let args: Vec<String> = env::args().collect();
    if let Err(error) = my_run(&args) {
        eprintln!("{:?}", error);
    }
}

const USAGE: &str = "Usage: ./lfd_evaluate model_weights_path data_dir scene_list_file [frame_length]";

fn my_run(args: &[String]) -> Result<(), Box<dyn Error>> {
    // Check that the arguments are correct.
    let valid_args = check_args(args)?;

    // One process-wide initialization of the compute pool.
    runtime::initialize(&runtime::Config::default())?;

    // Load the model; the variant is inferred from the weights file name.
    let config = ModelConfig::sintel(valid_args.frame_length);
    let store = weights::TensorStore::load(&valid_args.weights_path)?;
    let variant = lfd::core::network::model::Variant::from_weights_path(&valid_args.weights_path)?;
    let model = DepthModel::from_store(&store, config, variant)?;
    println!(
        "loaded {:?} model from {}",
        variant,
        valid_args.weights_path.display()
    );

    // Output locations next to the weights.
    let save_dir = valid_args
        .weights_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("evaluated");
    fs::create_dir_all(&save_dir)?;
    let mut report = MetricsReport::create(save_dir.join("metrics.csv"))?;

    let grid = PatchGrid::new(
        sintel_lf::FRAME_HEIGHT,
        sintel_lf::FRAME_WIDTH,
        PATCH_SIZE,
        STRIDE,
    )?;

    // Evaluate every scene of the list, one key frame group at a time.
    let scenes = read_scene_list(&valid_args.scene_list_path)?;
    for scene in scenes.iter() {
        let paths = patches::scene_patch_paths(valid_args.data_dir.join(scene))?;
        if paths.len() % grid.nb_patches() != 0 {
            return Err(format!(
                "Scene {} has {} records, not a multiple of the {} patches per group",
                scene,
                paths.len(),
                grid.nb_patches()
            )
            .into());
        }
        for group in paths.chunks(grid.nb_patches()) {
            let (key_frame, prediction, truth) = evaluate_group(&model, group, &grid)?;
            let metrics = Metrics::compute(&prediction, &truth);
            report.append(scene, key_frame, &metrics)?;
            save_prediction(&save_dir, scene, key_frame, &prediction)?;
            println!(
                "{} key frame {:03}: mre {:.4}, rmse {:.4}, badpix07 {:.2}%",
                scene, key_frame, metrics.mre, metrics.rmse, metrics.badpix_7
            );
        }
    }

    Ok(())
}

/// Predict every patch of one key frame group (in parallel) and stitch
/// prediction and ground truth to full frames.
fn evaluate_group(
    model: &DepthModel,
    group: &[PathBuf],
    grid: &PatchGrid,
) -> Result<(usize, Tensor3, Tensor3), String> {
    let results: Vec<(usize, usize, usize, Tensor3, Tensor3)> = group
        .par_iter()
        .map(|path| {
            let record = PatchSample::read(path)?;
            let (views_h, views_v) = record.normalized_views();
            let prediction = model.predict(views_h.view(), views_v.view());
            Ok((
                record.key_frame,
                record.iy,
                record.ix,
                prediction,
                record.disparity,
            ))
        })
        .collect::<Result<Vec<_>, String>>()?;

    let key_frame = results[0].0;
    let mut predicted_patches = Vec::with_capacity(results.len());
    let mut truth_patches = Vec::with_capacity(results.len());
    for (record_key, iy, ix, prediction, truth) in results.into_iter() {
        if record_key != key_frame {
            return Err(format!(
                "Patch group mixes key frames {} and {}",
                key_frame, record_key
            ));
        }
        predicted_patches.push(Patch {
            ix,
            iy,
            key_frame,
            data: prediction,
        });
        truth_patches.push(Patch {
            ix,
            iy,
            key_frame,
            data: truth,
        });
    }

    let prediction = tiling::stitch(&predicted_patches, grid);
    let truth = tiling::stitch(&truth_patches, grid);
    Ok((key_frame, prediction, truth))
}

/// Save the last frame of the reconstructed window as a 16 bits png.
fn save_prediction(
    save_dir: &Path,
    scene: &str,
    key_frame: usize,
    prediction: &Tensor3,
) -> Result<(), Box<dyn Error>> {
    let (frames, _, _) = prediction.dim();
    let last = prediction.slice(ndarray::s![frames - 1, .., ..]).to_owned();
    let (width, height, raw) = interop::raw_from_disparity(&last, sintel_lf::DISPARITY_SCALE);
    let path = save_dir.join(format!("{}_{:03}.png", scene, key_frame));
    helper::write_png_16bits(&path, width, height, &raw)?;
    Ok(())
}

struct Args {
    weights_path: PathBuf,
    data_dir: PathBuf,
    scene_list_path: PathBuf,
    frame_length: usize,
}

/// Verify that command line arguments are correct.
fn check_args(args: &[String]) -> Result<Args, String> {
    let (weights_str, data_str, list_str, frame_length) = match args {
        [_, weights, data, list] => (weights, data, list, 5),
        [_, weights, data, list, frame_length_str] => {
            let frame_length = frame_length_str
                .parse()
                .map_err(|_| format!("Invalid frame length: {}", frame_length_str))?;
            (weights, data, list, frame_length)
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
    let scene_list_path = PathBuf::from(list_str);
    if !scene_list_path.is_file() {
        eprintln!("{}", USAGE);
        return Err(format!(
            "The scene list file does not exist or is not reachable: {}",
            list_str
        ));
    }
    Ok(Args {
        weights_path,
        data_dir: PathBuf::from(data_str),
        scene_list_path,
        frame_length,
    })
}

/// Open a scene list file and parse it into scene names.
fn read_scene_list<P: AsRef<Path>>(path: P) -> Result<Vec<String>, Box<dyn Error>> {
    let content = fs::read_to_string(path)?;
    sintel_lf::parse::scene_list(&content).map_err(|s| s.into())
}
