// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

extern crate light_field_depth_rs as lfd;

use std::{env, error::Error, fs, path::PathBuf};

use lfd::core::tiling::PatchGrid;
use lfd::dataset::{patches, sintel_lf};

/// Patch size of the training examples.
const PATCH_SIZE: usize = 32;
/// Stride between patches, 50% overlap.
const STRIDE: usize = 16;

fn main() {
    let args: Vec<String> = env::args().collect();
    if let Err(error) = my_run(&args) {
        eprintln!("{:?}", error);
    }
}

const USAGE: &str = "Usage: ./lfd_dataset scenes_dir output_dir [frame_length]";

fn my_run(args: &[String]) -> Result<(), Box<dyn Error>> {
    // Check that the arguments are correct.
    let valid_args = check_args(args)?;

    // Cut every scene into patch records.
    let mut scene_names = Vec::new();
    for scene_dir in list_scene_dirs(&valid_args.scenes_dir)? {
        let scene_name = scene_dir
            .file_name()
            .expect("Scene directory has no name")
            .to_string_lossy()
            .to_string();
        let seq = sintel_lf::read_scene(&scene_dir)?;
        let (_, height, width) = seq.disparity.dim();
        let grid = PatchGrid::new(height, width, PATCH_SIZE, STRIDE)?;
        let nb_records = patches::write_scene_patches(
            valid_args.output_dir.join(&scene_name),
            &scene_name,
            &seq,
            valid_args.frame_length,
            &grid,
        )?;
        println!("done: {} ({} records)", scene_name, nb_records);
        scene_names.push(scene_name);
    }

    // Write the scene list next to the records.
    let list_path = valid_args.output_dir.join("scene_list.txt");
    fs::write(&list_path, scene_names.join("\n") + "\n")?;
    println!("scene list: {}", list_path.display());

    Ok(())
}

struct Args {
    scenes_dir: PathBuf,
    output_dir: PathBuf,
    frame_length: usize,
}

/// Verify that command line arguments are correct.
fn check_args(args: &[String]) -> Result<Args, String> {
    let (scenes_dir_str, output_dir_str, frame_length) = match args {
        [_, scenes, output] => (scenes, output, 5),
        [_, scenes, output, frame_length_str] => {
            let frame_length = frame_length_str
                .parse()
                .map_err(|_| format!("Invalid frame length: {}", frame_length_str))?;
            (scenes, output, frame_length)
        }
        _ => {
            eprintln!("{}", USAGE);
            return Err("Wrong number of arguments".to_string());
        }
    };
    if frame_length < 3 || frame_length > 5 {
        return Err(format!(
            "frame_length must be an integer between 3 and 5, but received {}",
            frame_length
        ));
    }
    let scenes_dir = PathBuf::from(scenes_dir_str);
    if !scenes_dir.is_dir() {
        eprintln!("{}", USAGE);
        return Err(format!(
            "The scenes directory does not exist or is not reachable: {}",
            scenes_dir_str
        ));
    }
    Ok(Args {
        scenes_dir,
        output_dir: PathBuf::from(output_dir_str),
        frame_length,
    })
}

/// Sorted sub-directories of the dataset root, one per scene.
fn list_scene_dirs(scenes_dir: &PathBuf) -> Result<Vec<PathBuf>, Box<dyn Error>> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(scenes_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}
