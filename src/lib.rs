// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Light Field Depth Rust (lfd)
//!
//! Estimation of per-pixel disparity maps from light-field video sequences
//! with a learned spatio-temporal model.
//!
//! The `core` module holds the interesting parts: the patch tiling and
//! stitching protocol, the spatio-temporal convolutional recurrent cell with
//! its refine sub-network, and the network assembly around them.
//! The other modules provide the dataset, evaluation and persistence
//! plumbing needed to run the model on real scenes.

pub mod core;
pub mod dataset;
pub mod eval;
pub mod math;
pub mod misc;
pub mod runtime;
pub mod weights;
