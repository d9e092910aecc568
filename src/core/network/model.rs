// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The two depth estimation model variants: a static per-frame baseline
//! and the spatio-temporal recurrent network.
//!
//! Both share the same trunk (two angular branches and the fusion head)
//! and differ only in the estimation head.

use ndarray::ArrayView5;
use rand::Rng;
use rayon::prelude::*;
use std::path::Path;

use crate::core::batch_norm::BatchNorm;
use crate::core::network::branch::{AngularBranch, Conv3dLayer};
use crate::core::network::fusion::{concat_channels, Conv2dLayer, FusionHead};
use crate::core::recurrent::cell::{CellConfig, SpatioTemporalCell};
use crate::core::recurrent::refine::RefineNet;
use crate::core::recurrent::sequence;
use crate::math::initializer::Initializer;
use crate::misc::type_aliases::{Float, Tensor3, Tensor4, Tensor5};
use crate::weights::TensorStore;

/// Which estimation head sits on top of the shared trunk.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Variant {
    /// Static per-frame linear projection, no recurrence.
    Baseline,
    /// Spatio-temporal recurrent cell unrolled over the sequence.
    SpatioTemporal,
}

impl Variant {
    /// Infer the variant from a weight blob path, following the naming
    /// convention of the training outputs. An unrecognized name is a
    /// configuration error.
    pub fn from_weights_path<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let name = path
            .as_ref()
            .to_string_lossy()
            .to_lowercase();
        if name.contains("baseline") {
            Ok(Variant::Baseline)
        } else if name.contains("clstm") {
            Ok(Variant::SpatioTemporal)
        } else {
            Err(format!(
                "Cannot infer the model variant from the weights path: {}",
                path.as_ref().display()
            ))
        }
    }
}

/// Structural configuration of a depth model, resolved at build time.
#[derive(Clone, PartialEq, Debug)]
pub struct ModelConfig {
    /// Temporal window length of one training example.
    pub frame_length: usize,
    /// Number of angular views per direction.
    pub angular_views: usize,
    /// Channels of one view image.
    pub view_channels: usize,
    /// Filter counts of the angular branch stack.
    pub branch_filters: Vec<usize>,
    /// Filter counts of the fusion head stack.
    pub fusion_filters: Vec<usize>,
    /// Hidden filter count of the recurrent cell.
    pub cell_filters: usize,
}

impl ModelConfig {
    /// The configuration used on the Sintel light field dataset.
    pub fn sintel(frame_length: usize) -> Self {
        Self {
            frame_length,
            angular_views: 9,
            view_channels: 3,
            branch_filters: vec![32, 64, 64, 64],
            fusion_filters: vec![64, 32, 32, 16],
            cell_filters: 8,
        }
    }

    /// Check the configuration. Errors here are fatal, never defaulted.
    pub fn validate(&self) -> Result<(), String> {
        if self.frame_length < 3 || self.frame_length > 5 {
            return Err(format!(
                "frame_length must be an integer between 3 and 5, but received {}",
                self.frame_length
            ));
        }
        if self.cell_filters == 0 {
            return Err("cell_filters must be at least 1".to_string());
        }
        Ok(())
    }
}

/// The estimation head of a model.
#[derive(Clone, Debug)]
pub enum Head {
    /// Linear 3x3 projection to one channel, applied per frame.
    Static(Conv2dLayer),
    /// Recurrent cell unrolled over the frame sequence.
    Recurrent(SpatioTemporalCell),
}

/// A complete depth estimation model.
///
/// The two angular branches each own one weight set, applied to every
/// frame of their view sequence; weight sharing across frames is simply
/// the repeated call with the same borrowed weights.
#[derive(Clone, Debug)]
pub struct DepthModel {
    /// Structural configuration the model was built with.
    pub config: ModelConfig,
    /// Branch over the horizontal angular views.
    pub branch_h: AngularBranch,
    /// Branch over the vertical angular views.
    pub branch_v: AngularBranch,
    /// Fusion of the concatenated branch features.
    pub fusion: FusionHead,
    /// Estimation head.
    pub head: Head,
}

impl DepthModel {
    /// Build a freshly initialized model.
    pub fn build<R: Rng>(config: ModelConfig, variant: Variant, rng: &mut R) -> Result<Self, String> {
        config.validate()?;
        let glorot = Initializer::GlorotUniform;
        let branch_h = AngularBranch::build(
            config.angular_views,
            config.view_channels,
            &config.branch_filters,
            glorot,
            rng,
        )?;
        let branch_v = AngularBranch::build(
            config.angular_views,
            config.view_channels,
            &config.branch_filters,
            glorot,
            rng,
        )?;
        let fusion = FusionHead::build(
            2 * branch_h.out_channels(),
            &config.fusion_filters,
            glorot,
            rng,
        )?;
        let head = match variant {
            Variant::Baseline => {
                Head::Static(Conv2dLayer::build(3, fusion.out_channels(), 1, glorot, rng))
            }
            Variant::SpatioTemporal => {
                let cell_config = CellConfig::new(config.cell_filters, fusion.out_channels());
                Head::Recurrent(cell_config.build(rng)?)
            }
        };
        Ok(Self {
            config,
            branch_h,
            branch_v,
            fusion,
            head,
        })
    }

    /// Variant of this model.
    pub fn variant(&self) -> Variant {
        match self.head {
            Head::Static(_) => Variant::Baseline,
            Head::Recurrent(_) => Variant::SpatioTemporal,
        }
    }

    /// Predict the disparity sequence of one sample.
    ///
    /// Both view tensors are `(frames, angular, height, width, channels)`
    /// with values normalized to [0, 1]; the result is `(frames, height, width)`
    /// in disparity units.
    pub fn predict(&self, views_h: ArrayView5<Float>, views_v: ArrayView5<Float>) -> Tensor3 {
        let (frames, _, height, width, _) = views_h.dim();
        assert_eq!(views_h.dim(), views_v.dim(), "View sequence shapes disagree");

        // Shared trunk, one frame at a time with the same weight sets.
        let mut features = Tensor4::zeros((frames, height, width, self.fusion.out_channels()));
        for t in 0..frames {
            let fh = self.branch_h.forward(views_h.slice(ndarray::s![t, .., .., .., ..]));
            let fv = self.branch_v.forward(views_v.slice(ndarray::s![t, .., .., .., ..]));
            let fused = concat_channels(fh.view(), fv.view());
            features
                .slice_mut(ndarray::s![t, .., .., ..])
                .assign(&self.fusion.forward(fused.view()));
        }

        // Estimation head, then squeeze the channel axis.
        let mut disparity = Tensor3::zeros((frames, height, width));
        match &self.head {
            Head::Static(layer) => {
                for t in 0..frames {
                    let out = layer.forward(features.slice(ndarray::s![t, .., .., ..]));
                    disparity
                        .slice_mut(ndarray::s![t, .., ..])
                        .assign(&out.slice(ndarray::s![.., .., 0]));
                }
            }
            Head::Recurrent(cell) => {
                let outputs = sequence::unroll(cell, features.view(), None);
                disparity.assign(&outputs.slice(ndarray::s![.., .., .., 0]));
            }
        }
        disparity
    }

    /// Predict a batch of mutually independent samples in parallel.
    /// Weights are only read, so the samples can be evaluated concurrently
    /// without coordination.
    pub fn predict_batch(&self, samples: &[(Tensor5, Tensor5)]) -> Vec<Tensor3> {
        samples
            .par_iter()
            .map(|(views_h, views_v)| self.predict(views_h.view(), views_v.view()))
            .collect()
    }

    // Persistence ############################################################

    /// Collect every learned tensor into a named store.
    pub fn to_store(&self) -> TensorStore {
        let mut store = TensorStore::new();
        store_branch(&mut store, "branch_h", &self.branch_h);
        store_branch(&mut store, "branch_v", &self.branch_v);
        for (i, layer) in self.fusion.layers.iter().enumerate() {
            store.insert(&format!("fusion/conv{}/kernel", i), &layer.kernel);
            store.insert(&format!("fusion/conv{}/bias", i), &layer.bias);
        }
        match &self.head {
            Head::Static(layer) => {
                store.insert("head/conv/kernel", &layer.kernel);
                store.insert("head/conv/bias", &layer.bias);
            }
            Head::Recurrent(cell) => {
                store.insert("cell/kernel", &cell.kernel);
                store.insert("cell/recurrent_kernel", &cell.recurrent_kernel);
                if let Some(bias) = &cell.bias {
                    store.insert("cell/bias", bias);
                }
                store_refine(&mut store, &cell.refine);
            }
        }
        store
    }

    /// Rebuild a model of the given configuration and variant from a
    /// store. Missing tensors and shape mismatches are fatal.
    pub fn from_store(
        store: &TensorStore,
        config: ModelConfig,
        variant: Variant,
    ) -> Result<Self, String> {
        config.validate()?;
        let branch_h = load_branch(store, "branch_h", &config)?;
        let branch_v = load_branch(store, "branch_v", &config)?;

        let mut fusion_layers = Vec::with_capacity(config.fusion_filters.len());
        let mut cin = 2 * branch_h.out_channels();
        for (i, &cout) in config.fusion_filters.iter().enumerate() {
            fusion_layers.push(Conv2dLayer {
                kernel: store.tensor4(&format!("fusion/conv{}/kernel", i), (3, 3, cin, cout))?,
                bias: store.tensor1(&format!("fusion/conv{}/bias", i), cout)?,
            });
            cin = cout;
        }
        let fusion = FusionHead {
            layers: fusion_layers,
        };
        let fusion_out = fusion.out_channels();

        let head = match variant {
            Variant::Baseline => Head::Static(Conv2dLayer {
                kernel: store.tensor4("head/conv/kernel", (3, 3, fusion_out, 1))?,
                bias: store.tensor1("head/conv/bias", 1)?,
            }),
            Variant::SpatioTemporal => {
                let filters = config.cell_filters;
                let gate_channels = 3 * filters + fusion_out;
                let bias = if store.contains("cell/bias") {
                    Some(store.tensor1("cell/bias", gate_channels)?)
                } else {
                    None
                };
                let cell_template = CellConfig::new(filters, fusion_out);
                Head::Recurrent(SpatioTemporalCell {
                    filters,
                    input_channels: fusion_out,
                    padding: cell_template.padding,
                    activation: cell_template.activation,
                    recurrent_activation: cell_template.recurrent_activation,
                    kernel: store.tensor4("cell/kernel", (3, 3, fusion_out, gate_channels))?,
                    recurrent_kernel: store
                        .tensor4("cell/recurrent_kernel", (3, 3, filters, gate_channels))?,
                    bias,
                    refine: load_refine(store, fusion_out + filters, filters)?,
                })
            }
        };

        Ok(Self {
            config,
            branch_h,
            branch_v,
            fusion,
            head,
        })
    }

    /// Save the model weights to a blob file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), String> {
        self.to_store().save(path)
    }

    /// Load a model of the given configuration from a blob file,
    /// inferring the variant from the file name.
    pub fn load<P: AsRef<Path>>(path: P, config: ModelConfig) -> Result<Self, String> {
        let variant = Variant::from_weights_path(&path)?;
        let store = TensorStore::load(&path)?;
        Self::from_store(&store, config, variant)
    }
}

// Persistence helpers #########################################################

fn store_branch(store: &mut TensorStore, prefix: &str, branch: &AngularBranch) {
    for (i, layer) in branch.layers.iter().enumerate() {
        store.insert(&format!("{}/conv{}/kernel", prefix, i), &layer.kernel);
        store.insert(&format!("{}/conv{}/bias", prefix, i), &layer.bias);
    }
}

fn load_branch(
    store: &TensorStore,
    prefix: &str,
    config: &ModelConfig,
) -> Result<AngularBranch, String> {
    let mut layers = Vec::with_capacity(config.branch_filters.len());
    let mut cin = config.view_channels;
    for (i, &cout) in config.branch_filters.iter().enumerate() {
        layers.push(Conv3dLayer {
            kernel: store.tensor5(&format!("{}/conv{}/kernel", prefix, i), (3, 3, 3, cin, cout))?,
            bias: store.tensor1(&format!("{}/conv{}/bias", prefix, i), cout)?,
        });
        cin = cout;
    }
    Ok(AngularBranch {
        layers,
        spatial_pad: config.branch_filters.len(),
    })
}

fn store_refine(store: &mut TensorStore, refine: &RefineNet) {
    store.insert("cell/refine/conv1/kernel", &refine.conv1);
    store.insert("cell/refine/conv2/kernel", &refine.conv2);
    store_batch_norm(store, "cell/refine/bn1", &refine.bn1);
    store_batch_norm(store, "cell/refine/bn2", &refine.bn2);
    store.insert("cell/refine/hidden/kernel", &refine.hidden_kernel);
    store.insert("cell/refine/hidden/bias", &refine.hidden_bias);
    store.insert("cell/refine/disparity/kernel", &refine.disparity_kernel);
    store.insert("cell/refine/disparity/bias", &refine.disparity_bias);
}

fn load_refine(
    store: &TensorStore,
    input_channels: usize,
    hidden_channels: usize,
) -> Result<RefineNet, String> {
    let c = input_channels;
    Ok(RefineNet {
        conv1: store.tensor4("cell/refine/conv1/kernel", (5, 5, c, c))?,
        bn1: load_batch_norm(store, "cell/refine/bn1", c)?,
        conv2: store.tensor4("cell/refine/conv2/kernel", (5, 5, c, c))?,
        bn2: load_batch_norm(store, "cell/refine/bn2", c)?,
        hidden_kernel: store.tensor4("cell/refine/hidden/kernel", (3, 3, c, hidden_channels))?,
        hidden_bias: store.tensor1("cell/refine/hidden/bias", hidden_channels)?,
        disparity_kernel: store.tensor4("cell/refine/disparity/kernel", (5, 5, c, 1))?,
        disparity_bias: store.tensor1("cell/refine/disparity/bias", 1)?,
    })
}

fn store_batch_norm(store: &mut TensorStore, prefix: &str, bn: &BatchNorm) {
    store.insert(&format!("{}/gamma", prefix), &bn.gamma);
    store.insert(&format!("{}/beta", prefix), &bn.beta);
    store.insert(&format!("{}/mean", prefix), &bn.mean);
    store.insert(&format!("{}/variance", prefix), &bn.variance);
}

fn load_batch_norm(store: &TensorStore, prefix: &str, channels: usize) -> Result<BatchNorm, String> {
    Ok(BatchNorm {
        gamma: store.tensor1(&format!("{}/gamma", prefix), channels)?,
        beta: store.tensor1(&format!("{}/beta", prefix), channels)?,
        mean: store.tensor1(&format!("{}/mean", prefix), channels)?,
        variance: store.tensor1(&format!("{}/variance", prefix), channels)?,
        epsilon: 1e-3,
    })
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn tiny_config() -> ModelConfig {
        ModelConfig {
            frame_length: 3,
            angular_views: 5,
            view_channels: 1,
            branch_filters: vec![4, 6],
            fusion_filters: vec![6, 4],
            cell_filters: 2,
        }
    }

    fn tiny_views(frames: usize) -> Tensor5 {
        Tensor5::from_shape_fn((frames, 5, 8, 8, 1), |(t, a, y, x, _)| {
            0.01 * (t * 7 + a * 3 + y + x) as Float
        })
    }

    #[test]
    fn variant_from_path() {
        assert_eq!(
            Variant::from_weights_path("output/baseline_fl5/weights.lfdw").unwrap(),
            Variant::Baseline
        );
        assert_eq!(
            Variant::from_weights_path("output/STCLSTM_fl5/weights.lfdw").unwrap(),
            Variant::SpatioTemporal
        );
        assert!(Variant::from_weights_path("output/mystery/weights.lfdw").is_err());
    }

    #[test]
    fn frame_length_is_validated() {
        let mut config = tiny_config();
        config.frame_length = 7;
        let mut rng = StdRng::seed_from_u64(0);
        assert!(DepthModel::build(config, Variant::Baseline, &mut rng).is_err());
    }

    #[test]
    fn baseline_prediction_shape() {
        let mut rng = StdRng::seed_from_u64(1);
        let model = DepthModel::build(tiny_config(), Variant::Baseline, &mut rng).unwrap();
        let views = tiny_views(3);
        let disparity = model.predict(views.view(), views.view());
        assert_eq!(disparity.dim(), (3, 8, 8));
    }

    #[test]
    fn recurrent_prediction_shape() {
        let mut rng = StdRng::seed_from_u64(2);
        let model = DepthModel::build(tiny_config(), Variant::SpatioTemporal, &mut rng).unwrap();
        let views = tiny_views(3);
        let disparity = model.predict(views.view(), views.view());
        assert_eq!(disparity.dim(), (3, 8, 8));
    }

    #[test]
    fn batch_prediction_matches_sequential() {
        let mut rng = StdRng::seed_from_u64(3);
        let model = DepthModel::build(tiny_config(), Variant::SpatioTemporal, &mut rng).unwrap();
        let a = tiny_views(3);
        let b = tiny_views(3).mapv(|v| 1.0 - v);
        let samples = vec![(a.clone(), a.clone()), (b.clone(), b.clone())];
        let batch = model.predict_batch(&samples);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], model.predict(a.view(), a.view()));
        assert_eq!(batch[1], model.predict(b.view(), b.view()));
    }

    #[test]
    fn store_round_trip_recurrent() {
        let mut rng = StdRng::seed_from_u64(4);
        let model = DepthModel::build(tiny_config(), Variant::SpatioTemporal, &mut rng).unwrap();
        let store = model.to_store();
        let restored = DepthModel::from_store(&store, tiny_config(), Variant::SpatioTemporal).unwrap();
        let views = tiny_views(3);
        assert_eq!(
            model.predict(views.view(), views.view()),
            restored.predict(views.view(), views.view())
        );
    }

    #[test]
    fn store_round_trip_baseline() {
        let mut rng = StdRng::seed_from_u64(5);
        let model = DepthModel::build(tiny_config(), Variant::Baseline, &mut rng).unwrap();
        let store = model.to_store();
        let restored = DepthModel::from_store(&store, tiny_config(), Variant::Baseline).unwrap();
        let views = tiny_views(3);
        assert_eq!(
            model.predict(views.view(), views.view()),
            restored.predict(views.view(), views.view())
        );
    }

    #[test]
    fn missing_tensor_is_a_load_error() {
        let store = TensorStore::new();
        let result = DepthModel::from_store(&store, tiny_config(), Variant::Baseline);
        assert!(result.unwrap_err().contains("Unknown weight tensor name"));
    }
}
