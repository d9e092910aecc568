// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Weight initialization schemes.
//!
//! Every learned tensor of the network names its initializer explicitly in
//! the configuration of the component owning it. The set of recognized
//! schemes is closed; resolution happens at construction time.

use nalgebra::DMatrix;
use rand::distributions::{StandardNormal, Uniform};
use rand::Rng;

use crate::misc::type_aliases::{Float, Tensor1, Tensor4, Tensor5};

/// A recognized weight initialization scheme.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Initializer {
    /// All zeros. Conventional for biases.
    Zeros,
    /// All ones. Conventional for the forget gate bias slice.
    Ones,
    /// Uniform draws in `[-l, l]` with `l = sqrt(6 / (fan_in + fan_out))`.
    GlorotUniform,
    /// Orthogonal columns obtained from the QR decomposition of a random
    /// Gaussian matrix. Conventional for recurrent kernels.
    Orthogonal,
}

impl Initializer {
    /// Generate a flat vector of `len` values.
    ///
    /// `fan` is the `(fan_in, fan_out)` pair of the tensor being filled,
    /// needed by the scaled schemes.
    pub fn generate<R: Rng>(self, rng: &mut R, len: usize, fan: (usize, usize)) -> Vec<Float> {
        match self {
            Initializer::Zeros => vec![0.0; len],
            Initializer::Ones => vec![1.0; len],
            Initializer::GlorotUniform => {
                let (fan_in, fan_out) = fan;
                let limit = (6.0 / (fan_in + fan_out) as Float).sqrt();
                let dist = Uniform::new(-limit, limit);
                (0..len).map(|_| rng.sample(dist)).collect()
            }
            Initializer::Orthogonal => {
                let (fan_in, fan_out) = fan;
                assert_eq!(len, fan_in * fan_out);
                let q = orthogonal_matrix(rng, fan_in, fan_out);
                // Row major flattening matches the (.., fan_out) kernel layout.
                (0..fan_in)
                    .flat_map(|i| (0..fan_out).map(move |j| (i, j)))
                    .map(|(i, j)| q[(i, j)])
                    .collect()
            }
        }
    }

    /// Generate a bias vector of `len` values.
    pub fn vector<R: Rng>(self, rng: &mut R, len: usize) -> Tensor1 {
        Tensor1::from(self.generate(rng, len, (len, len)))
    }

    /// Generate a 2D convolution kernel of shape `(kh, kw, cin, cout)`.
    pub fn conv2d_kernel<R: Rng>(self, rng: &mut R, shape: (usize, usize, usize, usize)) -> Tensor4 {
        let (kh, kw, cin, cout) = shape;
        let data = self.generate(rng, kh * kw * cin * cout, conv_fan(self, kh * kw, cin, cout));
        Tensor4::from_shape_vec(shape, data).expect("Kernel data has inconsistent length")
    }

    /// Generate a 3D convolution kernel of shape `(kd, kh, kw, cin, cout)`.
    pub fn conv3d_kernel<R: Rng>(
        self,
        rng: &mut R,
        shape: (usize, usize, usize, usize, usize),
    ) -> Tensor5 {
        let (kd, kh, kw, cin, cout) = shape;
        let area = kd * kh * kw;
        let data = self.generate(rng, area * cin * cout, conv_fan(self, area, cin, cout));
        Tensor5::from_shape_vec(shape, data).expect("Kernel data has inconsistent length")
    }
}

/// Fan pair of a convolution kernel, per initializer convention.
///
/// Scaled uniform schemes weight both fans by the receptive field area.
/// The orthogonal scheme flattens the kernel to a
/// `(area * cin, cout)` matrix, so its fans must multiply to the
/// element count.
fn conv_fan(scheme: Initializer, area: usize, cin: usize, cout: usize) -> (usize, usize) {
    match scheme {
        Initializer::Orthogonal => (area * cin, cout),
        _ => (area * cin, area * cout),
    }
}

/// Build a `rows x cols` matrix with orthonormal columns (or rows if
/// `rows < cols`) from the QR decomposition of a Gaussian random matrix.
///
/// The sign of each column is fixed by the diagonal of R so that the
/// distribution is uniform over the orthogonal group.
fn orthogonal_matrix<R: Rng>(rng: &mut R, rows: usize, cols: usize) -> DMatrix<Float> {
    let (nr, nc) = (rows.max(cols), rows.min(cols));
    let gaussian = DMatrix::from_fn(nr, nc, |_, _| {
        let x: f64 = rng.sample(StandardNormal);
        x as Float
    });
    let qr = gaussian.qr();
    let r = qr.r();
    let mut q = qr.q();
    for j in 0..nc {
        if r[(j, j)] < 0.0 {
            for i in 0..nr {
                q[(i, j)] = -q[(i, j)];
            }
        }
    }
    if rows < cols {
        q.transpose()
    } else {
        q
    }
}

// TESTS #############################################################
