// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Persistence of trained weight sets as flat binary blobs.
//!
//! A blob is a sequence of named f32 tensors, little-endian, behind a
//! small magic header. Names and shapes are checked eagerly on restore:
//! an unknown or missing tensor name is a fatal configuration error.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::misc::type_aliases::{Float, Tensor1, Tensor4, Tensor5};

const MAGIC: &[u8; 4] = b"LFDW";
const VERSION: u32 = 1;

/// A named collection of shaped f32 tensors.
#[derive(Clone, Default, Debug)]
pub struct TensorStore {
    entries: BTreeMap<String, (Vec<usize>, Vec<Float>)>,
}

impl TensorStore {
    /// Empty store.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Number of stored tensors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the store holds no tensor.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of the stored tensors, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(|k| k.as_str()).collect()
    }

    /// Store a tensor under a name, replacing any previous one.
    /// Panics if the data length does not match the shape.
    pub fn insert<D>(&mut self, name: &str, array: &ndarray::Array<Float, D>)
    where
        D: ndarray::Dimension,
    {
        let shape = array.shape().to_vec();
        let data: Vec<Float> = array.iter().cloned().collect();
        assert_eq!(data.len(), shape.iter().product::<usize>());
        self.entries.insert(name.to_string(), (shape, data));
    }

    fn entry(&self, name: &str) -> Result<&(Vec<usize>, Vec<Float>), String> {
        self.entries
            .get(name)
            .ok_or_else(|| format!("Unknown weight tensor name: {}", name))
    }

    /// Retrieve a rank 1 tensor with the expected length.
    pub fn tensor1(&self, name: &str, len: usize) -> Result<Tensor1, String> {
        let (shape, data) = self.entry(name)?;
        check_shape(name, shape, &[len])?;
        Ok(Tensor1::from(data.clone()))
    }

    /// Retrieve a rank 4 tensor with the expected shape.
    pub fn tensor4(&self, name: &str, dims: (usize, usize, usize, usize)) -> Result<Tensor4, String> {
        let (shape, data) = self.entry(name)?;
        check_shape(name, shape, &[dims.0, dims.1, dims.2, dims.3])?;
        Tensor4::from_shape_vec(dims, data.clone()).map_err(|e| e.to_string())
    }

    /// Retrieve a rank 5 tensor with the expected shape.
    pub fn tensor5(
        &self,
        name: &str,
        dims: (usize, usize, usize, usize, usize),
    ) -> Result<Tensor5, String> {
        let (shape, data) = self.entry(name)?;
        check_shape(name, shape, &[dims.0, dims.1, dims.2, dims.3, dims.4])?;
        Tensor5::from_shape_vec(dims, data.clone()).map_err(|e| e.to_string())
    }

    /// True if a tensor of that name is stored.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Write the store to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), String> {
        let file = File::create(path).map_err(|e| e.to_string())?;
        let mut writer = BufWriter::new(file);
        let io_err = |e: std::io::Error| e.to_string();
        writer.write_all(MAGIC).map_err(io_err)?;
        writer.write_u32::<LittleEndian>(VERSION).map_err(io_err)?;
        writer
            .write_u32::<LittleEndian>(self.entries.len() as u32)
            .map_err(io_err)?;
        for (name, (shape, data)) in self.entries.iter() {
            writer
                .write_u32::<LittleEndian>(name.len() as u32)
                .map_err(io_err)?;
            writer.write_all(name.as_bytes()).map_err(io_err)?;
            writer
                .write_u32::<LittleEndian>(shape.len() as u32)
                .map_err(io_err)?;
            for &dim in shape.iter() {
                writer.write_u32::<LittleEndian>(dim as u32).map_err(io_err)?;
            }
            for &value in data.iter() {
                writer.write_f32::<LittleEndian>(value).map_err(io_err)?;
            }
        }
        Ok(())
    }

    /// Read a store back from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let file = File::open(&path).map_err(|e| e.to_string())?;
        let mut reader = BufReader::new(file);
        let io_err = |e: std::io::Error| e.to_string();

        let mut magic = [0_u8; 4];
        reader.read_exact(&mut magic).map_err(io_err)?;
        if &magic != MAGIC {
            return Err("Not a weight blob (bad magic)".to_string());
        }
        let version = reader.read_u32::<LittleEndian>().map_err(io_err)?;
        if version != VERSION {
            return Err(format!("Unsupported weight blob version: {}", version));
        }
        let count = reader.read_u32::<LittleEndian>().map_err(io_err)?;

        let mut store = Self::new();
        for _ in 0..count {
            let name_len = reader.read_u32::<LittleEndian>().map_err(io_err)? as usize;
            let mut name_bytes = vec![0; name_len];
            reader.read_exact(&mut name_bytes).map_err(io_err)?;
            let name = String::from_utf8(name_bytes).map_err(|e| e.to_string())?;
            let ndim = reader.read_u32::<LittleEndian>().map_err(io_err)? as usize;
            let mut shape = Vec::with_capacity(ndim);
            for _ in 0..ndim {
                shape.push(reader.read_u32::<LittleEndian>().map_err(io_err)? as usize);
            }
            let len = shape.iter().product::<usize>();
            let mut data = vec![0.0; len];
            reader.read_f32_into::<LittleEndian>(&mut data).map_err(io_err)?;
            store.entries.insert(name, (shape, data));
        }
        Ok(store)
    }
}

fn check_shape(name: &str, got: &[usize], expected: &[usize]) -> Result<(), String> {
    if got == expected {
        Ok(())
    } else {
        Err(format!(
            "Weight tensor {} has shape {:?}, expected {:?}",
            name, got, expected
        ))
    }
}

// TESTS #############################################################
