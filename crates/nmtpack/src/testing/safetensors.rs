//! Safetensors writer for fixtures.

use std::fs;
use std::io;
use std::path::Path;

use indexmap::IndexMap;
use serde_json::{json, Value};

struct PendingTensor {
    name: String,
    dtype: &'static str,
    shape: Vec<usize>,
    bytes: Vec<u8>,
}

/// Builds a safetensors file tensor by tensor.
///
/// Tensors are written in the order they are added, and the header lists them
/// in that same order.
#[derive(Default)]
pub struct SafetensorsBuilder {
    tensors: Vec<PendingTensor>,
    metadata: IndexMap<String, String>,
}

impl SafetensorsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, name: &str, dtype: &'static str, shape: Vec<usize>, bytes: Vec<u8>) -> Self {
        self.tensors.push(PendingTensor {
            name: name.to_string(),
            dtype,
            shape,
            bytes,
        });
        self
    }

    /// Adds an F32 tensor.
    pub fn f32(self, name: &str, shape: Vec<usize>, values: &[f32]) -> Self {
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.push(name, "F32", shape, bytes)
    }

    /// Adds an F16 tensor, rounding each value.
    pub fn f16(self, name: &str, shape: Vec<usize>, values: &[f32]) -> Self {
        let bytes = values
            .iter()
            .flat_map(|&v| half::f16::from_f32(v).to_le_bytes())
            .collect();
        self.push(name, "F16", shape, bytes)
    }

    /// Adds a BF16 tensor, rounding each value.
    pub fn bf16(self, name: &str, shape: Vec<usize>, values: &[f32]) -> Self {
        let bytes = values
            .iter()
            .flat_map(|&v| half::bf16::from_f32(v).to_le_bytes())
            .collect();
        self.push(name, "BF16", shape, bytes)
    }

    /// Adds an I64 tensor.
    pub fn i64(self, name: &str, shape: Vec<usize>, values: &[i64]) -> Self {
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.push(name, "I64", shape, bytes)
    }

    /// Adds a tensor of any header dtype from its little-endian bytes.
    pub fn raw(self, name: &str, dtype: &'static str, shape: Vec<usize>, bytes: Vec<u8>) -> Self {
        self.push(name, dtype, shape, bytes)
    }

    /// Sets a `__metadata__` entry.
    pub fn metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Serializes the file into memory.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut header: IndexMap<String, Value> = IndexMap::new();
        if !self.metadata.is_empty() {
            header.insert("__metadata__".to_string(), json!(self.metadata));
        }

        let mut offset = 0usize;
        for t in &self.tensors {
            let end = offset + t.bytes.len();
            header.insert(
                t.name.clone(),
                json!({
                    "dtype": t.dtype,
                    "shape": t.shape,
                    "data_offsets": [offset, end],
                }),
            );
            offset = end;
        }

        // Serialized straight from the IndexMap so the key order survives.
        let mut header_bytes = serde_json::to_vec(&header).map_err(io::Error::other)?;
        while header_bytes.len() % 8 != 0 {
            header_bytes.push(b' ');
        }

        let mut out = Vec::with_capacity(8 + header_bytes.len() + offset);
        out.extend_from_slice(&(header_bytes.len() as u64).to_le_bytes());
        out.extend_from_slice(&header_bytes);
        for t in &self.tensors {
            out.extend_from_slice(&t.bytes);
        }
        Ok(out)
    }

    /// Writes the file to `path`.
    pub fn write(&self, path: impl AsRef<Path>) -> io::Result<()> {
        fs::write(path, self.to_bytes()?)
    }
}
