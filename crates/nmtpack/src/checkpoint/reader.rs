//! Memory-mapped safetensors reader.
//!
//! Keeps the tensor entries in the order the JSON header lists them. That
//! order is the checkpoint's parameter order and everything downstream
//! depends on it, so entries are never sorted.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use memmap2::Mmap;
use serde::Deserialize;

use nmtpack_core::{element_count, Error, Result};

/// Header key holding free-form string metadata.
const METADATA_KEY: &str = "__metadata__";

/// Data type in safetensors format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    /// 32-bit float.
    F32,
    /// 16-bit float.
    F16,
    /// BFloat16.
    BF16,
    /// 8-bit signed integer.
    I8,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
    /// Boolean.
    Bool,
    /// Unknown type.
    Unknown,
}

impl DType {
    /// Returns the size of one element in bytes.
    #[must_use]
    pub fn element_size(&self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F16 | DType::BF16 => 2,
            DType::I8 | DType::Bool => 1,
            DType::I64 => 8,
            DType::Unknown => 1,
        }
    }

    /// Parses dtype from its header spelling.
    pub fn from_str(s: &str) -> Self {
        match s {
            "F32" => DType::F32,
            "F16" => DType::F16,
            "BF16" => DType::BF16,
            "I8" => DType::I8,
            "I32" => DType::I32,
            "I64" => DType::I64,
            "BOOL" => DType::Bool,
            _ => DType::Unknown,
        }
    }

    /// Returns true for the floating-point types.
    #[must_use]
    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32 | DType::F16 | DType::BF16)
    }

    /// Returns true for every type [`SafetensorsReader::tensor_f32`] can widen.
    #[must_use]
    pub fn is_known(&self) -> bool {
        !matches!(self, DType::Unknown)
    }
}

/// Metadata for a single tensor in the file.
#[derive(Debug, Clone)]
pub struct TensorEntry {
    /// Tensor name.
    pub name: String,
    /// Data type.
    pub dtype: DType,
    /// Tensor shape.
    pub shape: Vec<usize>,
    /// Offset in data section (relative to data start).
    pub offset: usize,
    /// Size in bytes.
    pub size: usize,
}

impl TensorEntry {
    /// Returns the number of elements.
    #[must_use]
    pub fn num_elements(&self) -> usize {
        element_count(&self.shape)
    }
}

/// Raw tensor info from the JSON header.
#[derive(Debug, Deserialize)]
struct RawTensorInfo {
    dtype: String,
    shape: Vec<usize>,
    data_offsets: (usize, usize),
}

/// Memory-mapped safetensors reader.
pub struct SafetensorsReader {
    /// Path to the file.
    path: PathBuf,
    /// Memory-mapped file.
    mmap: Mmap,
    /// Tensor metadata in header order.
    tensors: Vec<TensorEntry>,
    /// Name to index lookup.
    name_index: HashMap<String, usize>,
    /// String metadata from the header.
    metadata: HashMap<String, String>,
    /// Offset where data section starts.
    data_offset: usize,
}

impl SafetensorsReader {
    /// Opens a safetensors file with memory-mapping.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let file = File::open(path)
            .map_err(|e| Error::io(format!("failed to open {}: {}", path.display(), e)))?;

        let file_len = file
            .metadata()
            .map_err(|e| Error::io(format!("failed to stat {}: {}", path.display(), e)))?
            .len();
        if file_len < 8 {
            return Err(Error::malformed(format!(
                "{} is too small for a safetensors header",
                path.display()
            )));
        }

        // SAFETY: the map is read-only and lives as long as the reader.
        let mmap = unsafe {
            Mmap::map(&file)
                .map_err(|e| Error::io(format!("failed to mmap {}: {}", path.display(), e)))?
        };

        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&mmap[0..8]);
        let header_len = u64::from_le_bytes(len_bytes) as usize;
        let header_end = header_len
            .checked_add(8)
            .filter(|&end| end <= mmap.len())
            .ok_or_else(|| Error::malformed("file truncated before header end"))?;

        let header_json = std::str::from_utf8(&mmap[8..header_end])
            .map_err(|e| Error::malformed_with("invalid UTF-8 in header", e))?;

        // IndexMap keeps the document order of the header object.
        let raw: IndexMap<String, serde_json::Value> = serde_json::from_str(header_json)
            .map_err(|e| Error::malformed_with("invalid JSON header", e))?;

        let data_len = mmap.len() - header_end;
        let mut tensors = Vec::with_capacity(raw.len());
        let mut metadata = HashMap::new();

        for (name, value) in raw {
            if name == METADATA_KEY {
                metadata = serde_json::from_value(value)
                    .map_err(|e| Error::malformed_with("metadata must map strings to strings", e))?;
                continue;
            }

            let info: RawTensorInfo = serde_json::from_value(value).map_err(|e| {
                Error::malformed_with(format!("invalid header entry for '{}'", name), e)
            })?;
            let (start, end) = info.data_offsets;
            if end < start || end > data_len {
                return Err(Error::malformed(format!(
                    "tensor '{}' has offsets {}..{} outside the {} byte data section",
                    name, start, end, data_len
                )));
            }

            let entry = TensorEntry {
                name,
                dtype: DType::from_str(&info.dtype),
                shape: info.shape,
                offset: start,
                size: end - start,
            };
            if entry.dtype != DType::Unknown
                && entry.num_elements() * entry.dtype.element_size() != entry.size
            {
                return Err(Error::malformed(format!(
                    "tensor '{}' declares shape {:?} but stores {} bytes",
                    entry.name, entry.shape, entry.size
                )));
            }
            tensors.push(entry);
        }

        let name_index: HashMap<String, usize> = tensors
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();
        if name_index.len() != tensors.len() {
            return Err(Error::malformed("duplicate tensor names in header"));
        }

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            tensors,
            name_index,
            metadata,
            data_offset: header_end,
        })
    }

    /// Returns the path to this file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of tensors in this file.
    #[must_use]
    pub fn tensor_count(&self) -> usize {
        self.tensors.len()
    }

    /// Returns tensor entries in header order.
    pub fn tensors(&self) -> impl Iterator<Item = &TensorEntry> {
        self.tensors.iter()
    }

    /// Gets a tensor entry by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TensorEntry> {
        self.name_index.get(name).map(|&i| &self.tensors[i])
    }

    /// Returns the string metadata stored under `__metadata__`.
    #[must_use]
    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Gets raw tensor data as a byte slice (zero-copy).
    pub fn tensor_bytes(&self, name: &str) -> Result<&[u8]> {
        let entry = self
            .get(name)
            .ok_or_else(|| Error::malformed(format!("tensor '{}' not found", name)))?;

        let start = self.data_offset + entry.offset;
        Ok(&self.mmap[start..start + entry.size])
    }

    /// Converts tensor bytes to f32 values.
    ///
    /// Floats are widened exactly. Integer and boolean buffers (version
    /// counters and the like) are cast, which may round integers past 2^24.
    pub fn tensor_f32(&self, name: &str) -> Result<Vec<f32>> {
        let entry = self
            .get(name)
            .ok_or_else(|| Error::malformed(format!("tensor '{}' not found", name)))?;
        let bytes = self.tensor_bytes(name)?;

        match entry.dtype {
            DType::F32 => Ok(bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()),
            DType::F16 => Ok(bytes
                .chunks_exact(2)
                .map(|c| half::f16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect()),
            DType::BF16 => Ok(bytes
                .chunks_exact(2)
                .map(|c| half::bf16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect()),
            DType::I64 => Ok(bytes
                .chunks_exact(8)
                .map(|c| {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(c);
                    i64::from_le_bytes(raw) as f32
                })
                .collect()),
            DType::I32 => Ok(bytes
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32)
                .collect()),
            DType::I8 => Ok(bytes.iter().map(|&b| f32::from(b as i8)).collect()),
            DType::Bool => Ok(bytes.iter().map(|&b| f32::from(u8::from(b != 0))).collect()),
            DType::Unknown => Err(Error::malformed(format!(
                "unsupported dtype {:?} for tensor '{}'",
                entry.dtype, name
            ))),
        }
    }

    /// Reads a one-element tensor as an integer.
    ///
    /// Float values are truncated toward zero. Used for counters such as the
    /// optimizer step, which checkpoints store in whatever type was handy.
    pub fn tensor_scalar_i64(&self, name: &str) -> Result<i64> {
        let entry = self
            .get(name)
            .ok_or_else(|| Error::malformed(format!("tensor '{}' not found", name)))?;
        if entry.num_elements() != 1 {
            return Err(Error::malformed(format!(
                "tensor '{}' should hold one value, has shape {:?}",
                name, entry.shape
            )));
        }
        let b = self.tensor_bytes(name)?;

        match entry.dtype {
            DType::I64 => Ok(i64::from_le_bytes([
                b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
            ])),
            DType::I32 => Ok(i64::from(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))),
            DType::I8 => Ok(i64::from(b[0] as i8)),
            DType::F32 | DType::F16 | DType::BF16 => {
                let values = self.tensor_f32(name)?;
                Ok(values[0] as i64)
            }
            _ => Err(Error::malformed(format!(
                "unsupported dtype {:?} for scalar '{}'",
                entry.dtype, name
            ))),
        }
    }

    /// Returns total number of elements across all tensors.
    #[must_use]
    pub fn total_elements(&self) -> usize {
        self.tensors.iter().map(|t| t.num_elements()).sum()
    }
}
