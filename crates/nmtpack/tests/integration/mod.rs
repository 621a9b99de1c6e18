//! Integration tests for checkpoint conversion.
//!
//! These tests write small checkpoints to disk, convert them through the
//! public API, and decode the resulting artifact byte by byte.

mod config_defaults;
mod full_conversion;
mod optimizer_export;

use std::path::Path;

/// Size of the flag and integer regions.
pub const HEADER_BYTES: usize = 10 + 19 * 4;

/// An artifact split into its fixed header and the remaining bytes.
pub struct Artifact {
    pub flags: Vec<u8>,
    pub ints: Vec<i32>,
    pub body: Vec<u8>,
}

pub fn read_artifact(path: &Path) -> Artifact {
    let bytes = std::fs::read(path).unwrap();
    assert!(bytes.len() >= HEADER_BYTES, "artifact shorter than its header");
    let ints = bytes[10..HEADER_BYTES]
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Artifact {
        flags: bytes[..10].to_vec(),
        ints,
        body: bytes[HEADER_BYTES..].to_vec(),
    }
}

pub fn f32s(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub fn f16s(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|c| half::f16::from_le_bytes([c[0], c[1]]).to_f32())
        .collect()
}

/// Options that keep test output quiet.
pub fn quiet_options(input: &Path, output: &Path) -> nmtpack::ConvertOptions {
    nmtpack::ConvertOptions {
        show_progress: false,
        ..nmtpack::ConvertOptions::new(input, output)
    }
}
