//! Run summary and the human-readable sidecar.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};

use nmtpack_core::{Error, Precision, Result};

use crate::checkpoint::ParameterMap;

const RULE_WIDTH: usize = 75;

/// Outcome of one conversion.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionReport {
    pub output: PathBuf,
    pub precision: Precision,
    /// Layout entries in the parameter region.
    pub entries: usize,
    /// Values in the parameter region.
    pub parameter_values: usize,
    /// One-element parameters that were dropped.
    pub skipped: Vec<String>,
    /// Shared embeddings that were not written.
    pub omitted: Vec<String>,
    pub optimizer_appended: bool,
    pub optimizer_step: Option<i32>,
    /// Artifact size.
    pub bytes_written: u64,
    pub info_path: Option<PathBuf>,
    pub elapsed_secs: f64,
}

/// `<output>.info.txt`.
pub fn info_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(".info.txt");
    PathBuf::from(name)
}

/// Writes every original parameter with its shape, then the training
/// settings record.
pub fn write_info(
    path: &Path,
    params: &ParameterMap,
    record: Option<&Map<String, Value>>,
) -> Result<()> {
    let file = File::create(path)
        .map_err(|e| Error::io(format!("failed to create {}: {}", path.display(), e)))?;
    let mut out = BufWriter::new(file);
    render_info(&mut out, params, record)?;
    out.flush()?;
    Ok(())
}

fn render_info(
    out: &mut impl Write,
    params: &ParameterMap,
    record: Option<&Map<String, Value>>,
) -> Result<()> {
    let rule = "*".repeat(RULE_WIDTH);

    writeln!(out, "{}", rule)?;
    writeln!(out, "Parameters & Shapes:")?;
    for (name, tensor) in params.iter() {
        writeln!(out, "{}:\t\t{:?}", name, tensor.shape())?;
    }

    writeln!(out, "{}", rule)?;
    writeln!(out, "Training settings:")?;
    for (key, value) in record.into_iter().flatten() {
        match value {
            Value::String(s) => writeln!(out, "{}:\t\t{}", key, s)?,
            other => writeln!(out, "{}:\t\t{}", key, other)?,
        }
    }
    Ok(())
}
