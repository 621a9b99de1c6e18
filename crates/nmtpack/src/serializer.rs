//! Artifact serialization.
//!
//! ```text
//! ┌──────────┬──────────────┬──────────────────┬──────────────────────────────┐
//! │ 10 × u8  │ 19 × i32 LE  │ values fp32/fp16 │ [i32 step][m1 fp32][m2 fp32] │
//! │ flags    │ config ints  │ in entry order   │ optional optimizer region    │
//! └──────────┴──────────────┴──────────────────┴──────────────────────────────┘
//! ```
//!
//! There are no length prefixes or checksums; readers rely on the order
//! alone. [`RegionWriter`] enforces that order with a small state machine.
//! [`ArtifactFile`] writes through a temporary sibling file that is renamed
//! into place only by [`ArtifactFile::commit`].

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use indicatif::ProgressBar;
use tracing::{debug, info, warn};

use nmtpack_core::{Error, Precision, Result};

use crate::config_vector::ConfigVector;
use crate::layout::LayoutPlan;
use crate::optimizer::OptimizerMomentRecord;

/// Values encoded per write call.
const CHUNK_VALUES: usize = 16 * 1024;

/// Buffer size for the artifact file.
const WRITE_BUFFER_SIZE: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Config,
    Parameters,
    Optimizer,
    Done,
}

impl Stage {
    fn name(self) -> &'static str {
        match self {
            Stage::Config => "config region",
            Stage::Parameters => "parameter region",
            Stage::Optimizer => "optimizer region or finish",
            Stage::Done => "finished artifact",
        }
    }
}

/// Writes artifact regions to any sink, strictly in order.
pub struct RegionWriter<W: Write> {
    inner: W,
    stage: Stage,
    bytes_written: u64,
    scratch: Vec<u8>,
}

impl<W: Write> RegionWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            stage: Stage::Config,
            bytes_written: 0,
            scratch: Vec::new(),
        }
    }

    /// Bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn expect_stage(&self, expected: Stage) -> Result<()> {
        if self.stage != expected {
            return Err(Error::InvalidState {
                expected: expected.name(),
                actual: self.stage.name(),
            });
        }
        Ok(())
    }

    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    /// Writes the 10 flag bytes and the 19 integers.
    pub fn write_config(&mut self, config: &ConfigVector) -> Result<()> {
        self.expect_stage(Stage::Config)?;
        self.put(&config.flag_bytes())?;
        let mut ints = Vec::with_capacity(config.ints.len() * 4);
        for v in config.ints {
            ints.extend_from_slice(&v.to_le_bytes());
        }
        self.put(&ints)?;
        self.stage = Stage::Parameters;
        Ok(())
    }

    /// Writes every value block of `plan` at `precision`.
    ///
    /// Returns the number of values written.
    pub fn write_parameters(
        &mut self,
        plan: &LayoutPlan<'_>,
        precision: Precision,
        progress: Option<&ProgressBar>,
    ) -> Result<usize> {
        self.expect_stage(Stage::Parameters)?;
        let mut count = 0;
        for (entry, values) in plan.iter() {
            self.put_values(values, precision)?;
            count += values.len();
            if let Some(pb) = progress {
                pb.set_message(entry.source.clone());
                pb.inc(1);
            }
        }
        self.stage = Stage::Optimizer;
        debug!(values = count, %precision, "parameter region written");
        Ok(count)
    }

    /// Writes the step and both moment regions, always at fp32.
    pub fn write_optimizer(&mut self, record: &OptimizerMomentRecord<'_>) -> Result<()> {
        self.expect_stage(Stage::Optimizer)?;
        self.put(&record.step.to_le_bytes())?;
        for block in &record.exp_avg {
            self.put_values(block, Precision::Fp32)?;
        }
        for block in &record.exp_avg_sq {
            self.put_values(block, Precision::Fp32)?;
        }
        self.stage = Stage::Done;
        debug!(step = record.step, "optimizer region written");
        Ok(())
    }

    /// Flushes and returns the sink. The parameter region must be written.
    pub fn finish(mut self) -> Result<W> {
        if self.stage != Stage::Optimizer && self.stage != Stage::Done {
            return Err(Error::InvalidState {
                expected: Stage::Optimizer.name(),
                actual: self.stage.name(),
            });
        }
        self.inner.flush()?;
        self.stage = Stage::Done;
        Ok(self.inner)
    }

    fn put_values(&mut self, values: &[f32], precision: Precision) -> Result<()> {
        let mut scratch = std::mem::take(&mut self.scratch);
        for chunk in values.chunks(CHUNK_VALUES) {
            scratch.clear();
            match precision {
                Precision::Fp32 => {
                    for v in chunk {
                        scratch.extend_from_slice(&v.to_le_bytes());
                    }
                }
                Precision::Fp16 => {
                    for &v in chunk {
                        scratch.extend_from_slice(&half::f16::from_f32(v).to_le_bytes());
                    }
                }
            }
            self.put(&scratch)?;
        }
        self.scratch = scratch;
        Ok(())
    }
}

/// Removes a temporary file on drop unless disarmed.
struct TempGuard {
    path: PathBuf,
    armed: bool,
}

impl TempGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "could not remove temp file");
            } else {
                debug!(path = %self.path.display(), "removed incomplete artifact");
            }
        }
    }
}

/// An artifact being written to disk.
///
/// Dropping it without calling [`commit`](Self::commit) leaves no file
/// behind at either path.
pub struct ArtifactFile {
    path: PathBuf,
    regions: RegionWriter<BufWriter<File>>,
    guard: TempGuard,
}

impl ArtifactFile {
    /// Creates the temporary file next to `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let temp_path = temp_path(path)?;

        let file = File::create(&temp_path).map_err(|e| {
            Error::io(format!("failed to create {}: {}", temp_path.display(), e))
        })?;
        let guard = TempGuard {
            path: temp_path,
            armed: true,
        };

        Ok(Self {
            path: path.to_path_buf(),
            regions: RegionWriter::new(BufWriter::with_capacity(WRITE_BUFFER_SIZE, file)),
            guard,
        })
    }

    /// Final path of the artifact.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path written until commit.
    pub fn temp_path(&self) -> &Path {
        &self.guard.path
    }

    pub fn regions(&mut self) -> &mut RegionWriter<BufWriter<File>> {
        &mut self.regions
    }

    /// Flushes, syncs and renames the artifact into place.
    ///
    /// Returns the artifact size in bytes.
    pub fn commit(self) -> Result<u64> {
        let Self {
            path,
            regions,
            mut guard,
        } = self;

        let bytes = regions.bytes_written();
        let file = regions
            .finish()?
            .into_inner()
            .map_err(|e| Error::io(format!("failed to flush artifact: {}", e.error())))?;
        file.sync_all()
            .map_err(|e| Error::io(format!("failed to sync artifact: {}", e)))?;
        drop(file);

        fs::rename(&guard.path, &path).map_err(|e| {
            Error::io(format!(
                "failed to rename {} to {}: {}",
                guard.path.display(),
                path.display(),
                e
            ))
        })?;
        guard.disarm();

        info!(path = %path.display(), bytes, "Committed artifact");
        Ok(bytes)
    }
}

/// `<dir>/<name>.tmp` for `<dir>/<name>`.
fn temp_path(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| Error::io(format!("output path {} has no file name", path.display())))?;
    let mut temp = name.to_os_string();
    temp.push(".tmp");
    Ok(path.with_file_name(temp))
}
