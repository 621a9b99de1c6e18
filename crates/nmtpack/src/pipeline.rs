//! Conversion pipeline.
//!
//! Runs the passes in a fixed order. Everything that can fail on bad input
//! (record resolution, configuration vector, layout, optimizer alignment)
//! runs before the artifact file is created, so a rejected checkpoint never
//! leaves output behind.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use nmtpack_core::{Error, Precision, Result};

use crate::arch::RawArchitecture;
use crate::checkpoint::Checkpoint;
use crate::config_vector::ConfigVector;
use crate::layout::LayoutPlanner;
use crate::optimizer::OptimizerAligner;
use crate::report::{info_path, write_info, ConversionReport};
use crate::serializer::ArtifactFile;

/// Conversion options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertOptions {
    /// Input checkpoint (safetensors).
    #[serde(default)]
    pub input: PathBuf,
    /// Output artifact path.
    #[serde(default)]
    pub output: PathBuf,
    /// Precision of the parameter region.
    #[serde(default)]
    pub precision: Precision,
    /// Append the optimizer region.
    #[serde(default)]
    pub save_optimizer: bool,
    /// JSON file whose members override the checkpoint's architecture record.
    #[serde(default)]
    pub arch_override: Option<PathBuf>,
    /// Write `<output>.info.txt`.
    #[serde(default = "default_write_info")]
    pub write_info: bool,
    /// Show a progress bar while writing values.
    #[serde(default = "default_show_progress")]
    pub show_progress: bool,
}

fn default_write_info() -> bool {
    true
}

fn default_show_progress() -> bool {
    true
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            output: PathBuf::new(),
            precision: Precision::default(),
            save_optimizer: false,
            arch_override: None,
            write_info: default_write_info(),
            show_progress: default_show_progress(),
        }
    }
}

impl ConvertOptions {
    /// Options for converting `input` into `output` with defaults elsewhere.
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            ..Self::default()
        }
    }

    /// Loads options from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::io(format!("failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&text).map_err(|e| Error::config_schema("options", e.to_string()))
    }

    fn validate(&self) -> Result<()> {
        if self.input.as_os_str().is_empty() {
            return Err(Error::config_schema("input", "no input checkpoint given"));
        }
        if self.output.as_os_str().is_empty() {
            return Err(Error::config_schema("output", "no output path given"));
        }
        Ok(())
    }
}

/// Checkpoint-to-artifact converter.
pub struct Converter {
    options: ConvertOptions,
}

impl Converter {
    pub fn new(options: ConvertOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    /// Loads the input checkpoint and converts it.
    pub fn run(&self) -> Result<ConversionReport> {
        self.options.validate()?;
        let checkpoint = Checkpoint::open(&self.options.input)?;
        self.convert(&checkpoint)
    }

    /// Converts an already loaded checkpoint.
    pub fn convert(&self, checkpoint: &Checkpoint) -> Result<ConversionReport> {
        let start = Instant::now();
        let opts = &self.options;
        if opts.output.as_os_str().is_empty() {
            return Err(Error::config_schema("output", "no output path given"));
        }
        let params = checkpoint.params();

        // Phase 1: architecture and configuration vector.
        let record = self.merged_record(checkpoint.record())?;
        let arch = RawArchitecture::from_record(&record)?.resolve()?;
        let config = ConfigVector::build(&arch, params)?;
        debug!(flags = ?config.flags, ints = ?config.ints, "configuration vector");

        // Phase 2: layout.
        let plan = LayoutPlanner::new(arch.sharing).plan(params)?;

        // Phase 3: optimizer alignment, only when asked for.
        let moments = if opts.save_optimizer {
            Some(OptimizerAligner::new(&plan).align(checkpoint.optimizer())?)
        } else {
            if checkpoint.optimizer().is_some() {
                debug!("checkpoint carries optimizer state; not exporting it");
            }
            None
        };

        // Phase 4: write.
        info!(
            output = %opts.output.display(),
            precision = %opts.precision,
            entries = plan.len(),
            "Writing artifact"
        );
        let mut artifact = ArtifactFile::create(&opts.output)?;
        artifact.regions().write_config(&config)?;

        let progress = opts.show_progress.then(|| progress_bar(plan.len() as u64));
        let parameter_values = artifact
            .regions()
            .write_parameters(&plan, opts.precision, progress.as_ref())?;
        if let Some(pb) = &progress {
            pb.finish_with_message("parameters written");
        }

        if let Some(record) = &moments {
            artifact.regions().write_optimizer(record)?;
        }
        let bytes_written = artifact.commit()?;

        // Phase 5: sidecar.
        let info = if opts.write_info {
            let path = info_path(&opts.output);
            let settings = (!record.is_empty()).then_some(&record);
            write_info(&path, params, settings)?;
            debug!(path = %path.display(), "wrote info sidecar");
            Some(path)
        } else {
            None
        };

        let report = ConversionReport {
            output: opts.output.clone(),
            precision: opts.precision,
            entries: plan.len(),
            parameter_values,
            skipped: plan.skipped().to_vec(),
            omitted: plan.omitted().to_vec(),
            optimizer_appended: moments.is_some(),
            optimizer_step: moments.as_ref().map(|m| m.step),
            bytes_written,
            info_path: info,
            elapsed_secs: start.elapsed().as_secs_f64(),
        };
        info!(
            entries = report.entries,
            values = report.parameter_values,
            bytes = report.bytes_written,
            optimizer = report.optimizer_appended,
            elapsed_secs = report.elapsed_secs,
            "Conversion complete"
        );
        Ok(report)
    }

    /// The checkpoint record with the override file's members applied on top.
    fn merged_record(&self, record: Option<&Map<String, Value>>) -> Result<Map<String, Value>> {
        let mut merged = record.cloned().unwrap_or_default();
        if let Some(path) = &self.options.arch_override {
            let text = fs::read_to_string(path)
                .map_err(|e| Error::io(format!("failed to read {}: {}", path.display(), e)))?;
            let overrides: Map<String, Value> = serde_json::from_str(&text)
                .map_err(|e| Error::config_schema("arch_override", e.to_string()))?;
            info!(
                path = %path.display(),
                fields = overrides.len(),
                "Applying architecture override"
            );
            merged.extend(overrides);
        }
        Ok(merged)
    }
}

fn progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .map(|style| style.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb
}
