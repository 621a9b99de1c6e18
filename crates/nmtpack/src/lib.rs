// Allow from_str methods that don't implement FromStr trait
#![allow(clippy::should_implement_trait)]

//! # nmtpack
//!
//! Converts a trained encoder-decoder translation checkpoint into the flat,
//! positional binary artifact read by a minimal inference runtime.
//!
//! ```text
//!                 ┌──────────────────┐
//!  safetensors ──▶│    Checkpoint    │── record ──▶ ArchitectureConfig
//!                 └────────┬─────────┘                    │
//!                          │ ParameterMap (file order)    │
//!            ┌─────────────┼───────────────────┐          │
//!            ▼             ▼                   ▼          ▼
//!      LayoutPlanner ─▶ LayoutPlan ─▶ OptimizerAligner  ConfigVector
//!      (classify)          │                   │          │
//!                          ▼                   ▼          ▼
//!                     ┌──────────────────────────────────────┐
//!                     │ RegionWriter: config │ values │ opt  │
//!                     └──────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use nmtpack::{ConvertOptions, Converter, Precision};
//!
//! let mut opts = ConvertOptions::new("checkpoint_best.safetensors", "model.bin");
//! opts.precision = Precision::Fp16;
//! let report = Converter::new(opts).run()?;
//! println!("{} values in {} entries", report.parameter_values, report.entries);
//! ```
//!
//! ## Modules
//!
//! - [`checkpoint`] - safetensors loading, ordered parameters, optimizer buckets
//! - [`arch`] - hyperparameter record and its defaulting table
//! - [`classify`] - per-parameter transform rules
//! - [`config_vector`] - the 10 + 19 configuration scalars
//! - [`layout`] - entry ordering, offsets and transposes
//! - [`optimizer`] - moment re-slicing
//! - [`serializer`] - ordered region writer and atomic artifact file
//! - [`pipeline`] - end-to-end converter

pub mod arch;
pub mod checkpoint;
pub mod classify;
pub mod config_vector;
pub mod layout;
pub mod optimizer;
pub mod pipeline;
pub mod report;
pub mod serializer;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use arch::{ArchitectureConfig, RawArchitecture, Sharing};
pub use checkpoint::{Checkpoint, OptimizerState, ParameterMap};
pub use classify::{classify, ParameterClass};
pub use config_vector::ConfigVector;
pub use layout::{LayoutEntry, LayoutPlan, LayoutPlanner, Transform};
pub use optimizer::{OptimizerAligner, OptimizerMomentRecord};
pub use pipeline::{ConvertOptions, Converter};
pub use report::ConversionReport;
pub use serializer::{ArtifactFile, RegionWriter};

pub use nmtpack_core::{Error, Precision, Result, Tensor};
