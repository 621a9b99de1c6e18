//! Fixtures for conversion tests.
//!
//! - [`SafetensorsBuilder`] writes small safetensors checkpoints in a chosen
//!   key order, with optional `__metadata__` entries
//! - [`ToyModel`] describes a tiny translation transformer and produces its
//!   parameters, hyperparameter record and checkpoint file
//! - [`iota`] fills a tensor of any shape with `0, 1, 2, ...`
//!
//! # Feature Gate
//!
//! This module is only available when the `testing` feature is enabled,
//! or when running tests.
//!
//! ```toml
//! [dev-dependencies]
//! nmtpack = { version = "...", features = ["testing"] }
//! ```

pub mod model;
pub mod safetensors;

pub use model::{iota, ToyModel};
pub use safetensors::SafetensorsBuilder;
