//! # nmtpack core
//!
//! Error type and the few value types shared by every stage of the
//! checkpoint converter.
//!
//! - [`Error`] / [`Result`] - fail-fast error kinds for a conversion run
//! - [`Precision`] - numeric width of the parameter-value region
//! - [`Tensor`] - a dense row-major `f32` tensor

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{element_count, Precision, Tensor};
