//! Error types for checkpoint conversion.

use thiserror::Error;

/// Result type alias for conversion operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Conversion error types.
///
/// Every variant is fatal for the run that produced it. The converter never
/// retries and never emits a partial artifact.
#[derive(Debug, Error)]
pub enum Error {
    /// A required hyperparameter is missing or cannot be represented.
    #[error("config schema error in `{field}`: {message}")]
    ConfigSchema {
        field: String,
        message: String,
    },

    /// Layout element counts disagree with the source tensors.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Optimizer state is absent or has a layout we cannot align.
    #[error("unsupported optimizer state: {0}")]
    UnsupportedOptimizerState(String),

    /// The checkpoint file itself could not be understood.
    #[error("malformed checkpoint: {message}")]
    MalformedCheckpoint {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A parameter tensor has no elements.
    #[error("parameter `{name}` has zero elements")]
    EmptyTensor { name: String },

    /// Artifact regions were written out of order.
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    /// I/O error from the underlying file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a config schema error for a named field.
    pub fn config_schema(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigSchema {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a config schema error for a required field that is absent.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Error::config_schema(field, "required field is missing")
    }

    /// Create a shape mismatch error.
    pub fn shape_mismatch(message: impl Into<String>) -> Self {
        Error::ShapeMismatch(message.into())
    }

    /// Create an unsupported optimizer state error.
    pub fn unsupported_optimizer(message: impl Into<String>) -> Self {
        Error::UnsupportedOptimizerState(message.into())
    }

    /// Create a malformed checkpoint error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedCheckpoint {
            message: message.into(),
            source: None,
        }
    }

    /// Create a malformed checkpoint error wrapping its cause.
    pub fn malformed_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::MalformedCheckpoint {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an I/O error with a custom message.
    pub fn io(message: impl Into<String>) -> Self {
        Error::Io(std::io::Error::other(message.into()))
    }

    /// Get error category for logs and reports.
    pub fn category(&self) -> &'static str {
        match self {
            Error::ConfigSchema { .. } => "config_schema",
            Error::ShapeMismatch(_) => "shape_mismatch",
            Error::UnsupportedOptimizerState(_) => "unsupported_optimizer_state",
            Error::MalformedCheckpoint { .. } => "malformed_checkpoint",
            Error::EmptyTensor { .. } => "empty_tensor",
            Error::InvalidState { .. } => "invalid_state",
            Error::Io(_) => "io_error",
        }
    }
}
