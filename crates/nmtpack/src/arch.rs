//! Architecture record.
//!
//! Training checkpoints carry their hyperparameters as a loosely typed JSON
//! record. Older checkpoints lack fields that newer ones have, so the record
//! is read into [`RawArchitecture`] (every field optional) and then resolved
//! against the [`defaults`] table into an [`ArchitectureConfig`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use nmtpack_core::{Error, Result};

/// Values used when a defaultable field is absent from the record.
pub mod defaults {
    /// Relative-position window; -1 disables relative positions.
    pub const MAX_RELATIVE_LENGTH: i32 = -1;
    /// End-of-sequence token id.
    pub const EOS: i32 = 2;
    /// Padding token id.
    pub const PAD: i32 = 1;
    /// Unknown-word token id.
    pub const UNK: i32 = 3;
    pub const NORMALIZE_BEFORE: bool = false;
    pub const SHARE_ALL_EMBEDDINGS: bool = false;
    pub const SHARE_DECODER_INPUT_OUTPUT_EMBED: bool = false;
}

/// The record as found in the checkpoint. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawArchitecture {
    pub encoder_embed_dim: Option<i64>,
    pub encoder_layers: Option<i64>,
    pub encoder_attention_heads: Option<i64>,
    pub encoder_ffn_embed_dim: Option<i64>,
    pub decoder_embed_dim: Option<i64>,
    pub decoder_layers: Option<i64>,
    pub decoder_attention_heads: Option<i64>,
    pub decoder_ffn_embed_dim: Option<i64>,
    pub max_source_positions: Option<i64>,
    pub max_target_positions: Option<i64>,
    pub max_relative_length: Option<i64>,
    pub eos: Option<i64>,
    pub pad: Option<i64>,
    pub unk: Option<i64>,
    pub encoder_normalize_before: Option<bool>,
    pub decoder_normalize_before: Option<bool>,
    pub share_all_embeddings: Option<bool>,
    pub share_decoder_input_output_embed: Option<bool>,
}

impl RawArchitecture {
    /// Reads the known fields from a JSON record.
    pub fn from_record(record: &Map<String, Value>) -> Result<Self> {
        serde_json::from_value(Value::Object(record.clone()))
            .map_err(|e| Error::config_schema("record", e.to_string()))
    }

    /// Applies the defaulting table.
    ///
    /// Fails on the first required field that is absent, or on any integer
    /// that does not fit the 32-bit slots of the artifact.
    pub fn resolve(&self) -> Result<ArchitectureConfig> {
        let mut defaulted = Vec::new();

        let encoder = StackDims {
            embed_dim: required("encoder_embed_dim", self.encoder_embed_dim)?,
            layers: required("encoder_layers", self.encoder_layers)?,
            attention_heads: required("encoder_attention_heads", self.encoder_attention_heads)?,
            ffn_embed_dim: Some(required("encoder_ffn_embed_dim", self.encoder_ffn_embed_dim)?),
        };
        let decoder = StackDims {
            embed_dim: required("decoder_embed_dim", self.decoder_embed_dim)?,
            layers: required("decoder_layers", self.decoder_layers)?,
            attention_heads: required("decoder_attention_heads", self.decoder_attention_heads)?,
            // Only needed when the decoder has feed-forward weights.
            ffn_embed_dim: self
                .decoder_ffn_embed_dim
                .map(|v| to_i32("decoder_ffn_embed_dim", v))
                .transpose()?,
        };

        let mut int_or = |field: &'static str, value: Option<i64>, default: i32| match value {
            Some(v) => to_i32(field, v),
            None => {
                defaulted.push(field);
                Ok(default)
            }
        };
        let max_relative_length = int_or(
            "max_relative_length",
            self.max_relative_length,
            defaults::MAX_RELATIVE_LENGTH,
        )?;
        let tokens = SpecialTokens {
            eos: int_or("eos", self.eos, defaults::EOS)?,
            pad: int_or("pad", self.pad, defaults::PAD)?,
            unk: int_or("unk", self.unk, defaults::UNK)?,
        };

        let mut flag_or = |field: &'static str, value: Option<bool>, default: bool| {
            value.unwrap_or_else(|| {
                defaulted.push(field);
                default
            })
        };
        let encoder_normalize_before = flag_or(
            "encoder_normalize_before",
            self.encoder_normalize_before,
            defaults::NORMALIZE_BEFORE,
        );
        let decoder_normalize_before = flag_or(
            "decoder_normalize_before",
            self.decoder_normalize_before,
            defaults::NORMALIZE_BEFORE,
        );
        let sharing = Sharing {
            share_all_embeddings: flag_or(
                "share_all_embeddings",
                self.share_all_embeddings,
                defaults::SHARE_ALL_EMBEDDINGS,
            ),
            share_decoder_input_output_embed: flag_or(
                "share_decoder_input_output_embed",
                self.share_decoder_input_output_embed,
                defaults::SHARE_DECODER_INPUT_OUTPUT_EMBED,
            ),
        };

        let config = ArchitectureConfig {
            encoder,
            decoder,
            max_source_positions: required("max_source_positions", self.max_source_positions)?,
            max_target_positions: required("max_target_positions", self.max_target_positions)?,
            max_relative_length,
            tokens,
            encoder_normalize_before,
            decoder_normalize_before,
            sharing,
            defaulted,
        };
        for field in &config.defaulted {
            warn!(field = *field, "architecture field absent, using default");
        }
        Ok(config)
    }
}

fn required(field: &'static str, value: Option<i64>) -> Result<i32> {
    let v = value.ok_or_else(|| Error::missing_field(field))?;
    to_i32(field, v)
}

fn to_i32(field: &'static str, value: i64) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| Error::config_schema(field, format!("{} does not fit in a 32-bit slot", value)))
}

/// Width, depth and head count of one transformer stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StackDims {
    pub embed_dim: i32,
    pub layers: i32,
    pub attention_heads: i32,
    pub ffn_embed_dim: Option<i32>,
}

/// Special token ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpecialTokens {
    pub eos: i32,
    pub pad: i32,
    pub unk: i32,
}

/// Embedding sharing flags. These decide which embedding tensors are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Sharing {
    /// Encoder and decoder use one embedding matrix.
    pub share_all_embeddings: bool,
    /// The decoder output projection reuses the decoder input embedding.
    pub share_decoder_input_output_embed: bool,
}

/// A fully resolved architecture.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchitectureConfig {
    pub encoder: StackDims,
    pub decoder: StackDims,
    pub max_source_positions: i32,
    pub max_target_positions: i32,
    pub max_relative_length: i32,
    pub tokens: SpecialTokens,
    pub encoder_normalize_before: bool,
    pub decoder_normalize_before: bool,
    pub sharing: Sharing,
    /// Fields that came from the defaulting table rather than the record.
    pub defaulted: Vec<&'static str>,
}

impl ArchitectureConfig {
    /// Reads and resolves a JSON record in one step.
    pub fn from_record(record: &Map<String, Value>) -> Result<Self> {
        RawArchitecture::from_record(record)?.resolve()
    }
}
