//! Fixed-schema configuration vector.
//!
//! The artifact begins with 10 boolean bytes and 19 little-endian `i32`
//! values describing the network. The inference runtime reads them by
//! position, so the slot order below is part of the binary format.

use serde::Serialize;

use nmtpack_core::{Error, Result};

use crate::arch::ArchitectureConfig;
use crate::checkpoint::ParameterMap;
use crate::classify::{DECODER_EMBEDDING, ENCODER_EMBEDDING};

/// Number of boolean slots.
pub const FLAG_COUNT: usize = 10;
/// Number of integer slots.
pub const INT_COUNT: usize = 19;

/// Boolean slot names, in artifact order.
pub const FLAG_NAMES: [&str; FLAG_COUNT] = [
    "legacy_gamma_norms",
    "fused_qkv",
    "encoder_final_norm",
    "decoder_final_norm",
    "encoder_normalize_before",
    "decoder_normalize_before",
    "encoder_history",
    "decoder_history",
    "share_all_embeddings",
    "share_decoder_input_output_embed",
];

/// Integer slot names, in artifact order.
pub const INT_NAMES: [&str; INT_COUNT] = [
    "encoder_embed_dim",
    "encoder_layers",
    "encoder_self_attention_heads",
    "encoder_cross_attention_heads",
    "encoder_ffn_embed_dim",
    "decoder_embed_dim",
    "decoder_layers",
    "decoder_self_attention_heads",
    "decoder_cross_attention_heads",
    "decoder_ffn_embed_dim",
    "max_relative_length",
    "max_source_positions",
    "max_target_positions",
    "sos",
    "eos",
    "pad",
    "unk",
    "source_vocab_size",
    "target_vocab_size",
];

/// The 29 configuration scalars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigVector {
    pub flags: [bool; FLAG_COUNT],
    pub ints: [i32; INT_COUNT],
}

impl ConfigVector {
    /// Derives the vector from the architecture and the parameter names.
    ///
    /// Optional sub-layers are detected by probing for sentinel parameter
    /// names. Vocabulary sizes come from the embedding row counts.
    pub fn build(arch: &ArchitectureConfig, params: &ParameterMap) -> Result<Self> {
        let has = |name: &str| params.contains_key(name);

        let flags = [
            has("encoder.layers.0.final_layer_norm.gamma")
                || has("decoder.layers.0.final_layer_norm.gamma"),
            has("encoder.layers.0.self_attn.in_proj_weight"),
            has("encoder.layer_norm.weight") || has("encoder.layer_norm.gamma"),
            has("decoder.layer_norm.weight") || has("decoder.layer_norm.gamma"),
            arch.encoder_normalize_before,
            arch.decoder_normalize_before,
            has("encoder.history.weight"),
            has("decoder.history.weight"),
            arch.sharing.share_all_embeddings,
            arch.sharing.share_decoder_input_output_embed,
        ];

        let source_vocab = embedding_rows(params, ENCODER_EMBEDDING)?
            .ok_or_else(|| Error::missing_field(ENCODER_EMBEDDING))?;
        let target_vocab = match embedding_rows(params, DECODER_EMBEDDING)? {
            Some(rows) => rows,
            None if arch.sharing.share_all_embeddings => source_vocab,
            None => return Err(Error::missing_field(DECODER_EMBEDDING)),
        };

        let enc = arch.encoder;
        let dec = arch.decoder;
        let encoder_ffn = enc
            .ffn_embed_dim
            .ok_or_else(|| Error::missing_field("encoder_ffn_embed_dim"))?;
        let decoder_ffn = if has("decoder.layers.0.fc1.weight") {
            dec.ffn_embed_dim
                .ok_or_else(|| Error::missing_field("decoder_ffn_embed_dim"))?
        } else {
            -1
        };

        let ints = [
            enc.embed_dim,
            enc.layers,
            enc.attention_heads,
            enc.attention_heads,
            encoder_ffn,
            dec.embed_dim,
            dec.layers,
            dec.attention_heads,
            dec.attention_heads,
            decoder_ffn,
            arch.max_relative_length,
            arch.max_source_positions,
            arch.max_target_positions,
            arch.tokens.eos,
            arch.tokens.eos,
            arch.tokens.pad,
            arch.tokens.unk,
            source_vocab,
            target_vocab,
        ];

        Ok(Self { flags, ints })
    }

    /// Flag bytes as written to the artifact.
    pub fn flag_bytes(&self) -> [u8; FLAG_COUNT] {
        self.flags.map(u8::from)
    }

    /// Looks up an integer slot by name.
    pub fn int(&self, name: &str) -> Option<i32> {
        INT_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| self.ints[i])
    }

    /// Looks up a boolean slot by name.
    pub fn flag(&self, name: &str) -> Option<bool> {
        FLAG_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| self.flags[i])
    }
}

fn embedding_rows(params: &ParameterMap, name: &str) -> Result<Option<i32>> {
    let Some(tensor) = params.get(name) else {
        return Ok(None);
    };
    let rows = tensor
        .shape()
        .first()
        .copied()
        .ok_or_else(|| Error::config_schema(name, "embedding has no row dimension"))?;
    i32::try_from(rows)
        .map(Some)
        .map_err(|_| Error::config_schema(name, format!("{} rows do not fit in a 32-bit slot", rows)))
}
