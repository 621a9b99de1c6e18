//! Per-parameter transform classification.
//!
//! Decides from the parameter name (and element count) how one tensor must be
//! laid out in the artifact. Rules are substring matches checked in a fixed
//! order; the first match wins.

use nmtpack_core::{Error, Result, Tensor};

use crate::arch::Sharing;

pub const ENCODER_EMBEDDING: &str = "encoder.embed_tokens.weight";
pub const DECODER_EMBEDDING: &str = "decoder.embed_tokens.weight";
pub const DECODER_OUTPUT_EMBEDDING: &str = "decoder.output_projection.weight";

/// How a parameter is handled by the layout planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterClass {
    /// Source embedding; always written, moved to the tail.
    EncoderEmbedding,
    /// Target embedding; `omitted` when encoder and decoder share embeddings.
    DecoderEmbedding { omitted: bool },
    /// Output projection; `omitted` when tied to the decoder input embedding.
    DecoderOutputEmbedding { omitted: bool },
    /// One-element tensor (version counters, position buffers); dropped.
    SkipScalar,
    /// Stacked query/key/value projection, split into three blocks.
    FusedQkv,
    /// Layer-history mixing weight, kept as its lower triangle.
    HistoryWeight,
    /// Weight matrix stored transposed.
    PlainMatrix,
    /// Anything else (biases, norm gains); stored as is.
    PlainVector,
}

impl ParameterClass {
    /// Returns true if any values of this parameter reach the artifact.
    pub fn is_emitted(&self) -> bool {
        match self {
            ParameterClass::SkipScalar => false,
            ParameterClass::DecoderEmbedding { omitted }
            | ParameterClass::DecoderOutputEmbedding { omitted } => !omitted,
            _ => true,
        }
    }

    /// Returns true for the three embedding classes.
    pub fn is_embedding(&self) -> bool {
        matches!(
            self,
            ParameterClass::EncoderEmbedding
                | ParameterClass::DecoderEmbedding { .. }
                | ParameterClass::DecoderOutputEmbedding { .. }
        )
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ParameterClass::EncoderEmbedding => "encoder_embedding",
            ParameterClass::DecoderEmbedding { .. } => "decoder_embedding",
            ParameterClass::DecoderOutputEmbedding { .. } => "decoder_output_embedding",
            ParameterClass::SkipScalar => "skip_scalar",
            ParameterClass::FusedQkv => "fused_qkv",
            ParameterClass::HistoryWeight => "history_weight",
            ParameterClass::PlainMatrix => "plain_matrix",
            ParameterClass::PlainVector => "plain_vector",
        }
    }
}

/// Classifies one parameter.
///
/// Fails only for a tensor with no elements.
pub fn classify(name: &str, tensor: &Tensor, sharing: Sharing) -> Result<ParameterClass> {
    if tensor.num_elements() == 0 {
        return Err(Error::EmptyTensor {
            name: name.to_string(),
        });
    }

    let class = if name.contains(ENCODER_EMBEDDING) {
        ParameterClass::EncoderEmbedding
    } else if name.contains(DECODER_EMBEDDING) {
        ParameterClass::DecoderEmbedding {
            omitted: sharing.share_all_embeddings,
        }
    } else if name.contains(DECODER_OUTPUT_EMBEDDING) {
        ParameterClass::DecoderOutputEmbedding {
            omitted: sharing.share_decoder_input_output_embed,
        }
    } else if tensor.num_elements() == 1 {
        ParameterClass::SkipScalar
    } else if name.contains("weight") && !name.contains("norm") {
        if name.contains("in_proj") {
            ParameterClass::FusedQkv
        } else if name.contains("history.weight") {
            ParameterClass::HistoryWeight
        } else {
            ParameterClass::PlainMatrix
        }
    } else {
        ParameterClass::PlainVector
    };
    Ok(class)
}
