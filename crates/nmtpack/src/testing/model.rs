//! A tiny encoder-decoder transformer checkpoint.

use std::io;
use std::path::Path;

use serde_json::{json, Value};

use nmtpack_core::{element_count, Tensor};

use super::safetensors::SafetensorsBuilder;
use crate::checkpoint::ParameterMap;

/// Shape and options of a toy translation model.
///
/// Parameters are listed in the order a trained checkpoint stores them:
/// embeddings interleaved with the layers, position buffers as one-element
/// tensors, and the output projection near the end.
#[derive(Debug, Clone)]
pub struct ToyModel {
    pub embed_dim: usize,
    pub ffn_dim: usize,
    pub heads: usize,
    pub encoder_layers: usize,
    pub decoder_layers: usize,
    pub vocab: usize,
    /// Adds `encoder.history.weight` and `decoder.history.weight`.
    pub history: bool,
    /// Adds the stack-level `encoder.layer_norm` and `decoder.layer_norm`.
    pub normalize_before: bool,
    pub share_all_embeddings: bool,
    pub share_decoder_input_output_embed: bool,
}

impl Default for ToyModel {
    fn default() -> Self {
        Self {
            embed_dim: 4,
            ffn_dim: 8,
            heads: 2,
            encoder_layers: 2,
            decoder_layers: 1,
            vocab: 10,
            history: false,
            normalize_before: true,
            share_all_embeddings: false,
            share_decoder_input_output_embed: false,
        }
    }
}

impl ToyModel {
    /// Parameter names and shapes in checkpoint order.
    pub fn shapes(&self) -> Vec<(String, Vec<usize>)> {
        let d = self.embed_dim;
        let f = self.ffn_dim;
        let mut out = Vec::new();
        let mut add = |name: String, shape: Vec<usize>| out.push((name, shape));

        add("encoder.embed_tokens.weight".into(), vec![self.vocab, d]);
        add("encoder.embed_positions._float_tensor".into(), vec![1]);
        for i in 0..self.encoder_layers {
            let p = format!("encoder.layers.{i}");
            attention(&mut add, &format!("{p}.self_attn"), d);
            add(format!("{p}.self_attn_layer_norm.weight"), vec![d]);
            add(format!("{p}.self_attn_layer_norm.bias"), vec![d]);
            feed_forward(&mut add, &p, d, f);
        }
        if self.normalize_before {
            add("encoder.layer_norm.weight".into(), vec![d]);
            add("encoder.layer_norm.bias".into(), vec![d]);
        }
        if self.history {
            let n = self.encoder_layers + 1;
            add("encoder.history.weight".into(), vec![n, n]);
        }

        add("decoder.embed_tokens.weight".into(), vec![self.vocab, d]);
        add("decoder.embed_positions._float_tensor".into(), vec![1]);
        for i in 0..self.decoder_layers {
            let p = format!("decoder.layers.{i}");
            attention(&mut add, &format!("{p}.self_attn"), d);
            add(format!("{p}.self_attn_layer_norm.weight"), vec![d]);
            add(format!("{p}.self_attn_layer_norm.bias"), vec![d]);
            attention(&mut add, &format!("{p}.encoder_attn"), d);
            add(format!("{p}.encoder_attn_layer_norm.weight"), vec![d]);
            add(format!("{p}.encoder_attn_layer_norm.bias"), vec![d]);
            feed_forward(&mut add, &p, d, f);
        }
        if self.normalize_before {
            add("decoder.layer_norm.weight".into(), vec![d]);
            add("decoder.layer_norm.bias".into(), vec![d]);
        }
        if self.history {
            let n = self.decoder_layers + 1;
            add("decoder.history.weight".into(), vec![n, n]);
        }
        add("decoder.output_projection.weight".into(), vec![self.vocab, d]);
        add("decoder.version".into(), vec![1]);

        out
    }

    /// Parameters with distinct values: a running counter across the whole
    /// checkpoint, so every element can be traced back to its source.
    pub fn parameters(&self) -> ParameterMap {
        let mut next = 0.0f32;
        self.shapes()
            .into_iter()
            .map(|(name, shape)| {
                let n = element_count(&shape);
                let data: Vec<f32> = (0..n)
                    .map(|_| {
                        next += 1.0;
                        next
                    })
                    .collect();
                let tensor = Tensor::new(shape, data).expect("fixture data fills its shape");
                (name, tensor)
            })
            .collect()
    }

    /// The flat hyperparameter record, as stored under `__metadata__.args`.
    ///
    /// Leaves out `max_relative_length` and the special token ids so their
    /// defaults apply.
    pub fn record(&self) -> Value {
        json!({
            "arch": "transformer",
            "encoder_embed_dim": self.embed_dim,
            "encoder_layers": self.encoder_layers,
            "encoder_attention_heads": self.heads,
            "encoder_ffn_embed_dim": self.ffn_dim,
            "decoder_embed_dim": self.embed_dim,
            "decoder_layers": self.decoder_layers,
            "decoder_attention_heads": self.heads,
            "decoder_ffn_embed_dim": self.ffn_dim,
            "max_source_positions": 64,
            "max_target_positions": 48,
            "encoder_normalize_before": self.normalize_before,
            "decoder_normalize_before": self.normalize_before,
            "share_all_embeddings": self.share_all_embeddings,
            "share_decoder_input_output_embed": self.share_decoder_input_output_embed,
            "dropout": 0.1,
        })
    }

    /// A builder holding every parameter (F32) and the record under `args`.
    ///
    /// Callers may chain more tensors, such as optimizer state, before writing.
    pub fn builder(&self) -> SafetensorsBuilder {
        let params = self.parameters();
        let mut builder = SafetensorsBuilder::new().metadata("args", self.record().to_string());
        for (name, tensor) in params.iter() {
            builder = builder.f32(name, tensor.shape().to_vec(), tensor.data());
        }
        builder
    }

    /// Writes the checkpoint to `path`.
    pub fn write(&self, path: impl AsRef<Path>) -> io::Result<()> {
        self.builder().write(path)
    }
}

/// A tensor filled with `0, 1, 2, ...`.
pub fn iota(shape: Vec<usize>) -> Tensor {
    let n = element_count(&shape);
    let data = (0..n).map(|i| i as f32).collect();
    Tensor::new(shape, data).expect("iota fills its shape")
}

fn attention(add: &mut impl FnMut(String, Vec<usize>), prefix: &str, d: usize) {
    add(format!("{prefix}.in_proj_weight"), vec![3 * d, d]);
    add(format!("{prefix}.in_proj_bias"), vec![3 * d]);
    add(format!("{prefix}.out_proj.weight"), vec![d, d]);
    add(format!("{prefix}.out_proj.bias"), vec![d]);
}

fn feed_forward(add: &mut impl FnMut(String, Vec<usize>), prefix: &str, d: usize, f: usize) {
    add(format!("{prefix}.fc1.weight"), vec![f, d]);
    add(format!("{prefix}.fc1.bias"), vec![f]);
    add(format!("{prefix}.fc2.weight"), vec![d, f]);
    add(format!("{prefix}.fc2.bias"), vec![d]);
    add(format!("{prefix}.final_layer_norm.weight"), vec![d]);
    add(format!("{prefix}.final_layer_norm.bias"), vec![d]);
}
