//! Configuration vector as written to disk.

use nmtpack::testing::{SafetensorsBuilder, ToyModel};
use nmtpack::{Converter, Error};
use serde_json::json;
use tempfile::tempdir;

use super::{quiet_options, read_artifact};

#[test]
fn test_defaults_fill_missing_fields() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("toy.safetensors");
    let output = dir.path().join("toy.bin");
    ToyModel::default().write(&input).unwrap();

    Converter::new(quiet_options(&input, &output)).run().unwrap();
    let artifact = read_artifact(&output);

    assert_eq!(artifact.flags, vec![0, 1, 1, 1, 1, 1, 0, 0, 0, 0]);
    assert_eq!(&artifact.ints[..10], &[4, 2, 2, 2, 8, 4, 1, 2, 2, 8]);
    // Relative length, sentence start, eos, pad, unk.
    assert_eq!(artifact.ints[10], -1);
    assert_eq!(&artifact.ints[13..17], &[2, 2, 1, 3]);
    assert_eq!(&artifact.ints[11..13], &[64, 48]);
    assert_eq!(&artifact.ints[17..], &[10, 10]);
}

#[test]
fn test_post_norm_has_no_final_norms() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("post.safetensors");
    let output = dir.path().join("post.bin");
    ToyModel {
        normalize_before: false,
        ..ToyModel::default()
    }
    .write(&input)
    .unwrap();

    Converter::new(quiet_options(&input, &output)).run().unwrap();
    let artifact = read_artifact(&output);
    assert_eq!(&artifact.flags[2..6], &[0, 0, 0, 0]);
}

#[test]
fn test_explicit_tokens_from_cfg() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("cfg.safetensors");
    let output = dir.path().join("cfg.bin");
    let model = ToyModel::default();

    let mut record = model.record();
    let fields = record.as_object_mut().unwrap();
    fields.insert("max_relative_length".into(), json!(16));
    fields.insert("eos".into(), json!(5));
    fields.insert("pad".into(), json!(0));
    fields.insert("unk".into(), json!(7));
    let cfg = json!({"model": record, "task": {"source_lang": "de"}});

    let mut builder = SafetensorsBuilder::new().metadata("cfg", cfg.to_string());
    for (name, tensor) in model.parameters().iter() {
        builder = builder.f32(name, tensor.shape().to_vec(), tensor.data());
    }
    builder.write(&input).unwrap();

    Converter::new(quiet_options(&input, &output)).run().unwrap();
    let artifact = read_artifact(&output);
    assert_eq!(artifact.ints[10], 16);
    assert_eq!(&artifact.ints[13..17], &[5, 5, 0, 7]);
}

#[test]
fn test_encoder_only_checkpoint() {
    // No decoder feed-forward weights: that slot reads -1 even though the
    // record still names a width.
    let dir = tempdir().unwrap();
    let input = dir.path().join("enc.safetensors");
    let output = dir.path().join("enc.bin");
    let model = ToyModel {
        decoder_layers: 0,
        ..ToyModel::default()
    };
    let mut record = model.record();
    record["decoder_layers"] = json!(1);

    let mut builder = SafetensorsBuilder::new().metadata("args", record.to_string());
    for (name, tensor) in model.parameters().iter() {
        builder = builder.f32(name, tensor.shape().to_vec(), tensor.data());
    }
    builder.write(&input).unwrap();

    Converter::new(quiet_options(&input, &output)).run().unwrap();
    let artifact = read_artifact(&output);
    assert_eq!(&artifact.ints[5..10], &[4, 1, 2, 2, -1]);
    assert_eq!(&artifact.ints[..5], &[4, 2, 2, 2, 8]);
}

#[test]
fn test_decoder_ffn_width_only_needed_with_weights() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("out.bin");

    // No decoder layers and no width in the record: slot 9 still reads -1.
    let input = dir.path().join("enc.safetensors");
    let encoder_only = ToyModel {
        decoder_layers: 0,
        ..ToyModel::default()
    };
    let mut record = encoder_only.record();
    record.as_object_mut().unwrap().remove("decoder_ffn_embed_dim");
    let mut builder = SafetensorsBuilder::new().metadata("args", record.to_string());
    for (name, tensor) in encoder_only.parameters().iter() {
        builder = builder.f32(name, tensor.shape().to_vec(), tensor.data());
    }
    builder.write(&input).unwrap();

    Converter::new(quiet_options(&input, &output)).run().unwrap();
    assert_eq!(read_artifact(&output).ints[9], -1);

    // Decoder feed-forward weights present without the width.
    let input = dir.path().join("full.safetensors");
    let full = ToyModel::default();
    let mut record = full.record();
    record.as_object_mut().unwrap().remove("decoder_ffn_embed_dim");
    let mut builder = SafetensorsBuilder::new().metadata("args", record.to_string());
    for (name, tensor) in full.parameters().iter() {
        builder = builder.f32(name, tensor.shape().to_vec(), tensor.data());
    }
    builder.write(&input).unwrap();

    let output = dir.path().join("full.bin");
    let err = Converter::new(quiet_options(&input, &output)).run().unwrap_err();
    assert!(matches!(err, Error::ConfigSchema { ref field, .. } if field == "decoder_ffn_embed_dim"));
    assert!(!output.exists());
}

#[test]
fn test_non_integer_dimension_rejected() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("bad.safetensors");
    let output = dir.path().join("bad.bin");
    let model = ToyModel::default();
    let mut record = model.record();
    record["encoder_layers"] = json!("six");

    let mut builder = SafetensorsBuilder::new().metadata("args", record.to_string());
    for (name, tensor) in model.parameters().iter() {
        builder = builder.f32(name, tensor.shape().to_vec(), tensor.data());
    }
    builder.write(&input).unwrap();

    let err = Converter::new(quiet_options(&input, &output)).run().unwrap_err();
    assert!(matches!(err, Error::ConfigSchema { .. }));
    assert!(!output.exists());
}
