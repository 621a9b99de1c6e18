//! End-to-end conversion of toy checkpoints.

use std::fs;

use nmtpack::testing::{SafetensorsBuilder, ToyModel};
use nmtpack::{Checkpoint, Converter, Error, LayoutPlanner, Precision, Transform};
use tempfile::tempdir;

use super::{f16s, f32s, quiet_options, read_artifact, HEADER_BYTES};

#[test]
fn test_fp32_artifact_matches_plan() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("toy.safetensors");
    let output = dir.path().join("toy.bin");
    let model = ToyModel::default();
    model.write(&input).unwrap();

    let report = Converter::new(quiet_options(&input, &output)).run().unwrap();

    let checkpoint = Checkpoint::open(&input).unwrap();
    let plan = LayoutPlanner::default().plan(checkpoint.params()).unwrap();
    let expected: Vec<f32> = plan
        .values()
        .iter()
        .flat_map(|v| v.iter().copied())
        .collect();

    let artifact = read_artifact(&output);
    assert_eq!(f32s(&artifact.body), expected);
    assert_eq!(report.parameter_values, expected.len());
    assert_eq!(report.entries, plan.len());
    assert_eq!(report.bytes_written, (HEADER_BYTES + expected.len() * 4) as u64);
    assert!(!report.optimizer_appended);
    assert_eq!(artifact.ints[17], 10);
}

#[test]
fn test_integer_version_buffer_is_dropped() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("versioned.safetensors");
    let output = dir.path().join("versioned.bin");
    let model = ToyModel::default();
    model
        .builder()
        .i64("encoder.version", vec![1], &[3])
        .write(&input)
        .unwrap();

    let report = Converter::new(quiet_options(&input, &output)).run().unwrap();
    assert!(report.skipped.iter().any(|name| name == "encoder.version"));

    let params = model.parameters();
    let plan = LayoutPlanner::default().plan(&params).unwrap();
    assert_eq!(report.parameter_values, plan.total_values());
    assert_eq!(f32s(&read_artifact(&output).body).len(), plan.total_values());
}

#[test]
fn test_embeddings_written_last() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("toy.safetensors");
    let output = dir.path().join("toy.bin");
    let model = ToyModel::default();
    model.write(&input).unwrap();

    Converter::new(quiet_options(&input, &output)).run().unwrap();

    let params = model.parameters();
    let enc = params.get("encoder.embed_tokens.weight").unwrap().data();
    let dec = params.get("decoder.embed_tokens.weight").unwrap().data();
    let out = params.get("decoder.output_projection.weight").unwrap().data();
    let tail: Vec<f32> = enc.iter().chain(dec).chain(out).copied().collect();

    let body = f32s(&read_artifact(&output).body);
    assert_eq!(&body[body.len() - tail.len()..], tail.as_slice());
}

#[test]
fn test_fp16_parameter_region() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("toy.safetensors");
    let output = dir.path().join("toy16.bin");
    ToyModel::default().write(&input).unwrap();

    let mut opts = quiet_options(&input, &output);
    opts.precision = Precision::Fp16;
    let report = Converter::new(opts).run().unwrap();

    let artifact = read_artifact(&output);
    assert_eq!(artifact.body.len(), report.parameter_values * 2);
    // Toy values are small integers, exact in half precision.
    let checkpoint = Checkpoint::open(&input).unwrap();
    let plan = LayoutPlanner::default().plan(checkpoint.params()).unwrap();
    assert_eq!(f16s(&artifact.body[..8]), plan.values()[0][..4].to_vec());
}

#[test]
fn test_shared_embeddings_omitted() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("shared.safetensors");
    let output = dir.path().join("shared.bin");
    let model = ToyModel {
        share_all_embeddings: true,
        ..ToyModel::default()
    };
    model.write(&input).unwrap();

    let report = Converter::new(quiet_options(&input, &output)).run().unwrap();
    assert_eq!(report.omitted, vec!["decoder.embed_tokens.weight".to_string()]);

    let artifact = read_artifact(&output);
    assert_eq!(artifact.flags[8], 1);
    assert_eq!(artifact.flags[9], 0);
    assert_eq!(artifact.ints[18], 10);

    let checkpoint = Checkpoint::open(&input).unwrap();
    let expected =
        checkpoint.params().total_elements() - 3 - model.vocab * model.embed_dim;
    assert_eq!(report.parameter_values, expected);
}

#[test]
fn test_tied_output_projection_omitted() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("tied.safetensors");
    let output = dir.path().join("tied.bin");
    ToyModel {
        share_decoder_input_output_embed: true,
        ..ToyModel::default()
    }
    .write(&input)
    .unwrap();

    let report = Converter::new(quiet_options(&input, &output)).run().unwrap();
    assert_eq!(
        report.omitted,
        vec!["decoder.output_projection.weight".to_string()]
    );
}

#[test]
fn test_history_weights() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("dlcl.safetensors");
    let output = dir.path().join("dlcl.bin");
    let model = ToyModel {
        history: true,
        ..ToyModel::default()
    };
    model.write(&input).unwrap();

    Converter::new(quiet_options(&input, &output)).run().unwrap();

    let artifact = read_artifact(&output);
    assert_eq!(artifact.flags[6], 1);
    assert_eq!(artifact.flags[7], 1);

    let checkpoint = Checkpoint::open(&input).unwrap();
    let plan = LayoutPlanner::default().plan(checkpoint.params()).unwrap();
    let counts: Vec<usize> = plan
        .entries()
        .iter()
        .filter(|e| e.source == "encoder.history.weight")
        .map(|e| e.count)
        .collect();
    assert_eq!(counts, vec![1, 2, 3]);
    assert!(plan
        .entries()
        .iter()
        .filter(|e| e.source.contains("history"))
        .all(|e| e.transform == Transform::Transposed && e.shape.len() == 1));
}

#[test]
fn test_sidecar_lists_every_parameter() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("toy.safetensors");
    let output = dir.path().join("toy.bin");
    let model = ToyModel::default();
    model.write(&input).unwrap();

    let report = Converter::new(quiet_options(&input, &output)).run().unwrap();
    let info = fs::read_to_string(report.info_path.unwrap()).unwrap();

    for (name, _) in model.shapes() {
        assert!(info.contains(&format!("{}:\t\t", name)), "missing {}", name);
    }
    assert!(info.contains("decoder.version:\t\t[1]"));
    assert!(info.contains("Training settings:"));
    assert!(info.contains("arch:\t\ttransformer"));
}

#[test]
fn test_no_info_flag() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("toy.safetensors");
    let output = dir.path().join("toy.bin");
    ToyModel::default().write(&input).unwrap();

    let mut opts = quiet_options(&input, &output);
    opts.write_info = false;
    let report = Converter::new(opts).run().unwrap();

    assert!(report.info_path.is_none());
    assert!(!dir.path().join("toy.bin.info.txt").exists());
}

#[test]
fn test_rejected_checkpoint_leaves_no_output() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("bad.safetensors");
    let output = dir.path().join("bad.bin");
    let model = ToyModel::default();
    let mut record = model.record();
    record.as_object_mut().unwrap().remove("max_source_positions");

    let mut builder = SafetensorsBuilder::new().metadata("args", record.to_string());
    for (name, tensor) in model.parameters().iter() {
        builder = builder.f32(name, tensor.shape().to_vec(), tensor.data());
    }
    builder.write(&input).unwrap();

    let err = Converter::new(quiet_options(&input, &output)).run().unwrap_err();
    assert!(
        matches!(err, Error::ConfigSchema { ref field, .. } if field == "max_source_positions")
    );
    assert!(!output.exists());
    assert!(!dir.path().join("bad.bin.tmp").exists());
}

#[test]
fn test_missing_input() {
    let dir = tempdir().unwrap();
    let err = Converter::new(quiet_options(
        &dir.path().join("absent.safetensors"),
        &dir.path().join("out.bin"),
    ))
    .run()
    .unwrap_err();
    assert_eq!(err.category(), "io_error");
}
