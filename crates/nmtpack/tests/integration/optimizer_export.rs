//! Optimizer region export.

use std::path::Path;

use nmtpack::layout::MatrixView;
use nmtpack::testing::ToyModel;
use nmtpack::{Checkpoint, Converter, Error, LayoutPlanner, Transform};
use tempfile::tempdir;

use super::{f32s, quiet_options, read_artifact};

/// Flattens the planned values back into training order: every entry's
/// values at its `start`, with transposed matrices restored to their
/// pre-transform layout.
fn training_order(model: &ToyModel) -> (Vec<f32>, Vec<f32>) {
    let params = model.parameters();
    let plan = LayoutPlanner::default().plan(&params).unwrap();

    let mut flat = vec![0.0f32; plan.total_values()];
    for (entry, values) in plan.iter() {
        let restored = match (entry.transform, entry.shape.as_slice()) {
            (Transform::Transposed, &[a, b]) => {
                MatrixView::new(values, a, b).unwrap().transpose()
            }
            _ => values.to_vec(),
        };
        flat[entry.training_range()].copy_from_slice(&restored);
    }

    let artifact_order = plan.iter().flat_map(|(_, v)| v.iter().copied()).collect();
    (flat, artifact_order)
}

fn write_with_state(
    model: &ToyModel,
    path: &Path,
    step: i64,
    exp_avg: &[f32],
    exp_avg_sq: &[f32],
) {
    model
        .builder()
        .f32(
            "last_optimizer_state.state.0.exp_avg",
            vec![exp_avg.len()],
            exp_avg,
        )
        .f32(
            "last_optimizer_state.state.0.exp_avg_sq",
            vec![exp_avg_sq.len()],
            exp_avg_sq,
        )
        .i64("last_optimizer_state.state.0.step", vec![1], &[step])
        .write(path)
        .unwrap();
}

#[test]
fn test_moments_follow_parameter_order() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("opt.safetensors");
    let output = dir.path().join("opt.bin");
    let model = ToyModel::default();

    let (flat, values) = training_order(&model);
    let squared: Vec<f32> = flat.iter().map(|v| v * 2.0).collect();
    write_with_state(&model, &input, 4200, &flat, &squared);

    let mut opts = quiet_options(&input, &output);
    opts.save_optimizer = true;
    let report = Converter::new(opts).run().unwrap();
    assert!(report.optimizer_appended);
    assert_eq!(report.optimizer_step, Some(4200));

    let artifact = read_artifact(&output);
    let n = values.len();
    assert_eq!(artifact.body.len(), n * 4 + 4 + n * 8);

    let (params, rest) = artifact.body.split_at(n * 4);
    assert_eq!(f32s(params), values);

    let step = i32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
    assert_eq!(step, 4200);
    let moments = f32s(&rest[4..]);
    assert_eq!(&moments[..n], values.as_slice());
    let doubled: Vec<f32> = values.iter().map(|v| v * 2.0).collect();
    assert_eq!(&moments[n..], doubled.as_slice());
}

#[test]
fn test_state_ignored_unless_requested() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("opt.safetensors");
    let output = dir.path().join("opt.bin");
    let model = ToyModel::default();
    let (flat, values) = training_order(&model);
    write_with_state(&model, &input, 7, &flat, &flat);

    let checkpoint = Checkpoint::open(&input).unwrap();
    assert!(checkpoint.optimizer().is_some());
    assert_eq!(checkpoint.params().len(), model.shapes().len());

    let report = Converter::new(quiet_options(&input, &output)).run().unwrap();
    assert!(!report.optimizer_appended);
    assert_eq!(read_artifact(&output).body.len(), values.len() * 4);
}

#[test]
fn test_requested_without_state() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("plain.safetensors");
    let output = dir.path().join("plain.bin");
    ToyModel::default().write(&input).unwrap();

    let mut opts = quiet_options(&input, &output);
    opts.save_optimizer = true;
    let err = Converter::new(opts).run().unwrap_err();

    assert!(matches!(err, Error::UnsupportedOptimizerState(_)));
    assert!(!output.exists());
    assert!(!dir.path().join("plain.bin.tmp").exists());
}

#[test]
fn test_per_group_buckets_rejected() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("groups.safetensors");
    let output = dir.path().join("groups.bin");
    let model = ToyModel::default();
    let moments = vec![0.5f32; 8];

    let mut builder = model.builder();
    for bucket in ["0", "1"] {
        builder = builder
            .f32(
                &format!("optimizer.state.{bucket}.exp_avg"),
                vec![8],
                &moments,
            )
            .f32(
                &format!("optimizer.state.{bucket}.exp_avg_sq"),
                vec![8],
                &moments,
            )
            .i64(&format!("optimizer.state.{bucket}.step"), vec![1], &[3]);
    }
    builder.write(&input).unwrap();

    let mut opts = quiet_options(&input, &output);
    opts.save_optimizer = true;
    let err = Converter::new(opts).run().unwrap_err();

    assert_eq!(err.category(), "unsupported_optimizer_state");
    assert!(!output.exists());
}

#[test]
fn test_short_moment_vector_rejected() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("short.safetensors");
    let output = dir.path().join("short.bin");
    let model = ToyModel::default();
    let (flat, _) = training_order(&model);
    let short = &flat[..flat.len() - 1];
    write_with_state(&model, &input, 1, short, short);

    let mut opts = quiet_options(&input, &output);
    opts.save_optimizer = true;
    let err = Converter::new(opts).run().unwrap_err();

    assert!(matches!(err, Error::UnsupportedOptimizerState(_)));
    assert!(!output.exists());
}
