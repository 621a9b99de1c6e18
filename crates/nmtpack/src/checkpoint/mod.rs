//! Checkpoint loading.
//!
//! A checkpoint is one safetensors file holding the model parameters, the
//! optional optimizer state under a reserved prefix, and the hyperparameter
//! record as JSON inside `__metadata__`.

mod optimizer_state;
mod params;
mod reader;

pub use optimizer_state::{GlobalBucket, MomentBucket, OptimizerState};
pub use params::ParameterMap;
pub use reader::{DType, SafetensorsReader, TensorEntry};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, info};

use nmtpack_core::{Error, Result, Tensor};

/// Prefixes under which optimizer state may be stored, in lookup order.
pub const OPTIMIZER_ROOTS: [&str; 2] = ["last_optimizer_state.", "optimizer."];

/// A loaded checkpoint.
#[derive(Debug)]
pub struct Checkpoint {
    path: PathBuf,
    params: ParameterMap,
    record: Option<Map<String, Value>>,
    optimizer: Option<OptimizerState>,
}

impl Checkpoint {
    /// Reads every parameter, the architecture record and any optimizer state.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = SafetensorsReader::open(path)?;

        let root = OPTIMIZER_ROOTS
            .iter()
            .copied()
            .find(|root| reader.tensors().any(|t| t.name.starts_with(root)));

        let mut params = ParameterMap::new();
        let mut optimizer: Option<OptimizerState> = None;

        for entry in reader.tensors() {
            if let Some(rest) = root.and_then(|r| entry.name.strip_prefix(r)) {
                let state = optimizer.get_or_insert_with(OptimizerState::new);
                load_optimizer_tensor(&reader, entry, rest, state)?;
                continue;
            }
            // A checkpoint can carry both roots; the unused one is not a parameter.
            if OPTIMIZER_ROOTS.iter().any(|r| entry.name.starts_with(r)) {
                debug!(name = %entry.name, "ignoring tensor under secondary optimizer root");
                continue;
            }

            if !entry.dtype.is_known() {
                return Err(Error::malformed(format!(
                    "parameter '{}' has an unsupported dtype",
                    entry.name
                )));
            }
            // Integer and boolean buffers are widened like any parameter.
            if !entry.dtype.is_float() {
                debug!(name = %entry.name, dtype = ?entry.dtype, "widening non-float parameter");
            }
            let data = reader.tensor_f32(&entry.name)?;
            params.insert(entry.name.clone(), Tensor::new(entry.shape.clone(), data)?);
        }

        let record = read_record(reader.metadata())?;

        info!(
            path = %path.display(),
            parameters = params.len(),
            values = params.total_elements(),
            has_record = record.is_some(),
            optimizer_buckets = optimizer.as_ref().map_or(0, OptimizerState::bucket_count),
            "Loaded checkpoint"
        );

        Ok(Self {
            path: path.to_path_buf(),
            params,
            record,
            optimizer,
        })
    }

    /// Builds a checkpoint from parts already in memory.
    pub fn from_parts(
        params: ParameterMap,
        record: Option<Map<String, Value>>,
        optimizer: Option<OptimizerState>,
    ) -> Self {
        Self {
            path: PathBuf::new(),
            params,
            record,
            optimizer,
        }
    }

    /// Source file path; empty for in-memory checkpoints.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parameters in checkpoint order.
    pub fn params(&self) -> &ParameterMap {
        &self.params
    }

    /// The hyperparameter record, if the file carried one.
    pub fn record(&self) -> Option<&Map<String, Value>> {
        self.record.as_ref()
    }

    /// Optimizer state, if the file carried any.
    pub fn optimizer(&self) -> Option<&OptimizerState> {
        self.optimizer.as_ref()
    }
}

/// Loads one `state.<bucket>.<field>` tensor into `state`.
fn load_optimizer_tensor(
    reader: &SafetensorsReader,
    entry: &TensorEntry,
    rest: &str,
    state: &mut OptimizerState,
) -> Result<()> {
    let mut parts = rest.split('.');
    let (bucket, field) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("state"), Some(bucket), Some(field), None) => (bucket, field),
        _ => {
            // Scheduler counters, param group settings and the like.
            debug!(name = %entry.name, "skipping optimizer tensor outside state buckets");
            return Ok(());
        }
    };

    let slot = state.bucket_mut(bucket);
    match field {
        "step" => slot.step = Some(reader.tensor_scalar_i64(&entry.name)?),
        "exp_avg" => slot.exp_avg = Some(reader.tensor_f32(&entry.name)?),
        "exp_avg_sq" => slot.exp_avg_sq = Some(reader.tensor_f32(&entry.name)?),
        other => debug!(name = %entry.name, field = other, "skipping optimizer field"),
    }
    Ok(())
}

/// Extracts the hyperparameter record from safetensors metadata.
///
/// `cfg` (with the record under `model`) wins over the older flat `args`.
fn read_record(metadata: &HashMap<String, String>) -> Result<Option<Map<String, Value>>> {
    if let Some(raw) = metadata.get("cfg") {
        let cfg: Value = serde_json::from_str(raw)
            .map_err(|e| Error::malformed_with("metadata `cfg` is not valid JSON", e))?;
        match cfg.get("model") {
            Some(Value::Object(model)) => return Ok(Some(model.clone())),
            Some(_) => return Err(Error::malformed("metadata `cfg.model` is not an object")),
            None => debug!("metadata `cfg` has no `model` member, trying `args`"),
        }
    }

    match metadata.get("args") {
        Some(raw) => match serde_json::from_str(raw) {
            Ok(Value::Object(args)) => Ok(Some(args)),
            Ok(_) => Err(Error::malformed("metadata `args` is not an object")),
            Err(e) => Err(Error::malformed_with("metadata `args` is not valid JSON", e)),
        },
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{SafetensorsBuilder, ToyModel};
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_open_toy_model() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        let model = ToyModel::default();
        model.write(&path).unwrap();

        let ckpt = Checkpoint::open(&path).unwrap();
        let expected: Vec<String> = model.shapes().into_iter().map(|(n, _)| n).collect();
        let names: Vec<&str> = ckpt.params().names().collect();
        assert_eq!(names, expected.iter().map(String::as_str).collect::<Vec<_>>());

        let record = ckpt.record().unwrap();
        assert_eq!(record.get("encoder_layers"), Some(&json!(2)));
        assert!(ckpt.optimizer().is_none());
    }

    #[test]
    fn test_optimizer_tensors_are_not_parameters() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("opt.safetensors");
        SafetensorsBuilder::new()
            .f32("encoder.embed_tokens.weight", vec![2, 2], &[1.0, 2.0, 3.0, 4.0])
            .f32("last_optimizer_state.state.0.exp_avg", vec![4], &[0.1; 4])
            .f32("last_optimizer_state.state.0.exp_avg_sq", vec![4], &[0.2; 4])
            .i64("last_optimizer_state.state.0.step", vec![], &[42])
            .f32("last_optimizer_state.loss_scale", vec![], &[128.0])
            .write(&path)
            .unwrap();

        let ckpt = Checkpoint::open(&path).unwrap();
        assert_eq!(ckpt.params().len(), 1);
        let bucket = ckpt.optimizer().unwrap().global_bucket().unwrap();
        assert_eq!(bucket.step, 42);
        assert_eq!(bucket.exp_avg.len(), 4);
    }

    #[test]
    fn test_fallback_optimizer_root() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("opt.safetensors");
        SafetensorsBuilder::new()
            .f32("w", vec![2], &[1.0, 2.0])
            .f32("optimizer.state.7.exp_avg", vec![2], &[0.0; 2])
            .f32("optimizer.state.7.exp_avg_sq", vec![2], &[0.0; 2])
            .f32("optimizer.state.7.step", vec![1], &[3.0])
            .write(&path)
            .unwrap();

        let ckpt = Checkpoint::open(&path).unwrap();
        assert_eq!(ckpt.optimizer().unwrap().global_bucket().unwrap().step, 3);
    }

    #[test]
    fn test_cfg_record_wins_over_args() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cfg.safetensors");
        SafetensorsBuilder::new()
            .f32("w", vec![1], &[1.0])
            .metadata("args", json!({"encoder_layers": 1}).to_string())
            .metadata("cfg", json!({"model": {"encoder_layers": 6}}).to_string())
            .write(&path)
            .unwrap();

        let ckpt = Checkpoint::open(&path).unwrap();
        assert_eq!(ckpt.record().unwrap().get("encoder_layers"), Some(&json!(6)));
    }

    #[test]
    fn test_integer_parameters_are_widened() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("int.safetensors");
        SafetensorsBuilder::new()
            .f32("encoder.embed_tokens.weight", vec![2, 2], &[1.0, 2.0, 3.0, 4.0])
            .i64("encoder.version", vec![1], &[3])
            .raw("decoder.mask", "BOOL", vec![3], vec![1, 0, 7])
            .raw(
                "decoder.bias",
                "I32",
                vec![2],
                [-5i32, 9].iter().flat_map(|v| v.to_le_bytes()).collect(),
            )
            .write(&path)
            .unwrap();

        let ckpt = Checkpoint::open(&path).unwrap();
        assert_eq!(ckpt.params().len(), 4);
        assert_eq!(ckpt.params().get("encoder.version").unwrap().data(), &[3.0]);
        assert_eq!(ckpt.params().get("decoder.mask").unwrap().data(), &[1.0, 0.0, 1.0]);
        assert_eq!(ckpt.params().get("decoder.bias").unwrap().data(), &[-5.0, 9.0]);
    }

    #[test]
    fn test_unknown_parameter_dtype_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f64.safetensors");
        SafetensorsBuilder::new()
            .raw("decoder.scale", "F64", vec![1], 2.0f64.to_le_bytes().to_vec())
            .write(&path)
            .unwrap();

        assert!(matches!(
            Checkpoint::open(&path),
            Err(Error::MalformedCheckpoint { .. })
        ));
    }
}
