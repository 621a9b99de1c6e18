//! Optimizer moment buckets stored alongside the parameters.

use indexmap::IndexMap;

use nmtpack_core::{Error, Result};

/// Per-bucket state as found in the checkpoint. Fields may be missing.
#[derive(Debug, Clone, Default)]
pub struct MomentBucket {
    /// Update counter.
    pub step: Option<i64>,
    /// First-moment running estimate, flattened in training order.
    pub exp_avg: Option<Vec<f32>>,
    /// Second-moment running estimate, flattened in training order.
    pub exp_avg_sq: Option<Vec<f32>>,
}

/// A complete global bucket, borrowed from [`OptimizerState`].
#[derive(Debug, Clone, Copy)]
pub struct GlobalBucket<'a> {
    pub step: i64,
    pub exp_avg: &'a [f32],
    pub exp_avg_sq: &'a [f32],
}

/// Optimizer state keyed by bucket id, in checkpoint order.
///
/// Flat mixed-precision optimizers keep a single bucket covering every
/// parameter. Per-parameter-group state produces several buckets, which the
/// aligner rejects.
#[derive(Debug, Clone, Default)]
pub struct OptimizerState {
    buckets: IndexMap<String, MomentBucket>,
}

impl OptimizerState {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a state with one complete bucket named `0`.
    pub fn single(step: i64, exp_avg: Vec<f32>, exp_avg_sq: Vec<f32>) -> Self {
        let mut state = Self::new();
        state.buckets.insert(
            "0".to_string(),
            MomentBucket {
                step: Some(step),
                exp_avg: Some(exp_avg),
                exp_avg_sq: Some(exp_avg_sq),
            },
        );
        state
    }

    /// Returns the bucket with this id, creating it when absent.
    pub fn bucket_mut(&mut self, id: &str) -> &mut MomentBucket {
        self.buckets.entry(id.to_string()).or_default()
    }

    /// Number of buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Returns the only bucket, which must carry all three fields.
    pub fn global_bucket(&self) -> Result<GlobalBucket<'_>> {
        let mut iter = self.buckets.iter();
        let (id, bucket) = match (iter.next(), iter.next()) {
            (Some(only), None) => only,
            (None, _) => return Err(Error::unsupported_optimizer("no state buckets found")),
            (Some(_), Some(_)) => {
                return Err(Error::unsupported_optimizer(format!(
                    "expected one global state bucket, found {} (per-parameter-group state)",
                    self.buckets.len()
                )))
            }
        };

        let missing = |field: &str| {
            Error::unsupported_optimizer(format!("bucket '{}' has no `{}`", id, field))
        };
        let step = bucket.step.ok_or_else(|| missing("step"))?;
        let exp_avg = bucket.exp_avg.as_deref().ok_or_else(|| missing("exp_avg"))?;
        let exp_avg_sq = bucket
            .exp_avg_sq
            .as_deref()
            .ok_or_else(|| missing("exp_avg_sq"))?;

        if exp_avg.len() != exp_avg_sq.len() {
            return Err(Error::unsupported_optimizer(format!(
                "moment vectors differ in length: {} vs {}",
                exp_avg.len(),
                exp_avg_sq.len()
            )));
        }

        Ok(GlobalBucket {
            step,
            exp_avg,
            exp_avg_sq,
        })
    }
}
