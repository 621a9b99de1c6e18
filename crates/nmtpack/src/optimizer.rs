//! Optimizer moment alignment.
//!
//! Mixed-precision trainers keep Adam moments as one flat vector per moment.
//! A layout entry's `start` is the running offset over emitted values, so its
//! `start..start + count` range in that vector holds the moments of exactly
//! the values the entry writes, but before any transpose. The aligner slices those ranges in
//! artifact order and applies the same transpose, so moment `k` of the
//! optimizer region always belongs to value `k` of the parameter region.

use std::borrow::Cow;

use tracing::info;

use nmtpack_core::{Error, Result};

use crate::checkpoint::OptimizerState;
use crate::layout::{LayoutEntry, LayoutPlan, MatrixView, Transform};

/// Moments re-sliced to match a [`LayoutPlan`].
#[derive(Debug)]
pub struct OptimizerMomentRecord<'s> {
    pub step: i32,
    /// First-moment blocks, one per layout entry.
    pub exp_avg: Vec<Cow<'s, [f32]>>,
    /// Second-moment blocks, one per layout entry.
    pub exp_avg_sq: Vec<Cow<'s, [f32]>>,
}

impl OptimizerMomentRecord<'_> {
    /// Number of values in each moment region.
    pub fn values_per_moment(&self) -> usize {
        self.exp_avg.iter().map(|b| b.len()).sum()
    }
}

/// Aligns optimizer moments with a layout plan.
pub struct OptimizerAligner<'p, 'a> {
    plan: &'p LayoutPlan<'a>,
}

impl<'p, 'a> OptimizerAligner<'p, 'a> {
    pub fn new(plan: &'p LayoutPlan<'a>) -> Self {
        Self { plan }
    }

    /// Slices and transposes both moment vectors entry by entry.
    ///
    /// `state` is `None` when the checkpoint has no optimizer state, which is
    /// an error here: callers only align when export was requested.
    pub fn align<'s>(
        &self,
        state: Option<&'s OptimizerState>,
    ) -> Result<OptimizerMomentRecord<'s>> {
        let state = state.ok_or_else(|| {
            Error::unsupported_optimizer("optimizer export requested but the checkpoint has none")
        })?;
        let bucket = state.global_bucket()?;
        let step = i32::try_from(bucket.step).map_err(|_| {
            Error::unsupported_optimizer(format!("step {} does not fit in 32 bits", bucket.step))
        })?;

        let entries = self.plan.entries();
        let mut exp_avg = Vec::with_capacity(entries.len());
        let mut exp_avg_sq = Vec::with_capacity(entries.len());
        for entry in entries {
            exp_avg.push(align_entry(entry, bucket.exp_avg, "exp_avg")?);
            exp_avg_sq.push(align_entry(entry, bucket.exp_avg_sq, "exp_avg_sq")?);
        }

        let record = OptimizerMomentRecord {
            step,
            exp_avg,
            exp_avg_sq,
        };
        info!(
            step,
            values = record.values_per_moment(),
            available = bucket.exp_avg.len(),
            "Aligned optimizer moments"
        );
        Ok(record)
    }
}

fn align_entry<'s>(
    entry: &LayoutEntry,
    moments: &'s [f32],
    which: &str,
) -> Result<Cow<'s, [f32]>> {
    let slice = moments.get(entry.training_range()).ok_or_else(|| {
        Error::unsupported_optimizer(format!(
            "{} range {}..{} for '{}' is outside the {} stored values",
            which,
            entry.start,
            entry.start + entry.count,
            entry.source,
            moments.len()
        ))
    })?;

    match (entry.transform, entry.shape.as_slice()) {
        // Stored shape is [a, b]; the training layout was [b, a].
        (Transform::Transposed, &[a, b]) => {
            let view = MatrixView::new(slice, b, a)?;
            Ok(Cow::Owned(view.transpose()))
        }
        _ => Ok(Cow::Borrowed(slice)),
    }
}
