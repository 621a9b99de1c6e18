//! Layout planning.
//!
//! Walks the parameter map once, in checkpoint order, and produces the
//! ordered [`LayoutEntry`] sequence together with the transformed values. The
//! resulting [`LayoutPlan`] is immutable; the serializer and the optimizer
//! aligner both read the same plan, so their orderings cannot diverge.
//!
//! Ordering rules:
//!
//! ```text
//! main pass (checkpoint order)         tail (fixed order)
//! ┌───────────────────────────────┐   ┌─────────┬─────────┬────────┐
//! │ q k v │ out │ ln │ fc1 │ ...  │ + │ enc emb │ dec emb │ output │
//! └───────────────────────────────┘   └─────────┴─────────┴────────┘
//!                                        always   unshared  untied
//! ```
//!
//! `start` is the running offset over emitted values instead: it advances by
//! each entry's count as entries are encountered, embeddings included, so an
//! embedding keeps the offset of its original position even though its entry
//! moves to the tail. Skipped scalars and omitted embeddings emit nothing and
//! do not advance it.

mod strided;

pub use strided::MatrixView;

use std::borrow::Cow;

use serde::Serialize;
use tracing::{debug, info, warn};

use nmtpack_core::{element_count, Error, Result, Tensor};

use crate::arch::Sharing;
use crate::checkpoint::ParameterMap;
use crate::classify::{
    classify, ParameterClass, DECODER_EMBEDDING, DECODER_OUTPUT_EMBEDDING, ENCODER_EMBEDDING,
};

/// Whether an entry's values were transposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transform {
    Transposed,
    Untransformed,
}

/// One contiguous block of the parameter region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayoutEntry {
    pub transform: Transform,
    /// Name of the parameter the values came from.
    pub source: String,
    /// Shape as stored in the artifact.
    pub shape: Vec<usize>,
    /// Running offset over emitted values, taken where the source was encountered.
    pub start: usize,
    pub count: usize,
}

impl LayoutEntry {
    /// `start..start + count`: where this entry's values sit among all emitted
    /// values in encounter order.
    pub fn training_range(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.count
    }
}

/// The ordered entries and their values.
#[derive(Debug)]
pub struct LayoutPlan<'a> {
    entries: Vec<LayoutEntry>,
    values: Vec<Cow<'a, [f32]>>,
    skipped: Vec<String>,
    omitted: Vec<String>,
}

impl<'a> LayoutPlan<'a> {
    /// Entries in artifact order.
    pub fn entries(&self) -> &[LayoutEntry] {
        &self.entries
    }

    /// One value block per entry, index-aligned with [`entries`](Self::entries).
    pub fn values(&self) -> &[Cow<'a, [f32]>] {
        &self.values
    }

    /// `(entry, values)` pairs in artifact order.
    pub fn iter(&self) -> impl Iterator<Item = (&LayoutEntry, &[f32])> {
        self.entries.iter().zip(self.values.iter().map(|v| v.as_ref()))
    }

    /// Names of one-element parameters that were dropped.
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    /// Names of shared embeddings that were not written.
    pub fn omitted(&self) -> &[String] {
        &self.omitted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of values in the parameter region.
    pub fn total_values(&self) -> usize {
        self.entries.iter().map(|e| e.count).sum()
    }
}

type Block<'a> = (LayoutEntry, Cow<'a, [f32]>);

/// Accumulates entries while the running offset over emitted values advances.
struct Assembly<'a> {
    entries: Vec<LayoutEntry>,
    values: Vec<Cow<'a, [f32]>>,
    cursor: usize,
}

impl<'a> Assembly<'a> {
    fn block(
        &mut self,
        source: &str,
        transform: Transform,
        shape: Vec<usize>,
        values: Cow<'a, [f32]>,
    ) -> Block<'a> {
        let entry = LayoutEntry {
            transform,
            source: source.to_string(),
            shape,
            start: self.cursor,
            count: values.len(),
        };
        self.cursor += entry.count;
        (entry, values)
    }

    fn push(
        &mut self,
        source: &str,
        transform: Transform,
        shape: Vec<usize>,
        values: Cow<'a, [f32]>,
    ) {
        let (entry, values) = self.block(source, transform, shape, values);
        debug!(
            source = %entry.source,
            shape = ?entry.shape,
            start = entry.start,
            count = entry.count,
            "layout entry"
        );
        self.entries.push(entry);
        self.values.push(values);
    }

    /// Assigns an embedding its running offset now; the entry itself
    /// is appended after the main pass.
    fn defer(
        &mut self,
        slot: &mut Option<Block<'a>>,
        class: ParameterClass,
        name: &str,
        tensor: &'a Tensor,
    ) -> Result<()> {
        if slot.is_some() {
            return Err(Error::shape_mismatch(format!(
                "more than one parameter classified as {} ('{}')",
                class.name(),
                name
            )));
        }
        *slot = Some(self.block(
            name,
            Transform::Untransformed,
            tensor.shape().to_vec(),
            Cow::Borrowed(tensor.data()),
        ));
        Ok(())
    }
}

/// Builds [`LayoutPlan`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct LayoutPlanner {
    sharing: Sharing,
}

impl LayoutPlanner {
    pub fn new(sharing: Sharing) -> Self {
        Self { sharing }
    }

    /// Plans the parameter region.
    ///
    /// Untransformed values are borrowed from `params`; only transposed
    /// blocks are copied.
    pub fn plan<'a>(&self, params: &'a ParameterMap) -> Result<LayoutPlan<'a>> {
        let mut asm = Assembly {
            entries: Vec::with_capacity(params.len()),
            values: Vec::with_capacity(params.len()),
            cursor: 0,
        };
        let mut encoder: Option<Block<'a>> = None;
        let mut decoder: Option<Block<'a>> = None;
        let mut output: Option<Block<'a>> = None;
        let mut skipped = Vec::new();
        let mut omitted = Vec::new();
        let mut expected = 0usize;

        for (name, tensor) in params.iter() {
            let class = classify(name, tensor, self.sharing)?;
            expected += expected_count(class, tensor.shape());

            match class {
                ParameterClass::EncoderEmbedding => asm.defer(&mut encoder, class, name, tensor)?,
                ParameterClass::DecoderEmbedding { omitted: false } => {
                    asm.defer(&mut decoder, class, name, tensor)?
                }
                ParameterClass::DecoderOutputEmbedding { omitted: false } => {
                    asm.defer(&mut output, class, name, tensor)?
                }
                ParameterClass::DecoderEmbedding { omitted: true }
                | ParameterClass::DecoderOutputEmbedding { omitted: true } => {
                    debug!(name = %name, "shared embedding omitted");
                    omitted.push(name.to_string());
                }
                ParameterClass::SkipScalar => {
                    warn!(name = %name, shape = ?tensor.shape(), "dropping one-element parameter");
                    skipped.push(name.to_string());
                }
                ParameterClass::FusedQkv => {
                    let view = matrix(name, tensor)?;
                    if view.rows() % 3 != 0 {
                        return Err(Error::shape_mismatch(format!(
                            "fused projection '{}' has {} rows, not divisible by 3",
                            name,
                            view.rows()
                        )));
                    }
                    let d = view.rows() / 3;
                    // Query, key, value.
                    for b in 0..3 {
                        let block = view.row_block(b * d, (b + 1) * d)?;
                        asm.push(
                            name,
                            Transform::Transposed,
                            vec![view.cols(), d],
                            Cow::Owned(block.transpose()),
                        );
                    }
                }
                ParameterClass::HistoryWeight => {
                    let view = matrix(name, tensor)?;
                    if view.cols() < view.rows() {
                        return Err(Error::shape_mismatch(format!(
                            "history weight '{}' is {}x{}, needs at least as many columns as rows",
                            name,
                            view.rows(),
                            view.cols()
                        )));
                    }
                    // Row i keeps columns 0..=i; a single row transposes to itself.
                    for i in 0..view.rows() {
                        let prefix = view.row_prefix(i, i + 1)?;
                        asm.push(name, Transform::Transposed, vec![i + 1], Cow::Borrowed(prefix));
                    }
                }
                ParameterClass::PlainMatrix if tensor.rank() == 1 => {
                    // A one-dimensional "weight" transposes to itself.
                    asm.push(
                        name,
                        Transform::Transposed,
                        tensor.shape().to_vec(),
                        Cow::Borrowed(tensor.data()),
                    );
                }
                ParameterClass::PlainMatrix => {
                    let view = matrix(name, tensor)?;
                    asm.push(
                        name,
                        Transform::Transposed,
                        vec![view.cols(), view.rows()],
                        Cow::Owned(view.transpose()),
                    );
                }
                ParameterClass::PlainVector => asm.push(
                    name,
                    Transform::Untransformed,
                    tensor.shape().to_vec(),
                    Cow::Borrowed(tensor.data()),
                ),
            }
        }

        let encoder = encoder.ok_or_else(|| missing_embedding(ENCODER_EMBEDDING))?;
        if decoder.is_none() && !self.sharing.share_all_embeddings {
            return Err(missing_embedding(DECODER_EMBEDDING));
        }
        if output.is_none() && !self.sharing.share_decoder_input_output_embed {
            return Err(missing_embedding(DECODER_OUTPUT_EMBEDDING));
        }

        let Assembly {
            mut entries,
            mut values,
            ..
        } = asm;
        for (entry, block) in std::iter::once(encoder).chain(decoder).chain(output) {
            debug!(source = %entry.source, start = entry.start, count = entry.count, "tail embedding");
            entries.push(entry);
            values.push(block);
        }

        let plan = LayoutPlan {
            entries,
            values,
            skipped,
            omitted,
        };
        let total = plan.total_values();
        if total != expected {
            return Err(Error::shape_mismatch(format!(
                "layout holds {} values but the parameters account for {}",
                total, expected
            )));
        }

        info!(
            entries = plan.len(),
            values = total,
            skipped = plan.skipped.len(),
            omitted = plan.omitted.len(),
            "Planned parameter layout"
        );
        Ok(plan)
    }
}

/// Values a raw parameter contributes to the layout, from its class and
/// shape alone.
pub fn expected_count(class: ParameterClass, shape: &[usize]) -> usize {
    match class {
        ParameterClass::SkipScalar => 0,
        c if !c.is_emitted() => 0,
        ParameterClass::HistoryWeight => {
            let rows = shape.first().copied().unwrap_or(0);
            rows * (rows + 1) / 2
        }
        _ => element_count(shape),
    }
}

fn matrix<'a>(name: &str, tensor: &'a Tensor) -> Result<MatrixView<'a>> {
    match tensor.shape() {
        [rows, cols] => MatrixView::new(tensor.data(), *rows, *cols),
        shape => Err(Error::shape_mismatch(format!(
            "'{}' must be two-dimensional, has shape {:?}",
            name, shape
        ))),
    }
}

fn missing_embedding(name: &str) -> Error {
    Error::shape_mismatch(format!("required embedding '{}' is not in the checkpoint", name))
}
