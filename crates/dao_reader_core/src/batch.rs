//! crates/dao_reader_core/src/batch.rs
//!
//! Administrative bulk maintenance of the chapter corpus: a read-side audit,
//! upload normalization, and a chunked upsert that respects the store's
//! per-transaction operation ceiling.

use std::pin::Pin;
use std::sync::Arc;

use async_stream::try_stream;
use futures::Stream;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::domain::ChapterRecord;
use crate::ports::{ChapterUpsert, CorpusStore, StoreError, MAX_BATCH_OPS};

/// How many sample chapter ids the audit keeps per missing field.
const AUDIT_SAMPLE_CAP: usize = 10;

//=========================================================================================
// Corpus audit
//=========================================================================================

/// Per-field missing counts across the corpus, with a few sample chapter ids
/// for the fields an operator usually fixes first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorpusAudit {
    pub total: usize,
    pub missing_title: usize,
    pub missing_tags: usize,
    pub missing_subtitle: usize,
    pub missing_lines: usize,
    pub missing_analysis: usize,
    /// Records missing at least one of the above.
    pub missing_any: usize,
    pub sample_no_title: Vec<u32>,
    pub sample_no_tags: Vec<u32>,
}

/// Pure read-side audit; mutates nothing.
pub fn inspect(records: &[ChapterRecord]) -> CorpusAudit {
    let mut audit = CorpusAudit {
        total: records.len(),
        ..CorpusAudit::default()
    };

    for record in records {
        let no_title = record
            .title
            .as_deref()
            .map_or(true, |t| t.trim().is_empty());
        let no_tags = record.tags.as_deref().map_or(true, |t| t.is_empty());
        let no_subtitle = record
            .subtitle
            .as_deref()
            .map_or(true, |s| s.trim().is_empty());
        let no_lines = record.lines.is_empty();
        let no_analysis = record
            .analysis
            .as_ref()
            .map_or(true, |a| a.sections.is_empty());

        if no_title {
            audit.missing_title += 1;
            if audit.sample_no_title.len() < AUDIT_SAMPLE_CAP {
                audit.sample_no_title.push(record.chapter);
            }
        }
        if no_tags {
            audit.missing_tags += 1;
            if audit.sample_no_tags.len() < AUDIT_SAMPLE_CAP {
                audit.sample_no_tags.push(record.chapter);
            }
        }
        if no_subtitle {
            audit.missing_subtitle += 1;
        }
        if no_lines {
            audit.missing_lines += 1;
        }
        if no_analysis {
            audit.missing_analysis += 1;
        }
        if no_title || no_tags || no_subtitle || no_lines || no_analysis {
            audit.missing_any += 1;
        }
    }

    audit
}

//=========================================================================================
// Upload normalization
//=========================================================================================

fn chapter_key(value: Option<&Value>) -> Option<u32> {
    match value? {
        Value::Number(n) => {
            if let Some(k) = n.as_u64() {
                u32::try_from(k).ok()
            } else {
                // Tolerate integral floats from hand-edited files.
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= 0.0)
                    .map(|f| f as u32)
            }
        }
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|&k| k >= 1)
}

/// Turns one raw uploaded object into an upsert, or `None` when it has no
/// valid numeric chapter key (the record is dropped from the batch without
/// erroring the whole upload).
///
/// Only fields actually present and non-empty in the input are carried, so a
/// merge upsert never clobbers an existing title, subtitle, or tag set with a
/// blank one.
pub fn normalize_for_upload(raw: &Value) -> Option<ChapterUpsert> {
    let chapter = chapter_key(raw.get("chapter"))?;

    let mut data = Map::new();
    data.insert("chapter".to_string(), json!(chapter));

    for field in ["title", "subtitle"] {
        if let Some(text) = raw.get(field).and_then(Value::as_str) {
            let text = text.trim();
            if !text.is_empty() {
                data.insert(field.to_string(), json!(text));
            }
        }
    }

    if let Some(tags) = raw.get("tags").and_then(Value::as_array) {
        let tags: Vec<String> = tags
            .iter()
            .filter_map(Value::as_str)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if !tags.is_empty() {
            data.insert("tags".to_string(), json!(tags));
        }
    }

    if let Some(lines) = raw.get("lines").and_then(Value::as_array) {
        if !lines.is_empty() {
            data.insert("lines".to_string(), Value::Array(lines.clone()));
        }
    }

    if let Some(analysis) = raw.get("analysis").and_then(Value::as_object) {
        let has_sections = analysis
            .get("sections")
            .and_then(Value::as_array)
            .map_or(false, |s| !s.is_empty());
        let has_key_sentence = analysis
            .get("keySentence")
            .and_then(Value::as_str)
            .map_or(false, |s| !s.trim().is_empty());
        if has_sections || has_key_sentence {
            data.insert("analysis".to_string(), Value::Object(analysis.clone()));
        }
    }

    Some(ChapterUpsert {
        chapter,
        data: Value::Object(data),
    })
}

//=========================================================================================
// Chunked upsert
//=========================================================================================

/// Cumulative progress after a chunk commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub committed: usize,
    pub total: usize,
}

/// A chunk commit failed. Chunks committed before it stay committed; the
/// remaining chunks were never attempted.
#[derive(Debug, thiserror::Error)]
#[error("batch aborted after {committed} of {total} records: {source}")]
pub struct BatchError {
    pub committed: usize,
    pub total: usize,
    #[source]
    pub source: StoreError,
}

pub type BatchProgressStream = Pin<Box<dyn Stream<Item = Result<BatchProgress, BatchError>> + Send>>;

/// Upserts `records` in sequential chunks of at most [`MAX_BATCH_OPS`]
/// operations, each chunk one atomic transaction, yielding the cumulative
/// committed count after every commit. The first failing chunk aborts the
/// rest; there is no cross-chunk rollback. `merge` selects field-level merge
/// versus whole-record replace.
pub fn run_batch_upsert(
    store: Arc<dyn CorpusStore>,
    records: Vec<ChapterUpsert>,
    merge: bool,
) -> BatchProgressStream {
    Box::pin(try_stream! {
        let total = records.len();
        let mut committed = 0usize;
        for chunk in records.chunks(MAX_BATCH_OPS) {
            store
                .commit_batch(chunk, merge)
                .await
                .map_err(|source| BatchError { committed, total, source })?;
            committed += chunk.len();
            info!(committed, total, merge, "batch chunk committed");
            yield BatchProgress { committed, total };
        }
    })
}
