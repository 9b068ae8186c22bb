//! crates/dao_reader_core/src/filter.rs
//!
//! Pure filtering over the in-memory corpus: a mode filter (chapter range or
//! tag membership) composed with a free-text substring search.

use std::collections::BTreeSet;

use crate::domain::ChapterRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    #[default]
    Range,
    Tag,
}

/// The reader's current view settings. Range bounds are inclusive on both
/// ends; an empty tag selection in tag mode keeps everything.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterFilter {
    pub mode: FilterMode,
    pub start: u32,
    pub end: u32,
    pub selected_tags: BTreeSet<String>,
    pub query: String,
}

impl Default for ChapterFilter {
    fn default() -> Self {
        Self {
            mode: FilterMode::Range,
            start: 1,
            end: 10,
            selected_tags: BTreeSet::new(),
            query: String::new(),
        }
    }
}

impl ChapterFilter {
    fn mode_keeps(&self, chapter: &ChapterRecord) -> bool {
        match self.mode {
            FilterMode::Range => chapter.chapter >= self.start && chapter.chapter <= self.end,
            FilterMode::Tag => {
                if self.selected_tags.is_empty() {
                    return true;
                }
                chapter
                    .tags
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .any(|tag| self.selected_tags.contains(tag))
            }
        }
    }
}

/// Applies the mode filter, then the query, preserving corpus order. The
/// query is trimmed and matched case-insensitively as a plain substring of
/// each chapter's searchable blob.
pub fn visible_chapters<'a>(
    corpus: &'a [ChapterRecord],
    filter: &ChapterFilter,
) -> Vec<&'a ChapterRecord> {
    let mut visible: Vec<&ChapterRecord> =
        corpus.iter().filter(|c| filter.mode_keeps(c)).collect();

    let query = filter.query.trim().to_lowercase();
    if !query.is_empty() {
        visible.retain(|c| c.search_blob().contains(&query));
    }

    visible
}

/// Every distinct tag in the corpus, sorted, for the tag picker.
pub fn all_tags(corpus: &[ChapterRecord]) -> Vec<String> {
    let mut tags: BTreeSet<String> = BTreeSet::new();
    for chapter in corpus {
        for tag in chapter.tags.as_deref().unwrap_or_default() {
            tags.insert(tag.clone());
        }
    }
    tags.into_iter().collect()
}
