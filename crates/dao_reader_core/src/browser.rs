//! crates/dao_reader_core/src/browser.rs
//!
//! Selection and navigation over the filtered corpus: restores the last
//! viewed chapter, keeps the selection valid as filters change, and computes
//! prev/next neighbours without wraparound.

use std::collections::BTreeSet;

use crate::domain::ChapterRecord;
use crate::filter::{visible_chapters, ChapterFilter, FilterMode};
use crate::prefs::Preferences;

/// How many chapters one range window spans when jumping to a chapter from
/// the saved drawer.
const RANGE_WINDOW: u32 = 10;

pub struct ChapterBrowser {
    prefs: Preferences,
    filter: ChapterFilter,
    visible: Vec<u32>,
    selected: Option<u32>,
}

impl ChapterBrowser {
    pub fn new(prefs: Preferences) -> Self {
        Self {
            prefs,
            filter: ChapterFilter::default(),
            visible: Vec::new(),
            selected: None,
        }
    }

    pub fn filter(&self) -> &ChapterFilter {
        &self.filter
    }

    /// Visible chapter numbers, ascending.
    pub fn visible(&self) -> &[u32] {
        &self.visible
    }

    pub fn selected(&self) -> Option<u32> {
        self.selected
    }

    pub fn set_mode(&mut self, corpus: &[ChapterRecord], mode: FilterMode) {
        self.filter.mode = mode;
        self.refresh(corpus);
    }

    pub fn set_range(&mut self, corpus: &[ChapterRecord], start: u32, end: u32) {
        self.filter.start = start;
        self.filter.end = end;
        self.refresh(corpus);
    }

    pub fn set_tags(&mut self, corpus: &[ChapterRecord], tags: BTreeSet<String>) {
        self.filter.selected_tags = tags;
        self.refresh(corpus);
    }

    pub fn set_query(&mut self, corpus: &[ChapterRecord], query: impl Into<String>) {
        self.filter.query = query.into();
        self.refresh(corpus);
    }

    /// Recomputes the visible set and repairs the selection: none when the
    /// set is empty, otherwise the persisted last-viewed chapter when it is
    /// still visible, otherwise the first visible chapter.
    pub fn refresh(&mut self, corpus: &[ChapterRecord]) {
        self.visible = visible_chapters(corpus, &self.filter)
            .iter()
            .map(|c| c.chapter)
            .collect();

        if self.visible.is_empty() {
            self.selected = None;
            return;
        }

        let target = self
            .prefs
            .last_chapter()
            .filter(|n| self.visible.contains(n))
            .unwrap_or(self.visible[0]);
        self.apply_selection(target);
    }

    /// Selects a visible chapter. Returns false (selection unchanged) when
    /// the chapter is not in the visible set.
    pub fn select(&mut self, chapter: u32) -> bool {
        if !self.visible.contains(&chapter) {
            return false;
        }
        self.apply_selection(chapter);
        true
    }

    fn apply_selection(&mut self, chapter: u32) {
        self.selected = Some(chapter);
        self.prefs.set_last_chapter(chapter);
    }

    fn selected_index(&self) -> Option<usize> {
        let selected = self.selected?;
        self.visible.iter().position(|&n| n == selected)
    }

    /// The previous visible chapter, absent at the start of the list.
    pub fn prev(&self) -> Option<u32> {
        let index = self.selected_index()?;
        index.checked_sub(1).map(|i| self.visible[i])
    }

    /// The next visible chapter, absent at the end of the list.
    pub fn next(&self) -> Option<u32> {
        let index = self.selected_index()?;
        self.visible.get(index + 1).copied()
    }

    /// Jumps straight to a chapter from outside the current view (the saved
    /// drawer): clears tags and query, snaps the range to the enclosing
    /// ten-chapter window clamped to the corpus, then selects the chapter.
    pub fn open_chapter(&mut self, corpus: &[ChapterRecord], chapter: u32) -> bool {
        if !corpus.iter().any(|c| c.chapter == chapter) {
            return false;
        }
        let max = corpus.iter().map(|c| c.chapter).max().unwrap_or(chapter);
        let start = ((chapter - 1) / RANGE_WINDOW) * RANGE_WINDOW + 1;
        let end = (start + RANGE_WINDOW - 1).min(max);

        self.filter = ChapterFilter {
            mode: FilterMode::Range,
            start,
            end,
            ..ChapterFilter::default()
        };
        self.refresh(corpus);
        self.select(chapter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPrefs;
    use crate::ports::PreferenceStore;
    use crate::prefs::LAST_CHAPTER_KEY;
    use std::sync::Arc;

    fn corpus(range: std::ops::RangeInclusive<u32>) -> Vec<ChapterRecord> {
        range
            .map(|n| ChapterRecord {
                chapter: n,
                title: Some(format!("Chapter {n}")),
                subtitle: None,
                tags: None,
                lines: Vec::new(),
                analysis: None,
            })
            .collect()
    }

    fn browser_with_last(last: Option<u32>) -> (ChapterBrowser, Arc<MemoryPrefs>) {
        let store = Arc::new(MemoryPrefs::default());
        if let Some(n) = last {
            store.set(LAST_CHAPTER_KEY, &n.to_string());
        }
        (ChapterBrowser::new(Preferences::new(store.clone())), store)
    }

    #[test]
    fn restores_persisted_selection_when_visible() {
        let corpus = corpus(1..=20);
        let (mut browser, _store) = browser_with_last(Some(7));
        browser.refresh(&corpus);
        assert_eq!(browser.selected(), Some(7));
    }

    #[test]
    fn falls_back_to_first_visible_and_persists_it() {
        let corpus = corpus(1..=20);
        let (mut browser, store) = browser_with_last(Some(99));
        browser.refresh(&corpus);
        assert_eq!(browser.selected(), Some(1));
        assert_eq!(store.get(LAST_CHAPTER_KEY).as_deref(), Some("1"));
    }

    #[test]
    fn empty_visible_set_clears_selection() {
        let corpus = corpus(1..=20);
        let (mut browser, _store) = browser_with_last(Some(7));
        browser.set_range(&corpus, 50, 60);
        assert_eq!(browser.selected(), None);
        assert!(browser.prev().is_none());
        assert!(browser.next().is_none());
    }

    #[test]
    fn selection_persists_as_last_viewed() {
        let corpus = corpus(1..=20);
        let (mut browser, store) = browser_with_last(None);
        browser.refresh(&corpus);
        assert!(browser.select(5));
        assert_eq!(store.get(LAST_CHAPTER_KEY).as_deref(), Some("5"));
    }

    #[test]
    fn select_rejects_chapters_outside_the_visible_set() {
        let corpus = corpus(1..=20);
        let (mut browser, _store) = browser_with_last(None);
        browser.refresh(&corpus);
        assert!(!browser.select(15));
        assert_eq!(browser.selected(), Some(1));
    }

    #[test]
    fn prev_and_next_stop_at_the_boundaries() {
        let corpus = corpus(1..=20);
        let (mut browser, _store) = browser_with_last(None);
        browser.refresh(&corpus);

        assert!(browser.select(1));
        assert_eq!(browser.prev(), None);
        assert_eq!(browser.next(), Some(2));

        assert!(browser.select(10));
        assert_eq!(browser.prev(), Some(9));
        assert_eq!(browser.next(), None);
    }

    #[test]
    fn tag_mode_through_the_browser_refilters_and_reselects() {
        let mut corpus = corpus(1..=20);
        for chapter in corpus.iter_mut().filter(|c| c.chapter % 4 == 0) {
            chapter.tags = Some(vec!["water".to_string()]);
        }

        let (mut browser, _store) = browser_with_last(Some(8));
        browser.set_mode(&corpus, FilterMode::Tag);
        assert_eq!(browser.visible().len(), 20); // no tags selected yet

        browser.set_tags(&corpus, BTreeSet::from(["water".to_string()]));
        assert_eq!(browser.visible(), &[4, 8, 12, 16, 20]);
        assert_eq!(browser.selected(), Some(8));
    }

    #[test]
    fn open_chapter_snaps_the_range_window() {
        let corpus = corpus(1..=30);
        let (mut browser, _store) = browser_with_last(None);
        browser.set_query(&corpus, "nothing matches this");
        assert!(browser.open_chapter(&corpus, 17));
        assert_eq!(browser.filter().start, 11);
        assert_eq!(browser.filter().end, 20);
        assert!(browser.filter().query.is_empty());
        assert_eq!(browser.selected(), Some(17));
    }

    #[test]
    fn open_chapter_clamps_to_the_corpus_end() {
        let corpus = corpus(1..=15);
        let (mut browser, _store) = browser_with_last(None);
        assert!(browser.open_chapter(&corpus, 14));
        assert_eq!(browser.filter().start, 11);
        assert_eq!(browser.filter().end, 15);
        assert_eq!(browser.selected(), Some(14));
    }

    #[test]
    fn open_chapter_rejects_unknown_chapters() {
        let corpus = corpus(1..=15);
        let (mut browser, _store) = browser_with_last(None);
        browser.refresh(&corpus);
        assert!(!browser.open_chapter(&corpus, 40));
        assert_eq!(browser.selected(), Some(1));
    }
}
