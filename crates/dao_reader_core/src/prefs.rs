//! crates/dao_reader_core/src/prefs.rs
//!
//! Typed accessors over the small persisted key/value state: the last viewed
//! chapter and the two display-preference flags.

use std::sync::Arc;

use crate::ports::PreferenceStore;

pub const LAST_CHAPTER_KEY: &str = "lastChapter";
pub const TEXT_VIEW_KEY: &str = "textView";
pub const LINE_VIEW_KEY: &str = "lineView";

/// Which texts the chapter body shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextView {
    #[default]
    Both,
    Original,
    Translation,
}

impl TextView {
    fn as_str(&self) -> &'static str {
        match self {
            TextView::Both => "both",
            TextView::Original => "original",
            TextView::Translation => "translation",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "both" => Some(TextView::Both),
            "original" => Some(TextView::Original),
            "translation" => Some(TextView::Translation),
            _ => None,
        }
    }
}

/// How line pairs are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineView {
    #[default]
    Stacked,
    Parallel,
}

impl LineView {
    fn as_str(&self) -> &'static str {
        match self {
            LineView::Stacked => "stacked",
            LineView::Parallel => "parallel",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "stacked" => Some(LineView::Stacked),
            "parallel" => Some(LineView::Parallel),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct Preferences {
    store: Arc<dyn PreferenceStore>,
}

impl Preferences {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    pub fn last_chapter(&self) -> Option<u32> {
        self.store.get(LAST_CHAPTER_KEY)?.parse().ok()
    }

    pub fn set_last_chapter(&self, chapter: u32) {
        self.store.set(LAST_CHAPTER_KEY, &chapter.to_string());
    }

    pub fn text_view(&self) -> TextView {
        self.store
            .get(TEXT_VIEW_KEY)
            .and_then(|v| TextView::parse(&v))
            .unwrap_or_default()
    }

    pub fn set_text_view(&self, view: TextView) {
        self.store.set(TEXT_VIEW_KEY, view.as_str());
    }

    pub fn line_view(&self) -> LineView {
        self.store
            .get(LINE_VIEW_KEY)
            .and_then(|v| LineView::parse(&v))
            .unwrap_or_default()
    }

    pub fn set_line_view(&self, view: LineView) {
        self.store.set(LINE_VIEW_KEY, view.as_str());
    }
}
