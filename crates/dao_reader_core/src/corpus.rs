//! crates/dao_reader_core/src/corpus.rs
//!
//! One-shot in-memory cache of the chapter corpus. Loaded once per session,
//! sorted by chapter number, and handed to the filtering layer as an
//! immutable snapshot.

use std::sync::{Arc, Mutex};

use tracing::{error, warn};

use crate::domain::{ChapterRecord, StoryRecord};
use crate::ports::{CorpusStore, StoreError, StoreResult};

/// The cache's tri-state view: data, loading flag, error. On failure `chapters`
/// is the empty list, never a partial one, so consumers need no null-checks.
#[derive(Debug, Clone)]
pub struct CorpusSnapshot {
    pub chapters: Arc<Vec<ChapterRecord>>,
    pub is_loading: bool,
    pub error: Option<StoreError>,
}

impl Default for CorpusSnapshot {
    fn default() -> Self {
        Self {
            chapters: Arc::new(Vec::new()),
            is_loading: true,
            error: None,
        }
    }
}

pub struct CorpusCache {
    store: Arc<dyn CorpusStore>,
    state: Mutex<CorpusSnapshot>,
}

impl CorpusCache {
    pub fn new(store: Arc<dyn CorpusStore>) -> Self {
        Self {
            store,
            state: Mutex::new(CorpusSnapshot::default()),
        }
    }

    pub fn snapshot(&self) -> CorpusSnapshot {
        self.state.lock().expect("corpus state lock poisoned").clone()
    }

    /// Loads the full corpus. Documents without a valid numeric chapter key
    /// are skipped rather than failing the load; a store error yields an
    /// empty corpus plus the error. Idempotent, so a manual reload just calls
    /// this again.
    pub async fn load(&self) -> CorpusSnapshot {
        {
            let mut state = self.state.lock().expect("corpus state lock poisoned");
            state.is_loading = true;
            state.error = None;
        }

        let snapshot = match self.store.fetch_chapters().await {
            Ok(docs) => {
                let mut chapters: Vec<ChapterRecord> =
                    docs.iter().filter_map(ChapterRecord::from_doc).collect();
                let skipped = docs.len() - chapters.len();
                if skipped > 0 {
                    warn!(skipped, "skipped chapter documents without a numeric key");
                }
                chapters.sort_by_key(|c| c.chapter);
                CorpusSnapshot {
                    chapters: Arc::new(chapters),
                    is_loading: false,
                    error: None,
                }
            }
            Err(err) => {
                error!(error = %err, "corpus load failed");
                CorpusSnapshot {
                    chapters: Arc::new(Vec::new()),
                    is_loading: false,
                    error: Some(err),
                }
            }
        };

        *self.state.lock().expect("corpus state lock poisoned") = snapshot.clone();
        snapshot
    }

    /// Fetches the story attached to a chapter, if any. Stories are loaded on
    /// demand and are not part of the cached corpus.
    pub async fn story(&self, chapter: u32) -> StoreResult<Option<StoryRecord>> {
        self.store.fetch_story(chapter).await
    }
}
