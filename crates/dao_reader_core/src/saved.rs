//! crates/dao_reader_core/src/saved.rs
//!
//! Coordinates bookmark and clip mutations: each call applies the change to
//! local state first, then confirms against the store, reverting local state
//! if the write fails. Rapid repeated toggles of the same chapter are
//! de-duplicated per key so a stale completion can never clobber a newer
//! request's state.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{ChapterRecord, ClipKind, ClipPayload, ClipRecord, NewClip, Subject};
use crate::ports::{CorpusStore, StoreError};

/// Cap on how many clips one refresh pulls from the store.
const CLIP_FETCH_LIMIT: usize = 300;

#[derive(Debug, thiserror::Error)]
pub enum SavedError {
    /// Rejected locally before any remote call.
    #[error("sign in to save")]
    NoSubject,
    /// Rejected locally before any remote call.
    #[error("nothing to save")]
    EmptyText,
    #[error("clip not found")]
    UnknownClip,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What happened to a toggle request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// The write confirmed and local state reflects it.
    Committed,
    /// A newer toggle for the same chapter took over while this write was in
    /// flight; local state belongs to that newer request.
    Superseded,
}

#[derive(Default)]
struct SavedState {
    bookmarks: BTreeSet<u32>,
    clips: Vec<ClipRecord>,
}

pub struct SavedCoordinator {
    store: Arc<dyn CorpusStore>,
    state: Mutex<SavedState>,
    toggle_gen: Mutex<HashMap<u32, u64>>,
}

impl SavedCoordinator {
    pub fn new(store: Arc<dyn CorpusStore>) -> Self {
        Self {
            store,
            state: Mutex::new(SavedState::default()),
            toggle_gen: Mutex::new(HashMap::new()),
        }
    }

    /// Loads one chapter's saved state into local view state (the chapter
    /// view's initial read).
    pub async fn load_bookmark(
        &self,
        subject: Option<&Subject>,
        chapter: u32,
    ) -> Result<bool, SavedError> {
        let subject = subject.ok_or(SavedError::NoSubject)?;
        let saved = self
            .store
            .get_bookmark(subject.id, chapter)
            .await?
            .is_some();
        let mut state = self.lock_state();
        if saved {
            state.bookmarks.insert(chapter);
        } else {
            state.bookmarks.remove(&chapter);
        }
        Ok(saved)
    }

    /// Reloads the subject's bookmarks and clips from the store. On failure
    /// the previous local state is kept.
    pub async fn refresh(&self, subject: Option<&Subject>) -> Result<(), SavedError> {
        let subject = subject.ok_or(SavedError::NoSubject)?;
        let bookmarks = self.store.list_bookmarks(subject.id).await?;
        let clips = self.store.list_clips(subject.id, CLIP_FETCH_LIMIT).await?;

        let mut state = self.lock_state();
        state.bookmarks = bookmarks.iter().map(|b| b.chapter).collect();
        state.clips = clips;
        Ok(())
    }

    pub fn is_bookmarked(&self, chapter: u32) -> bool {
        self.lock_state().bookmarks.contains(&chapter)
    }

    /// Bookmarked chapter numbers, ascending.
    pub fn bookmarks(&self) -> Vec<u32> {
        self.lock_state().bookmarks.iter().copied().collect()
    }

    /// Local clip list, newest first.
    pub fn clips(&self) -> Vec<ClipRecord> {
        self.lock_state().clips.clone()
    }

    /// Applies `next` locally, then writes it through: a create-or-refresh
    /// when saving, a record delete when un-saving (un-saving a chapter with
    /// no record is a no-op success). On failure local state reverts to its
    /// prior value and the error surfaces; on supersession local state is
    /// left to the newer request.
    pub async fn toggle_bookmark(
        &self,
        subject: Option<&Subject>,
        chapter: u32,
        next: bool,
    ) -> Result<ToggleOutcome, SavedError> {
        let subject = subject.ok_or(SavedError::NoSubject)?;

        let prior = {
            let mut state = self.lock_state();
            let prior = state.bookmarks.contains(&chapter);
            if next {
                state.bookmarks.insert(chapter);
            } else {
                state.bookmarks.remove(&chapter);
            }
            prior
        };

        let generation = {
            let mut generations = self.lock_generations();
            let entry = generations.entry(chapter).or_insert(0);
            *entry += 1;
            *entry
        };

        let result = if next {
            self.store.put_bookmark(subject.id, chapter).await
        } else {
            self.store.delete_bookmark(subject.id, chapter).await
        };

        let latest = self
            .lock_generations()
            .get(&chapter)
            .copied()
            .unwrap_or_default();
        if generation != latest {
            debug!(chapter, "bookmark toggle superseded by a newer request");
            return Ok(ToggleOutcome::Superseded);
        }

        match result {
            Ok(()) => Ok(ToggleOutcome::Committed),
            Err(err) => {
                warn!(chapter, error = %err, "bookmark write failed, reverting");
                let mut state = self.lock_state();
                if prior {
                    state.bookmarks.insert(chapter);
                } else {
                    state.bookmarks.remove(&chapter);
                }
                Err(err.into())
            }
        }
    }

    /// Saves a clip. The snapshot text was rendered by the payload builder;
    /// an empty snapshot or a missing subject is rejected before any remote
    /// call. The created record lands at the head of the local list.
    pub async fn save_clip(
        &self,
        subject: Option<&Subject>,
        chapter: &ChapterRecord,
        payload: ClipPayload,
        note: &str,
    ) -> Result<ClipRecord, SavedError> {
        let subject = subject.ok_or(SavedError::NoSubject)?;
        if payload.text.trim().is_empty() {
            return Err(SavedError::EmptyText);
        }

        let note = note.trim();
        let clip = NewClip {
            kind: payload.kind,
            chapter: chapter.chapter,
            chapter_title: chapter.title.clone(),
            text: payload.text,
            note: (!note.is_empty()).then(|| note.to_string()),
            context: payload.context,
        };

        let record = self.store.add_clip(subject.id, clip).await?;
        self.lock_state().clips.insert(0, record.clone());
        Ok(record)
    }

    /// Flips a clip's pinned flag, optimistically; reverts on write failure.
    /// Returns the new pinned state.
    pub async fn toggle_pin(
        &self,
        subject: Option<&Subject>,
        clip_id: Uuid,
    ) -> Result<bool, SavedError> {
        let subject = subject.ok_or(SavedError::NoSubject)?;

        let next = {
            let mut state = self.lock_state();
            let clip = state
                .clips
                .iter_mut()
                .find(|c| c.id == clip_id)
                .ok_or(SavedError::UnknownClip)?;
            clip.is_pinned = !clip.is_pinned;
            clip.is_pinned
        };

        match self.store.set_clip_pinned(subject.id, clip_id, next).await {
            Ok(()) => Ok(next),
            Err(err) => {
                warn!(clip = %clip_id, error = %err, "pin write failed, reverting");
                let mut state = self.lock_state();
                if let Some(clip) = state.clips.iter_mut().find(|c| c.id == clip_id) {
                    clip.is_pinned = !next;
                }
                Err(err.into())
            }
        }
    }

    /// Removes a clip, optimistically; the record is restored in place if the
    /// delete fails.
    pub async fn delete_clip(
        &self,
        subject: Option<&Subject>,
        clip_id: Uuid,
    ) -> Result<(), SavedError> {
        let subject = subject.ok_or(SavedError::NoSubject)?;

        let removed = {
            let mut state = self.lock_state();
            let index = state
                .clips
                .iter()
                .position(|c| c.id == clip_id)
                .ok_or(SavedError::UnknownClip)?;
            (index, state.clips.remove(index))
        };

        match self.store.delete_clip(subject.id, clip_id).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(clip = %clip_id, error = %err, "clip delete failed, restoring");
                let (index, record) = removed;
                let mut state = self.lock_state();
                let index = index.min(state.clips.len());
                state.clips.insert(index, record);
                Err(err.into())
            }
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SavedState> {
        self.state.lock().expect("saved state lock poisoned")
    }

    fn lock_generations(&self) -> std::sync::MutexGuard<'_, HashMap<u32, u64>> {
        self.toggle_gen.lock().expect("toggle generation lock poisoned")
    }
}

//=========================================================================================
// Saved-drawer filtering
//=========================================================================================

/// View filter for the saved drawer's clip list.
#[derive(Debug, Clone, Default)]
pub struct ClipQuery {
    pub pinned_only: bool,
    pub kind: Option<ClipKind>,
    pub chapter: Option<u32>,
    pub query: String,
}

/// Filters clips and orders pinned ones first, otherwise preserving the
/// incoming (newest-first) order.
pub fn filter_clips<'a>(clips: &'a [ClipRecord], query: &ClipQuery) -> Vec<&'a ClipRecord> {
    let needle = query.query.trim().to_lowercase();
    let mut out: Vec<&ClipRecord> = clips
        .iter()
        .filter(|c| !query.pinned_only || c.is_pinned)
        .filter(|c| query.kind.map_or(true, |k| c.kind == k))
        .filter(|c| query.chapter.map_or(true, |n| c.chapter == n))
        .filter(|c| {
            if needle.is_empty() {
                return true;
            }
            let blob = [
                c.chapter.to_string(),
                c.chapter_title.clone().unwrap_or_default(),
                c.kind.as_str().to_string(),
                c.text.clone(),
                c.note.clone().unwrap_or_default(),
                c.context.section_title.clone().unwrap_or_default(),
                c.context.section_kind.clone().unwrap_or_default(),
            ]
            .join(" ")
            .to_lowercase();
            blob.contains(&needle)
        })
        .collect();

    out.sort_by_key(|c| !c.is_pinned);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Line;
    use crate::memory::MemoryStore;
    use serde_json::json;

    fn subject() -> Subject {
        Subject {
            id: Uuid::new_v4(),
            email: None,
            is_anonymous: true,
        }
    }

    fn chapter_one() -> ChapterRecord {
        ChapterRecord {
            chapter: 1,
            title: Some("The Way".to_string()),
            subtitle: None,
            tags: None,
            lines: vec![Line {
                order: 0,
                original: "道可道".to_string(),
                translation: "The way that can be told".to_string(),
                note: None,
            }],
            analysis: None,
        }
    }

    #[tokio::test]
    async fn bookmark_toggle_is_idempotent_and_delete_is_noop() {
        let store = Arc::new(MemoryStore::default());
        let coordinator = SavedCoordinator::new(store.clone());
        let s = subject();

        assert_eq!(
            coordinator
                .toggle_bookmark(Some(&s), 3, true)
                .await
                .unwrap(),
            ToggleOutcome::Committed
        );
        assert_eq!(
            coordinator
                .toggle_bookmark(Some(&s), 3, true)
                .await
                .unwrap(),
            ToggleOutcome::Committed
        );
        assert_eq!(store.list_bookmarks(s.id).await.unwrap().len(), 1);
        assert!(coordinator.is_bookmarked(3));

        coordinator
            .toggle_bookmark(Some(&s), 3, false)
            .await
            .unwrap();
        assert!(store.list_bookmarks(s.id).await.unwrap().is_empty());
        assert!(!coordinator.is_bookmarked(3));

        // Un-saving again with no record left is still a success.
        assert_eq!(
            coordinator
                .toggle_bookmark(Some(&s), 3, false)
                .await
                .unwrap(),
            ToggleOutcome::Committed
        );
    }

    #[tokio::test]
    async fn failed_bookmark_write_reverts_local_state() {
        let store = Arc::new(MemoryStore::default());
        let coordinator = SavedCoordinator::new(store.clone());
        let s = subject();

        store.fail_writes(true);
        let err = coordinator
            .toggle_bookmark(Some(&s), 5, true)
            .await
            .unwrap_err();
        assert!(matches!(err, SavedError::Store(StoreError::Write(_))));
        assert!(!coordinator.is_bookmarked(5));
    }

    #[tokio::test]
    async fn stale_toggle_completion_is_superseded() {
        let store = Arc::new(MemoryStore::default());
        let coordinator = Arc::new(SavedCoordinator::new(store.clone()));
        let s = subject();

        let gate = store.arm_bookmark_gate();
        let first = {
            let coordinator = coordinator.clone();
            let s = s.clone();
            tokio::spawn(async move { coordinator.toggle_bookmark(Some(&s), 9, true).await })
        };
        // Wait until the first write is parked inside the store.
        gate.entered.notified().await;

        // A second toggle for the same chapter takes over.
        assert_eq!(
            coordinator
                .toggle_bookmark(Some(&s), 9, false)
                .await
                .unwrap(),
            ToggleOutcome::Committed
        );

        gate.release.notify_one();
        let outcome = first.await.unwrap().unwrap();
        assert_eq!(outcome, ToggleOutcome::Superseded);
        // Local state reflects the most recently requested toggle.
        assert!(!coordinator.is_bookmarked(9));
    }

    #[tokio::test]
    async fn save_clip_snapshots_and_prepends_locally() {
        let store = Arc::new(MemoryStore::default());
        let coordinator = SavedCoordinator::new(store.clone());
        let s = subject();
        let chapter = chapter_one();

        let record = coordinator
            .save_clip(
                Some(&s),
                &chapter,
                ClipPayload::line(&chapter.lines[0]),
                "  my note  ",
            )
            .await
            .unwrap();

        assert_eq!(record.chapter, 1);
        assert_eq!(record.chapter_title.as_deref(), Some("The Way"));
        assert_eq!(record.note.as_deref(), Some("my note"));
        assert!(record.text.contains("道可道"));
        assert_eq!(coordinator.clips().first().map(|c| c.id), Some(record.id));
    }

    #[tokio::test]
    async fn empty_clip_text_is_rejected_before_any_remote_call() {
        let store = Arc::new(MemoryStore::default());
        let coordinator = SavedCoordinator::new(store.clone());
        let s = subject();
        let chapter = chapter_one(); // no analysis, so the key sentence is blank

        let err = coordinator
            .save_clip(
                Some(&s),
                &chapter,
                ClipPayload::key_sentence(&chapter),
                "note",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SavedError::EmptyText));
        assert_eq!(store.write_calls(), 0);
    }

    #[tokio::test]
    async fn missing_subject_is_rejected_before_any_remote_call() {
        let store = Arc::new(MemoryStore::default());
        let coordinator = SavedCoordinator::new(store.clone());
        let chapter = chapter_one();

        let err = coordinator
            .save_clip(None, &chapter, ClipPayload::line(&chapter.lines[0]), "")
            .await
            .unwrap_err();
        assert!(matches!(err, SavedError::NoSubject));
        assert_eq!(store.write_calls(), 0);
    }

    #[tokio::test]
    async fn clip_text_is_a_snapshot_not_a_live_reference() {
        let store = Arc::new(MemoryStore::default());
        let coordinator = SavedCoordinator::new(store.clone());
        let s = subject();
        let chapter = chapter_one();

        let record = coordinator
            .save_clip(
                Some(&s),
                &chapter,
                ClipPayload::line(&chapter.lines[0]),
                "",
            )
            .await
            .unwrap();

        // The editorial path rewrites the chapter's line afterwards.
        store
            .save_chapter(
                1,
                json!({
                    "chapter": 1,
                    "lines": [
                        { "order": 0, "original": "CHANGED", "translation": "CHANGED" }
                    ]
                }),
            )
            .await
            .unwrap();

        coordinator.refresh(Some(&s)).await.unwrap();
        let reloaded = coordinator
            .clips()
            .into_iter()
            .find(|c| c.id == record.id)
            .unwrap();
        assert_eq!(reloaded.text, record.text);
        assert!(!reloaded.text.contains("CHANGED"));
    }

    #[tokio::test]
    async fn pin_toggle_reverts_on_failure() {
        let store = Arc::new(MemoryStore::default());
        let coordinator = SavedCoordinator::new(store.clone());
        let s = subject();
        let chapter = chapter_one();
        let record = coordinator
            .save_clip(Some(&s), &chapter, ClipPayload::line(&chapter.lines[0]), "")
            .await
            .unwrap();

        store.fail_writes(true);
        let err = coordinator.toggle_pin(Some(&s), record.id).await.unwrap_err();
        assert!(matches!(err, SavedError::Store(_)));
        assert!(!coordinator.clips()[0].is_pinned);

        store.fail_writes(false);
        assert!(coordinator.toggle_pin(Some(&s), record.id).await.unwrap());
        assert!(coordinator.clips()[0].is_pinned);
    }

    #[tokio::test]
    async fn delete_clip_restores_the_record_on_failure() {
        let store = Arc::new(MemoryStore::default());
        let coordinator = SavedCoordinator::new(store.clone());
        let s = subject();
        let chapter = chapter_one();
        let record = coordinator
            .save_clip(Some(&s), &chapter, ClipPayload::line(&chapter.lines[0]), "")
            .await
            .unwrap();

        store.fail_writes(true);
        assert!(coordinator.delete_clip(Some(&s), record.id).await.is_err());
        assert_eq!(coordinator.clips().len(), 1);

        store.fail_writes(false);
        coordinator.delete_clip(Some(&s), record.id).await.unwrap();
        assert!(coordinator.clips().is_empty());
        assert!(store.list_clips(s.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn load_bookmark_reads_one_chapter_into_local_state() {
        let store = Arc::new(MemoryStore::default());
        let s = subject();
        store.put_bookmark(s.id, 4).await.unwrap();

        let coordinator = SavedCoordinator::new(store.clone());
        assert!(coordinator.load_bookmark(Some(&s), 4).await.unwrap());
        assert!(coordinator.is_bookmarked(4));
        assert!(!coordinator.load_bookmark(Some(&s), 5).await.unwrap());
        assert!(!coordinator.is_bookmarked(5));
    }

    #[tokio::test]
    async fn refresh_loads_bookmarks_and_clips() {
        let store = Arc::new(MemoryStore::default());
        let s = subject();
        store.put_bookmark(s.id, 2).await.unwrap();
        store.put_bookmark(s.id, 11).await.unwrap();

        let coordinator = SavedCoordinator::new(store.clone());
        let chapter = chapter_one();
        coordinator
            .save_clip(Some(&s), &chapter, ClipPayload::line(&chapter.lines[0]), "")
            .await
            .unwrap();

        let other = SavedCoordinator::new(store.clone());
        other.refresh(Some(&s)).await.unwrap();
        assert_eq!(other.bookmarks(), vec![2, 11]);
        assert_eq!(other.clips().len(), 1);
    }

    #[test]
    fn filter_clips_orders_pinned_first_and_matches_notes() {
        fn clip(kind: ClipKind, chapter: u32, text: &str, note: &str, pinned: bool) -> ClipRecord {
            ClipRecord {
                id: Uuid::new_v4(),
                kind,
                chapter,
                chapter_title: Some(format!("Chapter {chapter}")),
                text: text.to_string(),
                note: (!note.is_empty()).then(|| note.to_string()),
                is_pinned: pinned,
                context: Default::default(),
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            }
        }

        let clips = vec![
            clip(ClipKind::Original, 1, "alpha", "remember this", false),
            clip(ClipKind::Story, 2, "beta", "", true),
            clip(ClipKind::Translation, 1, "gamma", "", false),
        ];

        let all = filter_clips(&clips, &ClipQuery::default());
        assert_eq!(all[0].text, "beta"); // pinned first
        assert_eq!(all.len(), 3);

        let pinned = filter_clips(
            &clips,
            &ClipQuery {
                pinned_only: true,
                ..Default::default()
            },
        );
        assert_eq!(pinned.len(), 1);

        let by_kind = filter_clips(
            &clips,
            &ClipQuery {
                kind: Some(ClipKind::Translation),
                ..Default::default()
            },
        );
        assert_eq!(by_kind.len(), 1);
        assert_eq!(by_kind[0].text, "gamma");

        let by_note = filter_clips(
            &clips,
            &ClipQuery {
                query: "REMEMBER".to_string(),
                ..Default::default()
            },
        );
        assert_eq!(by_note.len(), 1);
        assert_eq!(by_note[0].text, "alpha");
    }
}
