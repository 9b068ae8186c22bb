//! crates/dao_reader_core/src/memory.rs
//!
//! In-memory implementations of the ports. They back the unit tests (with
//! failure injection and write gating) and give embedding UIs a store to run
//! against without a live backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::domain::{
    BookmarkRecord, ChapterDoc, ClipRecord, NewClip, StoryRecord, Subject, SubjectId,
};
use crate::ports::{
    ChapterUpsert, CorpusStore, IdentityError, IdentityProvider, IdentityResult, PreferenceStore,
    StoreError, StoreResult, MAX_BATCH_OPS,
};

const MIN_PASSWORD_LEN: usize = 6;

//=========================================================================================
// Identity
//=========================================================================================

struct StoredSubject {
    subject: Subject,
    password: Option<String>,
}

#[derive(Default)]
pub struct MemoryIdentity {
    subjects: Mutex<HashMap<SubjectId, StoredSubject>>,
    fail_next: Mutex<Option<IdentityError>>,
}

impl MemoryIdentity {
    /// Queues an error for the next identity operation.
    pub fn fail_next(&self, err: IdentityError) {
        *self.fail_next.lock().expect("identity lock poisoned") = Some(err);
    }

    pub fn subject_count(&self) -> usize {
        self.subjects.lock().expect("identity lock poisoned").len()
    }

    pub fn email_of(&self, id: SubjectId) -> Option<String> {
        self.subjects
            .lock()
            .expect("identity lock poisoned")
            .get(&id)
            .and_then(|s| s.subject.email.clone())
    }

    /// Inserts a permanent account directly, returning its id.
    pub fn seed_account(&self, email: &str, password: &str) -> SubjectId {
        let id = Uuid::new_v4();
        self.subjects.lock().expect("identity lock poisoned").insert(
            id,
            StoredSubject {
                subject: Subject {
                    id,
                    email: Some(email.to_string()),
                    is_anonymous: false,
                },
                password: Some(password.to_string()),
            },
        );
        id
    }

    fn take_failure(&self) -> IdentityResult<()> {
        match self.fail_next.lock().expect("identity lock poisoned").take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn email_taken(subjects: &HashMap<SubjectId, StoredSubject>, email: &str) -> bool {
        subjects
            .values()
            .any(|s| s.subject.email.as_deref() == Some(email))
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentity {
    async fn create_anonymous(&self) -> IdentityResult<Subject> {
        self.take_failure()?;
        let id = Uuid::new_v4();
        let subject = Subject {
            id,
            email: None,
            is_anonymous: true,
        };
        self.subjects.lock().expect("identity lock poisoned").insert(
            id,
            StoredSubject {
                subject: subject.clone(),
                password: None,
            },
        );
        Ok(subject)
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> IdentityResult<Subject> {
        self.take_failure()?;
        let subjects = self.subjects.lock().expect("identity lock poisoned");
        let stored = subjects
            .values()
            .find(|s| s.subject.email.as_deref() == Some(email))
            .ok_or(IdentityError::NotFound)?;
        if stored.password.as_deref() != Some(password) {
            return Err(IdentityError::InvalidCredential);
        }
        Ok(stored.subject.clone())
    }

    async fn create_account(&self, email: &str, password: &str) -> IdentityResult<Subject> {
        self.take_failure()?;
        if password.len() < MIN_PASSWORD_LEN {
            return Err(IdentityError::WeakCredential);
        }
        let mut subjects = self.subjects.lock().expect("identity lock poisoned");
        if Self::email_taken(&subjects, email) {
            return Err(IdentityError::CredentialInUse);
        }
        let id = Uuid::new_v4();
        let subject = Subject {
            id,
            email: Some(email.to_string()),
            is_anonymous: false,
        };
        subjects.insert(
            id,
            StoredSubject {
                subject: subject.clone(),
                password: Some(password.to_string()),
            },
        );
        Ok(subject)
    }

    async fn link_credential(
        &self,
        subject: SubjectId,
        email: &str,
        password: &str,
    ) -> IdentityResult<Subject> {
        self.take_failure()?;
        if password.len() < MIN_PASSWORD_LEN {
            return Err(IdentityError::WeakCredential);
        }
        let mut subjects = self.subjects.lock().expect("identity lock poisoned");
        if Self::email_taken(&subjects, email) {
            return Err(IdentityError::CredentialInUse);
        }
        let stored = subjects.get_mut(&subject).ok_or(IdentityError::NotFound)?;
        if !stored.subject.is_anonymous {
            return Err(IdentityError::NotAnonymous);
        }
        stored.subject.email = Some(email.to_string());
        stored.subject.is_anonymous = false;
        stored.password = Some(password.to_string());
        Ok(stored.subject.clone())
    }
}

//=========================================================================================
// Document store
//=========================================================================================

/// Pauses the first gated write until released, so tests can interleave a
/// second request deterministically.
pub struct WriteGate {
    /// Notified once the gated write has entered the store.
    pub entered: Notify,
    /// Notify this to let the gated write finish.
    pub release: Notify,
}

#[derive(Default)]
pub struct MemoryStore {
    chapters: Mutex<BTreeMap<String, Value>>,
    stories: Mutex<BTreeMap<u32, StoryRecord>>,
    bookmarks: Mutex<BTreeMap<(SubjectId, u32), BookmarkRecord>>,
    clips: Mutex<Vec<(SubjectId, ClipRecord)>>,

    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_batch_at: Mutex<Option<usize>>,
    write_calls: AtomicUsize,
    batch_attempts: AtomicUsize,
    batch_commits: Mutex<Vec<usize>>,
    bookmark_gate: Mutex<Option<Arc<WriteGate>>>,
}

impl MemoryStore {
    pub fn seed_chapter(&self, chapter: u32, data: Value) {
        self.seed_raw_chapter(&chapter.to_string(), data);
    }

    /// Seeds a document under an arbitrary id, valid chapter key or not.
    pub fn seed_raw_chapter(&self, id: &str, data: Value) {
        self.chapters
            .lock()
            .expect("store lock poisoned")
            .insert(id.to_string(), data);
    }

    pub fn chapter_data(&self, chapter: u32) -> Option<Value> {
        self.chapters
            .lock()
            .expect("store lock poisoned")
            .get(&chapter.to_string())
            .cloned()
    }

    pub fn chapter_count(&self) -> usize {
        self.chapters.lock().expect("store lock poisoned").len()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes the n-th (1-based) batch commit fail.
    pub fn fail_batch_at(&self, attempt: usize) {
        *self.fail_batch_at.lock().expect("store lock poisoned") = Some(attempt);
    }

    /// Total write operations attempted, batch commits included.
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn batch_attempts(&self) -> usize {
        self.batch_attempts.load(Ordering::SeqCst)
    }

    /// Operation counts of the batch commits that succeeded, in order.
    pub fn batch_commits(&self) -> Vec<usize> {
        self.batch_commits.lock().expect("store lock poisoned").clone()
    }

    /// Arms a one-shot gate on the next bookmark write.
    pub fn arm_bookmark_gate(&self) -> Arc<WriteGate> {
        let gate = Arc::new(WriteGate {
            entered: Notify::new(),
            release: Notify::new(),
        });
        *self.bookmark_gate.lock().expect("store lock poisoned") = Some(gate.clone());
        gate
    }

    fn check_read(&self) -> StoreResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            Err(StoreError::Read("injected read failure".to_string()))
        } else {
            Ok(())
        }
    }

    fn check_write(&self) -> StoreResult<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Write("injected write failure".to_string()))
        } else {
            Ok(())
        }
    }

    async fn wait_bookmark_gate(&self) {
        let gate = self.bookmark_gate.lock().expect("store lock poisoned").take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
    }

    fn apply_upsert(chapters: &mut BTreeMap<String, Value>, op: &ChapterUpsert, merge: bool) {
        let id = op.chapter.to_string();
        match chapters.get_mut(&id) {
            Some(existing) if merge => {
                if let (Some(target), Some(fields)) =
                    (existing.as_object_mut(), op.data.as_object())
                {
                    for (key, value) in fields {
                        target.insert(key.clone(), value.clone());
                    }
                } else {
                    *existing = op.data.clone();
                }
            }
            _ => {
                chapters.insert(id, op.data.clone());
            }
        }
    }
}

#[async_trait]
impl CorpusStore for MemoryStore {
    async fn fetch_chapters(&self) -> StoreResult<Vec<ChapterDoc>> {
        self.check_read()?;
        Ok(self
            .chapters
            .lock()
            .expect("store lock poisoned")
            .iter()
            .map(|(id, data)| ChapterDoc {
                id: id.clone(),
                data: data.clone(),
            })
            .collect())
    }

    async fn fetch_chapter(&self, chapter: u32) -> StoreResult<Option<ChapterDoc>> {
        self.check_read()?;
        Ok(self
            .chapters
            .lock()
            .expect("store lock poisoned")
            .get(&chapter.to_string())
            .map(|data| ChapterDoc {
                id: chapter.to_string(),
                data: data.clone(),
            }))
    }

    async fn save_chapter(&self, chapter: u32, data: Value) -> StoreResult<()> {
        self.check_write()?;
        let mut chapters = self.chapters.lock().expect("store lock poisoned");
        Self::apply_upsert(&mut chapters, &ChapterUpsert { chapter, data }, true);
        Ok(())
    }

    async fn fetch_story(&self, chapter: u32) -> StoreResult<Option<StoryRecord>> {
        self.check_read()?;
        Ok(self
            .stories
            .lock()
            .expect("store lock poisoned")
            .get(&chapter)
            .cloned())
    }

    async fn save_story(&self, story: StoryRecord) -> StoreResult<()> {
        self.check_write()?;
        self.stories
            .lock()
            .expect("store lock poisoned")
            .insert(story.chapter, story);
        Ok(())
    }

    async fn get_bookmark(
        &self,
        subject: SubjectId,
        chapter: u32,
    ) -> StoreResult<Option<BookmarkRecord>> {
        self.check_read()?;
        Ok(self
            .bookmarks
            .lock()
            .expect("store lock poisoned")
            .get(&(subject, chapter))
            .cloned())
    }

    async fn put_bookmark(&self, subject: SubjectId, chapter: u32) -> StoreResult<()> {
        self.wait_bookmark_gate().await;
        self.check_write()?;
        let now = Utc::now();
        let mut bookmarks = self.bookmarks.lock().expect("store lock poisoned");
        bookmarks
            .entry((subject, chapter))
            .and_modify(|b| b.updated_at = now)
            .or_insert(BookmarkRecord {
                chapter,
                is_saved: true,
                created_at: now,
                updated_at: now,
            });
        Ok(())
    }

    async fn delete_bookmark(&self, subject: SubjectId, chapter: u32) -> StoreResult<()> {
        self.wait_bookmark_gate().await;
        self.check_write()?;
        self.bookmarks
            .lock()
            .expect("store lock poisoned")
            .remove(&(subject, chapter));
        Ok(())
    }

    async fn list_bookmarks(&self, subject: SubjectId) -> StoreResult<Vec<BookmarkRecord>> {
        self.check_read()?;
        Ok(self
            .bookmarks
            .lock()
            .expect("store lock poisoned")
            .iter()
            .filter(|((owner, _), _)| *owner == subject)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn add_clip(&self, subject: SubjectId, clip: NewClip) -> StoreResult<ClipRecord> {
        self.check_write()?;
        let now = Utc::now();
        let record = ClipRecord {
            id: Uuid::new_v4(),
            kind: clip.kind,
            chapter: clip.chapter,
            chapter_title: clip.chapter_title,
            text: clip.text,
            note: clip.note,
            is_pinned: false,
            context: clip.context,
            created_at: now,
            updated_at: now,
        };
        self.clips
            .lock()
            .expect("store lock poisoned")
            .push((subject, record.clone()));
        Ok(record)
    }

    async fn list_clips(&self, subject: SubjectId, max: usize) -> StoreResult<Vec<ClipRecord>> {
        self.check_read()?;
        Ok(self
            .clips
            .lock()
            .expect("store lock poisoned")
            .iter()
            .rev() // newest first
            .filter(|(owner, _)| *owner == subject)
            .map(|(_, record)| record.clone())
            .take(max)
            .collect())
    }

    async fn set_clip_pinned(
        &self,
        subject: SubjectId,
        clip: Uuid,
        pinned: bool,
    ) -> StoreResult<()> {
        self.check_write()?;
        let mut clips = self.clips.lock().expect("store lock poisoned");
        if let Some((_, record)) = clips
            .iter_mut()
            .find(|(owner, record)| *owner == subject && record.id == clip)
        {
            record.is_pinned = pinned;
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete_clip(&self, subject: SubjectId, clip: Uuid) -> StoreResult<()> {
        self.check_write()?;
        self.clips
            .lock()
            .expect("store lock poisoned")
            .retain(|(owner, record)| !(*owner == subject && record.id == clip));
        Ok(())
    }

    async fn commit_batch(&self, ops: &[ChapterUpsert], merge: bool) -> StoreResult<()> {
        let attempt = self.batch_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.check_write()?;
        if ops.len() > MAX_BATCH_OPS {
            return Err(StoreError::Write(format!(
                "batch of {} exceeds the {MAX_BATCH_OPS}-operation ceiling",
                ops.len()
            )));
        }
        if *self.fail_batch_at.lock().expect("store lock poisoned") == Some(attempt) {
            return Err(StoreError::Write("injected batch failure".to_string()));
        }

        // Atomic: nothing above touched state, so apply everything at once.
        let mut chapters = self.chapters.lock().expect("store lock poisoned");
        for op in ops {
            Self::apply_upsert(&mut chapters, op, merge);
        }
        self.batch_commits
            .lock()
            .expect("store lock poisoned")
            .push(ops.len());
        Ok(())
    }
}

//=========================================================================================
// Preferences
//=========================================================================================

#[derive(Default)]
pub struct MemoryPrefs {
    values: Mutex<BTreeMap<String, String>>,
}

impl PreferenceStore for MemoryPrefs {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .expect("prefs lock poisoned")
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values
            .lock()
            .expect("prefs lock poisoned")
            .insert(key.to_string(), value.to_string());
    }
}
