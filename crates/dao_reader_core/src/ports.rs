//! crates/dao_reader_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the
//! core to be independent of the concrete identity backend and document store.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::{
    BookmarkRecord, ChapterDoc, ClipRecord, NewClip, StoryRecord, Subject, SubjectId,
};

/// Upper bound on operations per atomic batched write. The batch updater
/// chunks its input to stay under this, and stores reject anything larger.
pub const MAX_BATCH_OPS: usize = 400;

//=========================================================================================
// Port Error and Result Types
//=========================================================================================

/// Failures surfaced by the identity provider and the session manager.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IdentityError {
    #[error("identity provider unavailable: {0}")]
    Provider(String),
    #[error("invalid credential")]
    InvalidCredential,
    #[error("account not found")]
    NotFound,
    #[error("too many attempts")]
    RateLimited,
    #[error("password does not meet the policy")]
    WeakCredential,
    #[error("email already linked to another account")]
    CredentialInUse,
    #[error("current subject is not anonymous")]
    NotAnonymous,
}

impl IdentityError {
    /// Short message suitable for inline display on an auth form.
    pub fn user_message(&self) -> &'static str {
        match self {
            IdentityError::Provider(_) => "Sign-in is unavailable right now. Try again later.",
            IdentityError::InvalidCredential => "Wrong email or password.",
            IdentityError::NotFound => "No account found for that email.",
            IdentityError::RateLimited => "Too many attempts. Wait a moment and try again.",
            IdentityError::WeakCredential => "That password is too weak (use at least 6 characters).",
            IdentityError::CredentialInUse => "That email is already linked to another account.",
            IdentityError::NotAnonymous => "This session already has an account. Sign in instead.",
        }
    }
}

pub type IdentityResult<T> = Result<T, IdentityError>;

/// Failures surfaced by the document store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store read failed: {0}")]
    Read(String),
    #[error("store write failed: {0}")]
    Write(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The external identity backend. Implementations own credential storage and
/// verification; the session manager layers the state machine on top.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Creates a fresh anonymous subject.
    async fn create_anonymous(&self) -> IdentityResult<Subject>;

    /// Authenticates an existing permanent credential. The returned subject id
    /// is whatever id that credential owns.
    async fn sign_in_with_password(&self, email: &str, password: &str) -> IdentityResult<Subject>;

    /// Creates a brand-new permanent subject with the given credential.
    async fn create_account(&self, email: &str, password: &str) -> IdentityResult<Subject>;

    /// Attaches a credential to an existing anonymous subject, preserving its
    /// id. Fails with `NotAnonymous` if the subject already has a credential
    /// and `CredentialInUse` if the email belongs to another subject.
    async fn link_credential(
        &self,
        subject: SubjectId,
        email: &str,
        password: &str,
    ) -> IdentityResult<Subject>;
}

/// One chapter upsert inside a batched write: the numeric key plus the
/// document fields to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterUpsert {
    pub chapter: u32,
    pub data: Value,
}

/// Typed read/write operations against the document store, covering the four
/// record kinds: chapters, stories, per-subject bookmarks, per-subject clips.
#[async_trait]
pub trait CorpusStore: Send + Sync {
    // --- Chapter corpus (shared, read-mostly) ---
    async fn fetch_chapters(&self) -> StoreResult<Vec<ChapterDoc>>;
    async fn fetch_chapter(&self, chapter: u32) -> StoreResult<Option<ChapterDoc>>;
    /// Field-level merge write of a single chapter document (editorial path).
    async fn save_chapter(&self, chapter: u32, data: Value) -> StoreResult<()>;

    // --- Stories ---
    async fn fetch_story(&self, chapter: u32) -> StoreResult<Option<StoryRecord>>;
    async fn save_story(&self, story: StoryRecord) -> StoreResult<()>;

    // --- Bookmarks (owned by their subject) ---
    async fn get_bookmark(
        &self,
        subject: SubjectId,
        chapter: u32,
    ) -> StoreResult<Option<BookmarkRecord>>;
    /// Create-or-refresh the bookmark record for (subject, chapter).
    async fn put_bookmark(&self, subject: SubjectId, chapter: u32) -> StoreResult<()>;
    /// Remove the bookmark record. Succeeds when no record exists.
    async fn delete_bookmark(&self, subject: SubjectId, chapter: u32) -> StoreResult<()>;
    async fn list_bookmarks(&self, subject: SubjectId) -> StoreResult<Vec<BookmarkRecord>>;

    // --- Clips (owned by their subject) ---
    async fn add_clip(&self, subject: SubjectId, clip: NewClip) -> StoreResult<ClipRecord>;
    /// Newest first, capped at `max`.
    async fn list_clips(&self, subject: SubjectId, max: usize) -> StoreResult<Vec<ClipRecord>>;
    async fn set_clip_pinned(
        &self,
        subject: SubjectId,
        clip: Uuid,
        pinned: bool,
    ) -> StoreResult<()>;
    async fn delete_clip(&self, subject: SubjectId, clip: Uuid) -> StoreResult<()>;

    // --- Batched writes ---
    /// Commits up to [`MAX_BATCH_OPS`] chapter upserts as one atomic write.
    /// `merge` selects field-level merge versus whole-document replace.
    async fn commit_batch(&self, ops: &[ChapterUpsert], merge: bool) -> StoreResult<()>;
}

/// Small persisted key/value state outside the remote store: the last viewed
/// chapter and display preferences. Reads are synchronous at startup, writes
/// are synchronous on change, and values survive a restart. Write failures
/// are swallowed by implementations; losing a display preference is harmless.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}
