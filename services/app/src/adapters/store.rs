//! services/app/src/adapters/store.rs
//!
//! This module contains the document-store adapter, the concrete
//! implementation of the `CorpusStore` port from the core crate. Chapters and
//! stories live as JSONB documents keyed by a string id; bookmarks and clips
//! are typed rows scoped by subject. All timestamps are assigned server-side.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::warn;
use uuid::Uuid;

use dao_reader_core::domain::{
    BookmarkRecord, ChapterDoc, ClipContext, ClipKind, ClipRecord, NewClip, StoryRecord, SubjectId,
};
use dao_reader_core::ports::{
    ChapterUpsert, CorpusStore, StoreError, StoreResult, MAX_BATCH_OPS,
};

/// Shallow field-level merge of the supplied document into the stored one, or
/// a whole-document replace when `$3` is false.
const UPSERT_DOC_SQL: &str = "\
INSERT INTO chapters (id, data) VALUES ($1, $2)
ON CONFLICT (id) DO UPDATE SET
    data = CASE WHEN $3 THEN chapters.data || EXCLUDED.data ELSE EXCLUDED.data END,
    updated_at = now()";

fn read_err(e: sqlx::Error) -> StoreError {
    StoreError::Read(e.to_string())
}

fn write_err(e: sqlx::Error) -> StoreError {
    StoreError::Write(e.to_string())
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A PostgreSQL-backed adapter that implements the `CorpusStore` port.
#[derive(Clone)]
pub struct DbStore {
    pool: PgPool,
}

impl DbStore {
    /// Creates a new `DbStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn upsert_doc(
        tx: &mut Transaction<'_, Postgres>,
        op: &ChapterUpsert,
        merge: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(UPSERT_DOC_SQL)
            .bind(op.chapter.to_string())
            .bind(&op.data)
            .bind(merge)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct DocRow {
    id: String,
    data: Value,
}

impl DocRow {
    fn to_domain(self) -> ChapterDoc {
        ChapterDoc {
            id: self.id,
            data: self.data,
        }
    }
}

#[derive(FromRow)]
struct BookmarkRow {
    chapter: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BookmarkRow {
    fn to_domain(self) -> BookmarkRecord {
        BookmarkRecord {
            chapter: self.chapter as u32,
            is_saved: true,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(FromRow)]
struct ClipRow {
    id: Uuid,
    kind: String,
    chapter: i32,
    chapter_title: Option<String>,
    text: String,
    note: Option<String>,
    is_pinned: bool,
    line_order: Option<i32>,
    section_index: Option<i32>,
    section_kind: Option<String>,
    section_title: Option<String>,
    story_title: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ClipRow {
    fn to_domain(self) -> StoreResult<ClipRecord> {
        let kind: ClipKind = self
            .kind
            .parse()
            .map_err(|e: String| StoreError::Read(e))?;
        Ok(ClipRecord {
            id: self.id,
            kind,
            chapter: self.chapter as u32,
            chapter_title: self.chapter_title,
            text: self.text,
            note: self.note,
            is_pinned: self.is_pinned,
            context: ClipContext {
                line_order: self.line_order.map(|v| v as u32),
                section_index: self.section_index.map(|v| v as u32),
                section_kind: self.section_kind,
                section_title: self.section_title,
                story_title: self.story_title,
            },
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const CLIP_COLUMNS: &str = "\
id, kind, chapter, chapter_title, text, note, is_pinned, \
line_order, section_index, section_kind, section_title, story_title, \
created_at, updated_at";

//=========================================================================================
// `CorpusStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl CorpusStore for DbStore {
    async fn fetch_chapters(&self) -> StoreResult<Vec<ChapterDoc>> {
        let rows = sqlx::query_as::<_, DocRow>("SELECT id, data FROM chapters")
            .fetch_all(&self.pool)
            .await
            .map_err(read_err)?;
        Ok(rows.into_iter().map(DocRow::to_domain).collect())
    }

    async fn fetch_chapter(&self, chapter: u32) -> StoreResult<Option<ChapterDoc>> {
        let row = sqlx::query_as::<_, DocRow>("SELECT id, data FROM chapters WHERE id = $1")
            .bind(chapter.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(read_err)?;
        Ok(row.map(DocRow::to_domain))
    }

    async fn save_chapter(&self, chapter: u32, data: Value) -> StoreResult<()> {
        sqlx::query(UPSERT_DOC_SQL)
            .bind(chapter.to_string())
            .bind(&data)
            .bind(true)
            .execute(&self.pool)
            .await
            .map_err(write_err)?;
        Ok(())
    }

    async fn fetch_story(&self, chapter: u32) -> StoreResult<Option<StoryRecord>> {
        let row = sqlx::query_as::<_, DocRow>("SELECT id, data FROM stories WHERE id = $1")
            .bind(chapter.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(read_err)?;
        // A story document that does not decode is treated as absent rather
        // than failing the chapter view.
        Ok(row.and_then(|r| match serde_json::from_value(r.data) {
            Ok(story) => Some(story),
            Err(e) => {
                warn!(chapter, error = %e, "undecodable story document");
                None
            }
        }))
    }

    async fn save_story(&self, story: StoryRecord) -> StoreResult<()> {
        let data = serde_json::to_value(&story)
            .map_err(|e| StoreError::Write(e.to_string()))?;
        sqlx::query(
            "INSERT INTO stories (id, data) VALUES ($1, $2)
             ON CONFLICT (id) DO UPDATE SET data = stories.data || EXCLUDED.data, updated_at = now()",
        )
        .bind(story.chapter.to_string())
        .bind(&data)
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        Ok(())
    }

    async fn get_bookmark(
        &self,
        subject: SubjectId,
        chapter: u32,
    ) -> StoreResult<Option<BookmarkRecord>> {
        let row = sqlx::query_as::<_, BookmarkRow>(
            "SELECT chapter, created_at, updated_at FROM bookmarks
             WHERE user_id = $1 AND chapter = $2",
        )
        .bind(subject)
        .bind(chapter as i32)
        .fetch_optional(&self.pool)
        .await
        .map_err(read_err)?;
        Ok(row.map(BookmarkRow::to_domain))
    }

    async fn put_bookmark(&self, subject: SubjectId, chapter: u32) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO bookmarks (user_id, chapter) VALUES ($1, $2)
             ON CONFLICT (user_id, chapter) DO UPDATE SET updated_at = now()",
        )
        .bind(subject)
        .bind(chapter as i32)
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        Ok(())
    }

    async fn delete_bookmark(&self, subject: SubjectId, chapter: u32) -> StoreResult<()> {
        sqlx::query("DELETE FROM bookmarks WHERE user_id = $1 AND chapter = $2")
            .bind(subject)
            .bind(chapter as i32)
            .execute(&self.pool)
            .await
            .map_err(write_err)?;
        Ok(())
    }

    async fn list_bookmarks(&self, subject: SubjectId) -> StoreResult<Vec<BookmarkRecord>> {
        let rows = sqlx::query_as::<_, BookmarkRow>(
            "SELECT chapter, created_at, updated_at FROM bookmarks
             WHERE user_id = $1 ORDER BY updated_at DESC",
        )
        .bind(subject)
        .fetch_all(&self.pool)
        .await
        .map_err(read_err)?;
        Ok(rows.into_iter().map(BookmarkRow::to_domain).collect())
    }

    async fn add_clip(&self, subject: SubjectId, clip: NewClip) -> StoreResult<ClipRecord> {
        let row = sqlx::query_as::<_, ClipRow>(&format!(
            "INSERT INTO clips (id, user_id, kind, chapter, chapter_title, text, note,
                                line_order, section_index, section_kind, section_title, story_title)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             RETURNING {CLIP_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(subject)
        .bind(clip.kind.as_str())
        .bind(clip.chapter as i32)
        .bind(&clip.chapter_title)
        .bind(&clip.text)
        .bind(&clip.note)
        .bind(clip.context.line_order.map(|v| v as i32))
        .bind(clip.context.section_index.map(|v| v as i32))
        .bind(&clip.context.section_kind)
        .bind(&clip.context.section_title)
        .bind(&clip.context.story_title)
        .fetch_one(&self.pool)
        .await
        .map_err(write_err)?;
        row.to_domain()
    }

    async fn list_clips(&self, subject: SubjectId, max: usize) -> StoreResult<Vec<ClipRecord>> {
        let rows = sqlx::query_as::<_, ClipRow>(&format!(
            "SELECT {CLIP_COLUMNS} FROM clips
             WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(subject)
        .bind(max as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(read_err)?;
        rows.into_iter().map(ClipRow::to_domain).collect()
    }

    async fn set_clip_pinned(
        &self,
        subject: SubjectId,
        clip: Uuid,
        pinned: bool,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE clips SET is_pinned = $3, updated_at = now()
             WHERE user_id = $1 AND id = $2",
        )
        .bind(subject)
        .bind(clip)
        .bind(pinned)
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        Ok(())
    }

    async fn delete_clip(&self, subject: SubjectId, clip: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM clips WHERE user_id = $1 AND id = $2")
            .bind(subject)
            .bind(clip)
            .execute(&self.pool)
            .await
            .map_err(write_err)?;
        Ok(())
    }

    async fn commit_batch(&self, ops: &[ChapterUpsert], merge: bool) -> StoreResult<()> {
        if ops.len() > MAX_BATCH_OPS {
            return Err(StoreError::Write(format!(
                "batch of {} exceeds the {MAX_BATCH_OPS}-operation ceiling",
                ops.len()
            )));
        }

        let mut tx = self.pool.begin().await.map_err(write_err)?;
        for op in ops {
            Self::upsert_doc(&mut tx, op, merge).await.map_err(write_err)?;
        }
        tx.commit().await.map_err(write_err)?;
        Ok(())
    }
}
