//! crates/dao_reader_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or transport format; the
//! serde derives exist because chapter and story documents cross the store
//! boundary as JSON payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Stable opaque identifier for an identity principal.
pub type SubjectId = Uuid;

/// An authenticated or anonymous identity principal.
///
/// The id is stable across the anonymous-to-permanent upgrade, which is what
/// keeps bookmarks and clips keyed by it reachable after the upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub id: SubjectId,
    pub email: Option<String>,
    pub is_anonymous: bool,
}

//=========================================================================================
// Chapter corpus
//=========================================================================================

/// A raw chapter document as stored: a string document id plus the JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterDoc {
    pub id: String,
    pub data: Value,
}

/// One line of the chapter text: the original-language text with its translation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Line {
    pub order: u32,
    #[serde(default)]
    pub original: String,
    #[serde(default)]
    pub translation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// One commentary section of a chapter's analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSection {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    #[serde(default)]
    pub sections: Vec<AnalysisSection>,
    #[serde(default)]
    pub key_sentence: String,
}

/// A chapter of the corpus, identified by its 1-based chapter number.
///
/// Everything except the chapter key is optional: the editorial path uploads
/// partial documents, and readers must render whatever fields are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterRecord {
    pub chapter: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<Line>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Analysis>,
}

impl ChapterRecord {
    /// Decodes a raw store document. Returns `None` for documents without a
    /// valid numeric chapter key; the corpus load skips those instead of
    /// failing as a whole.
    pub fn from_doc(doc: &ChapterDoc) -> Option<Self> {
        serde_json::from_value::<ChapterRecord>(doc.data.clone())
            .ok()
            .filter(|record| record.chapter >= 1)
    }

    /// Lines in presentation order.
    pub fn ordered_lines(&self) -> Vec<&Line> {
        let mut lines: Vec<&Line> = self.lines.iter().collect();
        lines.sort_by_key(|l| l.order);
        lines
    }

    /// The lowercase text blob the free-text search matches against:
    /// title, subtitle, key sentence, tags, every line and every analysis
    /// section, concatenated.
    pub fn search_blob(&self) -> String {
        let mut blob = String::new();
        let mut push = |part: &str| {
            if !part.is_empty() {
                if !blob.is_empty() {
                    blob.push(' ');
                }
                blob.push_str(part);
            }
        };

        push(self.title.as_deref().unwrap_or_default());
        push(self.subtitle.as_deref().unwrap_or_default());
        if let Some(analysis) = &self.analysis {
            push(&analysis.key_sentence);
        }
        for tag in self.tags.as_deref().unwrap_or_default() {
            push(tag);
        }
        for line in &self.lines {
            push(&line.original);
            push(&line.translation);
        }
        if let Some(analysis) = &self.analysis {
            for section in &analysis.sections {
                push(&section.kind);
                push(&section.title);
                for paragraph in &section.content {
                    push(paragraph);
                }
            }
        }

        blob.to_lowercase()
    }
}

/// A short story attached to a chapter. Lives independently of the chapter
/// record and may not exist for a given chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryRecord {
    pub chapter: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Vec<String>,
}

//=========================================================================================
// Per-subject saved data
//=========================================================================================

/// A subject's saved marker on a single chapter. Existence of the record is
/// the saved state; un-saving deletes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkRecord {
    pub chapter: u32,
    pub is_saved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What part of a chapter a clip was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClipKind {
    Original,
    Translation,
    OriginalTranslation,
    KeySentence,
    Analysis,
    AnalysisLine,
    Story,
}

impl ClipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClipKind::Original => "original",
            ClipKind::Translation => "translation",
            ClipKind::OriginalTranslation => "originalTranslation",
            ClipKind::KeySentence => "keySentence",
            ClipKind::Analysis => "analysis",
            ClipKind::AnalysisLine => "analysisLine",
            ClipKind::Story => "story",
        }
    }
}

impl std::str::FromStr for ClipKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "original" => Ok(ClipKind::Original),
            "translation" => Ok(ClipKind::Translation),
            "originalTranslation" => Ok(ClipKind::OriginalTranslation),
            "keySentence" => Ok(ClipKind::KeySentence),
            "analysis" => Ok(ClipKind::Analysis),
            "analysisLine" => Ok(ClipKind::AnalysisLine),
            "story" => Ok(ClipKind::Story),
            other => Err(format!("unknown clip kind '{other}'")),
        }
    }
}

/// Where in the chapter a clip came from. All fields optional; which ones are
/// set depends on the clip kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_order: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_title: Option<String>,
}

/// A clip before it has been written: the snapshot text plus its context.
#[derive(Debug, Clone, PartialEq)]
pub struct NewClip {
    pub kind: ClipKind,
    pub chapter: u32,
    pub chapter_title: Option<String>,
    pub text: String,
    pub note: Option<String>,
    pub context: ClipContext,
}

/// A subject's saved snapshot of a piece of chapter content.
///
/// `text` is computed once when the clip is created and never re-derived;
/// later edits to the source chapter do not touch it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipRecord {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: ClipKind,
    pub chapter: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_title: Option<String>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(flatten)]
    pub context: ClipContext,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//=========================================================================================
// Clip payload builders
//=========================================================================================

/// The content half of a clip, built from chapter or story data before the
/// user confirms. The snapshot `text` is rendered here, exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipPayload {
    pub kind: ClipKind,
    pub text: String,
    pub context: ClipContext,
}

impl ClipPayload {
    pub fn original_line(line: &Line) -> Self {
        Self {
            kind: ClipKind::Original,
            text: line.original.trim().to_string(),
            context: ClipContext {
                line_order: Some(line.order),
                ..ClipContext::default()
            },
        }
    }

    pub fn translation_line(line: &Line) -> Self {
        Self {
            kind: ClipKind::Translation,
            text: line.translation.trim().to_string(),
            context: ClipContext {
                line_order: Some(line.order),
                ..ClipContext::default()
            },
        }
    }

    /// Original and translation of one line, saved together.
    pub fn line(line: &Line) -> Self {
        let text = format!(
            "Original:\n{}\n\nTranslation:\n{}",
            line.original, line.translation
        );
        Self {
            kind: ClipKind::OriginalTranslation,
            text: text.trim().to_string(),
            context: ClipContext {
                line_order: Some(line.order),
                ..ClipContext::default()
            },
        }
    }

    pub fn key_sentence(chapter: &ChapterRecord) -> Self {
        let text = chapter
            .analysis
            .as_ref()
            .map(|a| a.key_sentence.trim().to_string())
            .unwrap_or_default();
        Self {
            kind: ClipKind::KeySentence,
            text,
            context: ClipContext::default(),
        }
    }

    /// A whole commentary section: title line followed by its paragraphs.
    pub fn analysis_section(index: u32, section: &AnalysisSection) -> Self {
        let mut parts = Vec::new();
        if !section.title.trim().is_empty() {
            parts.push(section.title.trim().to_string());
        }
        parts.extend(
            section
                .content
                .iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty()),
        );
        Self {
            kind: ClipKind::Analysis,
            text: parts.join("\n\n").trim().to_string(),
            context: ClipContext {
                section_index: Some(index),
                section_kind: Some(section.kind.clone()),
                section_title: Some(section.title.clone()),
                ..ClipContext::default()
            },
        }
    }

    /// A single paragraph out of a commentary section.
    pub fn analysis_line(index: u32, section: &AnalysisSection, paragraph: &str) -> Self {
        Self {
            kind: ClipKind::AnalysisLine,
            text: paragraph.trim().to_string(),
            context: ClipContext {
                section_index: Some(index),
                section_kind: Some(section.kind.clone()),
                section_title: Some(section.title.clone()),
                ..ClipContext::default()
            },
        }
    }

    /// The chapter's story: title line, then paragraphs separated by blank lines.
    pub fn story(story: &StoryRecord) -> Self {
        let mut text = String::new();
        if let Some(title) = story.title.as_deref().filter(|t| !t.trim().is_empty()) {
            text.push_str(title.trim());
            text.push('\n');
        }
        let paragraphs: Vec<&str> = story
            .content
            .iter()
            .map(|p| p.as_str())
            .filter(|p| !p.trim().is_empty())
            .collect();
        text.push_str(&paragraphs.join("\n\n"));
        Self {
            kind: ClipKind::Story,
            text: text.trim().to_string(),
            context: ClipContext {
                story_title: story.title.clone(),
                ..ClipContext::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(data: Value) -> ChapterDoc {
        ChapterDoc {
            id: "1".to_string(),
            data,
        }
    }

    #[test]
    fn from_doc_decodes_minimal_record() {
        let record = ChapterRecord::from_doc(&doc(json!({ "chapter": 3 }))).unwrap();
        assert_eq!(record.chapter, 3);
        assert!(record.title.is_none());
        assert!(record.lines.is_empty());
    }

    #[test]
    fn from_doc_rejects_missing_or_non_numeric_chapter() {
        assert!(ChapterRecord::from_doc(&doc(json!({ "title": "x" }))).is_none());
        assert!(ChapterRecord::from_doc(&doc(json!({ "chapter": "three" }))).is_none());
        assert!(ChapterRecord::from_doc(&doc(json!({ "chapter": 0 }))).is_none());
    }

    #[test]
    fn search_blob_covers_all_text_fields() {
        let record = ChapterRecord::from_doc(&doc(json!({
            "chapter": 1,
            "title": "The Way",
            "subtitle": "Origins",
            "tags": ["dao", "names"],
            "lines": [
                { "order": 0, "original": "道可道", "translation": "The way that can be told" }
            ],
            "analysis": {
                "keySentence": "The nameless is the beginning.",
                "sections": [
                    { "type": "reading", "title": "On naming", "content": ["Names divide."] }
                ]
            }
        })))
        .unwrap();

        let blob = record.search_blob();
        for needle in [
            "the way",
            "origins",
            "dao",
            "道可道",
            "the way that can be told",
            "the nameless is the beginning.",
            "reading",
            "on naming",
            "names divide.",
        ] {
            assert!(blob.contains(needle), "blob missing {needle:?}");
        }
    }

    #[test]
    fn ordered_lines_sorts_by_order() {
        let record = ChapterRecord::from_doc(&doc(json!({
            "chapter": 1,
            "lines": [
                { "order": 2, "original": "c", "translation": "" },
                { "order": 0, "original": "a", "translation": "" },
                { "order": 1, "original": "b", "translation": "" }
            ]
        })))
        .unwrap();
        let originals: Vec<&str> = record
            .ordered_lines()
            .iter()
            .map(|l| l.original.as_str())
            .collect();
        assert_eq!(originals, vec!["a", "b", "c"]);
    }

    #[test]
    fn line_payload_snapshots_both_texts() {
        let line = Line {
            order: 2,
            original: "上善若水".to_string(),
            translation: "The highest good is like water".to_string(),
            note: None,
        };
        let payload = ClipPayload::line(&line);
        assert_eq!(payload.kind, ClipKind::OriginalTranslation);
        assert!(payload.text.contains("上善若水"));
        assert!(payload.text.contains("like water"));
        assert_eq!(payload.context.line_order, Some(2));
    }

    #[test]
    fn story_payload_joins_title_and_paragraphs() {
        let story = StoryRecord {
            chapter: 8,
            title: Some("The river".to_string()),
            content: vec!["First.".to_string(), String::new(), "Second.".to_string()],
        };
        let payload = ClipPayload::story(&story);
        assert_eq!(payload.text, "The river\nFirst.\n\nSecond.");
        assert_eq!(payload.context.story_title.as_deref(), Some("The river"));
    }

    #[test]
    fn clip_kind_round_trips_through_str() {
        for kind in [
            ClipKind::Original,
            ClipKind::Translation,
            ClipKind::OriginalTranslation,
            ClipKind::KeySentence,
            ClipKind::Analysis,
            ClipKind::AnalysisLine,
            ClipKind::Story,
        ] {
            assert_eq!(kind.as_str().parse::<ClipKind>().unwrap(), kind);
        }
    }
}
