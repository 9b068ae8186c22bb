pub mod batch;
pub mod browser;
pub mod corpus;
pub mod domain;
pub mod filter;
pub mod memory;
pub mod ports;
pub mod prefs;
pub mod saved;
pub mod session;

pub use batch::{inspect, normalize_for_upload, run_batch_upsert, BatchError, BatchProgress, CorpusAudit};
pub use browser::ChapterBrowser;
pub use corpus::{CorpusCache, CorpusSnapshot};
pub use domain::{
    Analysis, AnalysisSection, BookmarkRecord, ChapterDoc, ChapterRecord, ClipKind, ClipPayload,
    ClipRecord, Line, NewClip, StoryRecord, Subject, SubjectId,
};
pub use filter::{all_tags, visible_chapters, ChapterFilter, FilterMode};
pub use ports::{
    ChapterUpsert, CorpusStore, IdentityError, IdentityProvider, IdentityResult, PreferenceStore,
    StoreError, StoreResult, MAX_BATCH_OPS,
};
pub use prefs::Preferences;
pub use saved::{filter_clips, ClipQuery, SavedCoordinator, SavedError, ToggleOutcome};
pub use session::SessionManager;
