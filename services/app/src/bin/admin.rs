//! services/app/src/bin/admin.rs
//!
//! Administrative corpus maintenance: audit the chapter collection, export it
//! as a JSON backup, and bulk-upsert chapters from an uploaded JSON file in
//! bounded atomic chunks.

use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use app_lib::{adapters::store::DbStore, config::Config, error::AppError};
use dao_reader_core::batch::{inspect, normalize_for_upload, run_batch_upsert};
use dao_reader_core::domain::ChapterRecord;
use dao_reader_core::ports::CorpusStore;

const USAGE: &str = "\
usage:
  admin inspect                      audit the corpus for missing fields
  admin export [FILE] [--chapter N]  dump chapter documents as JSON
  admin import FILE [--replace]      bulk-upsert chapters from a JSON file";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Inspect,
    Export { path: PathBuf, chapter: Option<u32> },
    Import { path: PathBuf, merge: bool },
}

fn parse_args(args: &[String]) -> Result<Command, AppError> {
    let usage = || AppError::Usage(USAGE.to_string());

    match args.first().map(String::as_str) {
        Some("inspect") => Ok(Command::Inspect),
        Some("export") => {
            let mut path = PathBuf::from("chapters.json");
            let mut chapter = None;
            let mut rest = args[1..].iter();
            while let Some(arg) = rest.next() {
                if arg == "--chapter" {
                    let value = rest.next().ok_or_else(usage)?;
                    chapter = Some(value.parse().map_err(|_| {
                        AppError::Usage(format!("'{value}' is not a chapter number"))
                    })?);
                } else {
                    path = PathBuf::from(arg);
                }
            }
            Ok(Command::Export { path, chapter })
        }
        Some("import") => {
            let mut path = None;
            let mut merge = true;
            for arg in &args[1..] {
                if arg == "--replace" {
                    merge = false;
                } else {
                    path = Some(PathBuf::from(arg));
                }
            }
            Ok(Command::Import {
                path: path.ok_or_else(usage)?,
                merge,
            })
        }
        _ => Err(usage()),
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;

    // --- 2. Connect to Database & Run Migrations ---
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;
    let store = DbStore::new(pool);
    store.run_migrations().await?;

    match command {
        Command::Inspect => run_inspect(&store).await,
        Command::Export { path, chapter } => run_export(&store, &path, chapter).await,
        Command::Import { path, merge } => run_import(store, &path, merge).await,
    }
}

async fn run_inspect(store: &DbStore) -> Result<(), AppError> {
    let docs = store.fetch_chapters().await?;
    let records: Vec<ChapterRecord> = docs.iter().filter_map(ChapterRecord::from_doc).collect();
    let undecodable = docs.len() - records.len();
    if undecodable > 0 {
        warn!(undecodable, "documents without a numeric chapter key");
    }

    let audit = inspect(&records);
    info!(total = audit.total, "corpus loaded");
    info!(
        missing_title = audit.missing_title,
        missing_tags = audit.missing_tags,
        missing_subtitle = audit.missing_subtitle,
        missing_lines = audit.missing_lines,
        missing_analysis = audit.missing_analysis,
        missing_any = audit.missing_any,
        "field audit"
    );
    if !audit.sample_no_title.is_empty() {
        info!(chapters = ?audit.sample_no_title, "sample chapters without a title");
    }
    if !audit.sample_no_tags.is_empty() {
        info!(chapters = ?audit.sample_no_tags, "sample chapters without tags");
    }
    Ok(())
}

async fn run_export(store: &DbStore, path: &PathBuf, chapter: Option<u32>) -> Result<(), AppError> {
    let mut docs = match chapter {
        Some(n) => {
            let doc = store
                .fetch_chapter(n)
                .await?
                .ok_or_else(|| AppError::Usage(format!("chapter {n} does not exist")))?;
            vec![doc]
        }
        None => store.fetch_chapters().await?,
    };

    docs.sort_by_key(|doc| {
        doc.data
            .get("chapter")
            .and_then(Value::as_u64)
            .or_else(|| doc.id.parse().ok())
            .unwrap_or(u64::MAX)
    });

    let payload: Vec<&Value> = docs.iter().map(|doc| &doc.data).collect();
    std::fs::write(path, serde_json::to_string_pretty(&payload)?)?;
    info!(count = docs.len(), path = %path.display(), "export written");
    Ok(())
}

async fn run_import(store: DbStore, path: &PathBuf, merge: bool) -> Result<(), AppError> {
    let raw = std::fs::read_to_string(path)?;
    let parsed: Vec<Value> = serde_json::from_str(&raw)?;

    let records: Vec<_> = parsed.iter().filter_map(normalize_for_upload).collect();
    let dropped = parsed.len() - records.len();
    if dropped > 0 {
        warn!(dropped, "records without a numeric chapter key were skipped");
    }
    if records.is_empty() {
        return Err(AppError::Usage(format!(
            "{} contains no importable chapter records",
            path.display()
        )));
    }

    let total = records.len();
    info!(total, merge, "starting chunked upsert");

    let store: Arc<dyn CorpusStore> = Arc::new(store);
    let mut progress = run_batch_upsert(store, records, merge);
    while let Some(step) = progress.next().await {
        match step {
            Ok(p) => info!(committed = p.committed, total = p.total, "chunk committed"),
            Err(e) => {
                // Chunks already committed stay committed; nothing after the
                // failing chunk was attempted.
                error!(committed = e.committed, total = e.total, "import aborted: {}", e.source);
                return Err(AppError::Store(e.source));
            }
        }
    }

    info!(
        total,
        mode = if merge { "merge" } else { "replace" },
        "import complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_import_with_merge_default() {
        let cmd = parse_args(&args(&["import", "chapters.json"])).unwrap();
        assert_eq!(
            cmd,
            Command::Import {
                path: PathBuf::from("chapters.json"),
                merge: true,
            }
        );
    }

    #[test]
    fn parses_import_replace_flag() {
        let cmd = parse_args(&args(&["import", "chapters.json", "--replace"])).unwrap();
        assert_eq!(
            cmd,
            Command::Import {
                path: PathBuf::from("chapters.json"),
                merge: false,
            }
        );
    }

    #[test]
    fn parses_export_with_single_chapter() {
        let cmd = parse_args(&args(&["export", "out.json", "--chapter", "9"])).unwrap();
        assert_eq!(
            cmd,
            Command::Export {
                path: PathBuf::from("out.json"),
                chapter: Some(9),
            }
        );
    }

    #[test]
    fn rejects_missing_or_unknown_commands() {
        assert!(parse_args(&[]).is_err());
        assert!(parse_args(&args(&["frobnicate"])).is_err());
        assert!(parse_args(&args(&["import"])).is_err());
        assert!(parse_args(&args(&["export", "--chapter", "nine"])).is_err());
    }
}
