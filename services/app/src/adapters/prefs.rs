//! services/app/src/adapters/prefs.rs
//!
//! File-backed implementation of the `PreferenceStore` port: a flat JSON map
//! read once at startup and written through on every change. Write failures
//! are logged and swallowed; losing a display preference is harmless.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::warn;

use dao_reader_core::ports::PreferenceStore;

pub struct FilePrefs {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FilePrefs {
    /// Opens the preference file, starting empty when it is missing or
    /// unreadable.
    pub fn open(path: PathBuf) -> Self {
        let values = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(map) => map,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "preference file unreadable, starting empty");
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    fn persist(&self, values: &BTreeMap<String, String>) {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!(path = %self.path.display(), error = %e, "failed to create preference directory");
                return;
            }
        }
        let raw = match serde_json::to_string_pretty(values) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "failed to encode preferences");
                return;
            }
        };
        if let Err(e) = fs::write(&self.path, raw) {
            warn!(path = %self.path.display(), error = %e, "failed to write preferences");
        }
    }
}

impl PreferenceStore for FilePrefs {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .expect("prefs lock poisoned")
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut values = self.values.lock().expect("prefs lock poisoned");
        values.insert(key.to_string(), value.to_string());
        self.persist(&values);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("dao-reader-prefs-{}.json", Uuid::new_v4()))
    }

    #[test]
    fn values_survive_a_reopen() {
        let path = temp_path();
        {
            let prefs = FilePrefs::open(path.clone());
            prefs.set("lastChapter", "12");
            prefs.set("textView", "original");
        }
        let reopened = FilePrefs::open(path.clone());
        assert_eq!(reopened.get("lastChapter").as_deref(), Some("12"));
        assert_eq!(reopened.get("textView").as_deref(), Some("original"));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let path = temp_path();
        fs::write(&path, "{ not json").unwrap();
        let prefs = FilePrefs::open(path.clone());
        assert_eq!(prefs.get("lastChapter"), None);
        let _ = fs::remove_file(path);
    }
}
