//! File names inside the data directory.

use std::path::{Path, PathBuf};

use levelq_core::types::Timestamp;

pub const QUEUE_FILE: &str = "queue.json";
pub const LEGACY_QUEUE_FILE: &str = "queue.save";
pub const LEGACY_WAITING_FILE: &str = "waiting.json";
pub const EXTENSIONS_DIR: &str = "extensions";
pub const CUSTOM_CODES_FILE: &str = "customcodes.json";
pub const LEGACY_CUSTOM_CODES_FILE: &str = "customCodes.json";

/// Root of all persisted documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn queue_path(&self) -> PathBuf {
        self.root.join(QUEUE_FILE)
    }

    pub fn legacy_queue_path(&self) -> PathBuf {
        self.root.join(LEGACY_QUEUE_FILE)
    }

    pub fn legacy_waiting_path(&self) -> PathBuf {
        self.root.join(LEGACY_WAITING_FILE)
    }

    /// Path of an extension document, keyed by extension name.
    pub fn extension_path(&self, name: &str) -> PathBuf {
        self.root.join(EXTENSIONS_DIR).join(format!("{name}.json"))
    }

    pub fn custom_codes_path(&self) -> PathBuf {
        self.root.join(EXTENSIONS_DIR).join(CUSTOM_CODES_FILE)
    }

    pub fn legacy_custom_codes_path(&self) -> PathBuf {
        self.root.join(LEGACY_CUSTOM_CODES_FILE)
    }

    /// Side file for entries an upgrade could not carry over.
    pub fn lost_levels_path(&self, at: Timestamp) -> PathBuf {
        lost_levels_path(&self.root, at)
    }

    /// The stored document to load: the current file if present, else the
    /// legacy one, else `None`.
    pub fn locate(current: PathBuf, legacy: PathBuf) -> Option<PathBuf> {
        if current.is_file() {
            Some(current)
        } else if legacy.is_file() {
            Some(legacy)
        } else {
            None
        }
    }
}

pub fn lost_levels_path(dir: &Path, at: Timestamp) -> PathBuf {
    dir.join(format!("lost-levels-{}.json", at.format("%Y%m%dT%H%M%S")))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn lost_levels_name_uses_compact_timestamp() {
        let at = chrono::Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let path = DataDir::new("/data").lost_levels_path(at);
        assert_eq!(path, PathBuf::from("/data/lost-levels-20240309T070501.json"));
    }

    #[test]
    fn locate_prefers_current_file() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::new(dir.path());
        assert_eq!(DataDir::locate(data.queue_path(), data.legacy_queue_path()), None);

        std::fs::write(data.legacy_queue_path(), "[]").unwrap();
        assert_eq!(
            DataDir::locate(data.queue_path(), data.legacy_queue_path()),
            Some(data.legacy_queue_path())
        );

        std::fs::write(data.queue_path(), "{}").unwrap();
        assert_eq!(
            DataDir::locate(data.queue_path(), data.legacy_queue_path()),
            Some(data.queue_path())
        );
    }

    #[test]
    fn custom_codes_live_under_extensions() {
        let data = DataDir::new("d");
        assert_eq!(data.custom_codes_path(), data.extension_path("customcodes"));
    }
}
