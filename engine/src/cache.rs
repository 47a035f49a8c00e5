//! Deployment cache: what the remote server is believed to hold.
//!
//! The cache is the only durable state of the tool. It is loaded once at the
//! start of a run, mutated in memory after every successful remote
//! operation, and written atomically (temp file, then rename) so a crash
//! never leaves a half-written file behind.
//!
//! On disk:
//!
//! ```json
//! {
//!   "version": 1,
//!   "files": {
//!     "css/site.css": {
//!       "size": 1042,
//!       "modifiedTime": "2024-05-01T10:00:00.123456789Z",
//!       "contentHash": "md5:5d41402abc4b2a76b9719d911017c592",
//!       "uploadedAt": "2024-05-01T10:02:13Z"
//!     }
//!   }
//! }
//! ```
//!
//! Unknown fields are ignored so newer files stay readable.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::model::FileRecord;
use crate::rules::ExcludeRuleSet;

/// Default cache file name, stored next to the config file.
pub const CACHE_FILE_NAME: &str = ".ftp_cache.json";

/// Current on-disk format version.
pub const CACHE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    #[serde(default)]
    files: BTreeMap<String, FileRecord>,
}

/// In-memory mapping from relative path to last-known record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheSnapshot {
    entries: BTreeMap<String, FileRecord>,
}

impl CacheSnapshot {
    /// Build a snapshot from records (later duplicates win).
    pub fn from_records(records: impl IntoIterator<Item = FileRecord>) -> Self {
        let entries = records
            .into_iter()
            .map(|record| (record.path.clone(), record))
            .collect();
        CacheSnapshot { entries }
    }

    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Paths in lexicographic order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Records in path order.
    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.entries.values()
    }

    /// Copy of this snapshot without the paths matched by `rules`, plus the
    /// list of paths that were dropped.
    pub fn without_excluded(&self, rules: &ExcludeRuleSet) -> (CacheSnapshot, Vec<String>) {
        let mut kept = BTreeMap::new();
        let mut dropped = Vec::new();
        for (path, record) in &self.entries {
            if rules.is_excluded(path) {
                dropped.push(path.clone());
            } else {
                kept.insert(path.clone(), record.clone());
            }
        }
        (CacheSnapshot { entries: kept }, dropped)
    }

    fn insert(&mut self, record: FileRecord) {
        self.entries.insert(record.path.clone(), record);
    }

    fn remove(&mut self, path: &str) -> Option<FileRecord> {
        self.entries.remove(path)
    }
}

/// Owner of the cache file and its in-memory snapshot.
///
/// All mutation of cached state goes through `update`, `remove` and `save`.
#[derive(Debug)]
pub struct CacheRepository {
    path: PathBuf,
    snapshot: CacheSnapshot,
    dirty: bool,
}

impl CacheRepository {
    /// Load the cache file at `path`.
    ///
    /// Never fails: a missing file gives an empty snapshot, and an unreadable,
    /// malformed or future-version file gives an empty snapshot plus a
    /// warning (so the next run degrades to a full upload instead of a crash).
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let snapshot = match Self::read_snapshot(&path) {
            Ok(Some(snapshot)) => {
                info!(path = %path.display(), entries = snapshot.len(), "Loaded cache");
                snapshot
            }
            Ok(None) => {
                debug!(path = %path.display(), "No cache file; starting empty");
                CacheSnapshot::default()
            }
            Err(reason) => {
                warn!(path = %path.display(), %reason, "Ignoring unreadable cache; all files will be uploaded");
                CacheSnapshot::default()
            }
        };

        CacheRepository {
            path,
            snapshot,
            dirty: false,
        }
    }

    fn read_snapshot(path: &Path) -> Result<Option<CacheSnapshot>, String> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.to_string()),
        };

        let parsed: CacheFile =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| e.to_string())?;

        if parsed.version != CACHE_VERSION {
            return Err(format!(
                "unsupported cache version {} (expected {})",
                parsed.version, CACHE_VERSION
            ));
        }

        let records = parsed.files.into_iter().map(|(path, mut record)| {
            record.path = path;
            record
        });
        Ok(Some(CacheSnapshot::from_records(records)))
    }

    /// Location of the cache file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current in-memory snapshot.
    pub fn snapshot(&self) -> &CacheSnapshot {
        &self.snapshot
    }

    /// True if there are changes not yet written by `save`.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Record that `record.path` now holds `record` remotely.
    pub fn update(&mut self, record: FileRecord) {
        debug!(path = %record.path, "Cache update");
        self.snapshot.insert(record);
        self.dirty = true;
    }

    /// Record that `path` no longer exists remotely.
    pub fn remove(&mut self, path: &str) -> Option<FileRecord> {
        let removed = self.snapshot.remove(path);
        if removed.is_some() {
            debug!(path, "Cache remove");
            self.dirty = true;
        }
        removed
    }

    /// Drop entries matched by exclude rules. Returns the dropped paths.
    pub fn forget_excluded(&mut self, rules: &ExcludeRuleSet) -> Vec<String> {
        let (kept, dropped) = self.snapshot.without_excluded(rules);
        if !dropped.is_empty() {
            info!(count = dropped.len(), "Forgetting excluded paths from cache");
            self.snapshot = kept;
            self.dirty = true;
        }
        dropped
    }

    /// Write the snapshot atomically: `<file>.tmp` is written and flushed,
    /// then renamed over the cache file.
    ///
    /// # Errors
    /// Returns `EngineError::CacheWrite` if any step fails. The previous
    /// cache file is left intact in that case.
    pub fn save(&mut self) -> Result<(), EngineError> {
        let write_error = |path: &Path, source| EngineError::CacheWrite {
            path: path.to_path_buf(),
            source,
        };

        let contents = CacheFile {
            version: CACHE_VERSION,
            files: self
                .snapshot
                .records()
                .map(|record| (record.path.clone(), record.clone()))
                .collect(),
        };

        let temp_path = temp_path_for(&self.path);
        if let Some(parent) = temp_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| write_error(parent, e))?;
            }
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| write_error(&temp_path, e))?;

        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &contents)
            .map_err(|e| write_error(&temp_path, e.into()))?;
        writer.flush().map_err(|e| write_error(&temp_path, e))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| write_error(&temp_path, e))?;
        drop(writer);

        fs::rename(&temp_path, &self.path).map_err(|e| write_error(&self.path, e))?;

        self.dirty = false;
        debug!(path = %self.path.display(), entries = self.snapshot.len(), "Cache saved");
        Ok(())
    }
}

/// `<file>.tmp`, the staging file `save` renames over `path`.
pub(crate) fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksums::{ChecksumAlgorithm, ChecksumValue};
    use chrono::{TimeZone, Utc};

    fn record(path: &str, hex: &str) -> FileRecord {
        FileRecord::new(path, 3, Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap())
            .with_hash(ChecksumValue::new(ChecksumAlgorithm::Md5, hex.to_string()))
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let repo = CacheRepository::load(temp_dir.path().join(CACHE_FILE_NAME));
        assert!(repo.snapshot().is_empty());
        assert!(!repo.is_dirty());
    }

    #[test]
    fn test_load_corrupt_file_is_empty() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join(CACHE_FILE_NAME);
        fs::write(&path, b"{ this is not json").expect("Failed to write cache");

        let repo = CacheRepository::load(&path);
        assert!(repo.snapshot().is_empty());
    }

    #[test]
    fn test_load_future_version_is_empty() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join(CACHE_FILE_NAME);
        fs::write(&path, br#"{"version": 99, "files": {}}"#).expect("Failed to write cache");

        let repo = CacheRepository::load(&path);
        assert!(repo.snapshot().is_empty());
    }

    #[test]
    fn test_save_then_load_preserves_entries() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join(CACHE_FILE_NAME);

        let mut repo = CacheRepository::load(&path);
        repo.update(record("a.txt", "aa"));
        repo.update(record("dir/b.txt", "bb"));
        repo.save().expect("Failed to save cache");
        assert!(!repo.is_dirty());

        let reloaded = CacheRepository::load(&path);
        assert_eq!(reloaded.snapshot(), repo.snapshot());
        let a = reloaded.snapshot().get("a.txt").expect("a.txt should be cached");
        assert_eq!(a.path, "a.txt");
        assert_eq!(a.modified_time.timestamp_subsec_nanos(), 123_456_789);
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join(CACHE_FILE_NAME);

        let mut repo = CacheRepository::load(&path);
        repo.update(record("a.txt", "aa"));
        repo.save().expect("Failed to save cache");

        assert!(path.exists());
        assert!(!temp_path_for(&path).exists());
    }

    #[test]
    fn test_failed_save_keeps_previous_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join(CACHE_FILE_NAME);

        let mut repo = CacheRepository::load(&path);
        repo.update(record("a.txt", "aa"));
        repo.save().expect("Failed to save cache");
        let before = fs::read_to_string(&path).expect("Failed to read cache");

        // A directory squatting on the temp path makes the write fail.
        fs::create_dir(temp_path_for(&path)).expect("Failed to create blocker");
        repo.update(record("b.txt", "bb"));
        assert!(repo.save().is_err());

        let after = fs::read_to_string(&path).expect("Failed to read cache");
        assert_eq!(before, after);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join(CACHE_FILE_NAME);
        let json = r#"{
            "version": 1,
            "generator": "future-release",
            "files": {
                "a.txt": {
                    "size": 3,
                    "modifiedTime": "2024-01-01T00:00:00Z",
                    "contentHash": "md5:900150983cd24fb0d6963f7d28e17f72",
                    "permissions": "0644"
                }
            }
        }"#;
        fs::write(&path, json).expect("Failed to write cache");

        let repo = CacheRepository::load(&path);
        let a = repo.snapshot().get("a.txt").expect("a.txt should load");
        assert_eq!(a.size, 3);
        assert!(a.uploaded_at.is_none());
    }

    #[test]
    fn test_remove_marks_dirty_only_when_present() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut repo = CacheRepository::load(temp_dir.path().join(CACHE_FILE_NAME));

        assert!(repo.remove("missing").is_none());
        assert!(!repo.is_dirty());

        repo.update(record("a.txt", "aa"));
        repo.save().expect("Failed to save cache");
        assert!(repo.remove("a.txt").is_some());
        assert!(repo.is_dirty());
    }

    #[test]
    fn test_forget_excluded() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut repo = CacheRepository::load(temp_dir.path().join(CACHE_FILE_NAME));
        repo.update(record("keep.txt", "aa"));
        repo.update(record("TEMP/x.txt", "bb"));

        let rules = ExcludeRuleSet::new(["TEMP/"]).expect("Rules should compile");
        let dropped = repo.forget_excluded(&rules);

        assert_eq!(dropped, vec!["TEMP/x.txt".to_string()]);
        assert!(repo.snapshot().contains("keep.txt"));
        assert!(!repo.snapshot().contains("TEMP/x.txt"));
    }
}
