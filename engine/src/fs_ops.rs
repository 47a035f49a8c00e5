//! Filesystem operations module.
//!
//! This module provides low-level operations for:
//! - Scanning the origin tree into `FileRecord`s (exclude rules applied,
//!   excluded directories pruned)
//! - Copying files with metadata preservation
//! - Creating directories recursively

use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::EngineError;
use crate::model::{FileRecord, Issue, IssueKind};
use crate::rules::ExcludeRuleSet;

/// Files found by a scan plus the entries that could not be read.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Regular files, sorted by relative path, without fingerprints
    pub records: Vec<FileRecord>,
    /// Unreadable entries, broken symlinks, non-UTF-8 names
    pub issues: Vec<Issue>,
}

/// Validate that `root` is an accessible directory.
///
/// # Errors
/// `OriginNotFound`, `OriginNotDirectory` or `OriginAccessDenied`.
pub fn check_origin(root: &Path) -> Result<(), EngineError> {
    match fs::metadata(root) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::OriginNotDirectory {
            path: root.to_path_buf(),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(EngineError::OriginNotFound {
            path: root.to_path_buf(),
        }),
        Err(e) => Err(EngineError::OriginAccessDenied {
            path: root.to_path_buf(),
            source: e,
        }),
    }
}

/// Convert a path under `root` into a forward-slash relative path.
///
/// Returns `None` for the root itself or for names that are not valid UTF-8.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        parts.push(component.as_os_str().to_str()?);
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Walk the origin tree and return every regular file not excluded by
/// `rules`, in lexicographic path order.
///
/// Symlinks are followed. Broken links, permission errors and non-UTF-8
/// names become `IssueKind::Scan` issues; the walk continues.
///
/// # Errors
/// Returns EngineError only if the root itself is missing or not a directory.
pub fn scan_tree(root: &Path, rules: &ExcludeRuleSet) -> Result<ScanOutcome, EngineError> {
    check_origin(root)?;

    let mut outcome = ScanOutcome::default();

    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            match relative_key(root, entry.path()) {
                Some(rel) => {
                    let excluded = rules.is_excluded(&rel);
                    if excluded {
                        debug!(path = %rel, "Excluded");
                    }
                    !excluded
                }
                // Keep it so the loop below can report it.
                None => true,
            }
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e
                    .path()
                    .and_then(|p| relative_key(root, p))
                    .unwrap_or_else(|| {
                        e.path()
                            .map(|p| p.display().to_string())
                            .unwrap_or_default()
                    });
                warn!(path = %path, error = %e, "Skipping unreadable entry");
                outcome
                    .issues
                    .push(Issue::new(IssueKind::Scan, path, e.to_string()));
                continue;
            }
        };

        if entry.depth() == 0 || !entry.file_type().is_file() {
            continue;
        }

        let Some(rel) = relative_key(root, entry.path()) else {
            let shown = entry.path().display().to_string();
            warn!(path = %shown, "Skipping path that is not valid UTF-8");
            outcome.issues.push(Issue::new(
                IssueKind::Scan,
                shown,
                "path is not valid UTF-8",
            ));
            continue;
        };

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %rel, error = %e, "Skipping file without metadata");
                outcome
                    .issues
                    .push(Issue::new(IssueKind::Scan, rel, e.to_string()));
                continue;
            }
        };

        let modified: DateTime<Utc> = match metadata.modified() {
            Ok(time) => time.into(),
            Err(e) => {
                warn!(path = %rel, error = %e, "Skipping file without modification time");
                outcome
                    .issues
                    .push(Issue::new(IssueKind::Scan, rel, e.to_string()));
                continue;
            }
        };

        outcome
            .records
            .push(FileRecord::new(rel, metadata.len(), modified));
    }

    // Sibling order from the walker is not full-path order ("a-b" < "a/b").
    outcome.records.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(outcome)
}

/// Copy a file from source to destination with metadata preservation.
///
/// # Returns
/// Number of bytes copied
///
/// # Errors
/// Returns EngineError if the copy fails
pub fn copy_file_with_metadata(src: &Path, dst: &Path) -> Result<u64, EngineError> {
    ensure_parent_dir_exists(dst)?;

    let mut src_file = fs::File::open(src).map_err(|e| EngineError::ReadError {
        path: src.to_path_buf(),
        source: e,
    })?;

    let src_mtime = src_file
        .metadata()
        .and_then(|m| m.modified())
        .map_err(|e| EngineError::ReadError {
            path: src.to_path_buf(),
            source: e,
        })?;

    let mut dst_file = fs::File::create(dst)?;
    let bytes_copied = io::copy(&mut src_file, &mut dst_file)?;
    drop(dst_file);

    // Best effort; the content is what matters.
    if let Err(e) = filetime::set_file_mtime(dst, filetime::FileTime::from_system_time(src_mtime)) {
        debug!(path = %dst.display(), error = %e, "Could not preserve modification time");
    }

    Ok(bytes_copied)
}

/// Ensure the parent directory of a path exists, creating it if necessary.
///
/// # Errors
/// Returns EngineError if the parent exists as a file or cannot be created.
pub fn ensure_parent_dir_exists(path: &Path) -> Result<(), EngineError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir_exists(parent),
        _ => Ok(()),
    }
}

/// Create `dir` (and its parents) unless it is already a directory.
///
/// # Errors
/// Returns EngineError if `dir` exists as a file or cannot be created.
pub fn ensure_dir_exists(dir: &Path) -> Result<(), EngineError> {
    match fs::metadata(dir) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::Unknown {
            message: format!("{} exists but is not a directory", dir.display()),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(dir)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
