//! Change detection.
//!
//! `diff` classifies the current scan against the cache snapshot, and
//! `detect_renames` turns delete+upload pairs with identical content into
//! remote renames.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::cache::CacheSnapshot;
use crate::checksums::ChecksumValue;
use crate::model::{ChangeSet, FileRecord};
use crate::plan::parent_dirs;

/// Classify every path of `current` and `previous`.
///
/// - in current only: `added`
/// - in both, content hash differs: `modified`
/// - in both, content hash equal: `unchanged`
/// - in previous only: `removed`
///
/// Timestamps play no role here; two records with equal hashes are
/// unchanged whatever their modification times. With `force`, every current
/// path is `modified` and `removed` is computed as usual.
///
/// `renamed` is left empty; see [`detect_renames`].
pub fn diff(
    current: &BTreeMap<String, FileRecord>,
    previous: &CacheSnapshot,
    force: bool,
) -> ChangeSet {
    let mut changes = ChangeSet::default();

    for (path, record) in current {
        if force {
            changes.modified.push(path.clone());
            continue;
        }
        match previous.get(path) {
            None => changes.added.push(path.clone()),
            Some(cached) => {
                if hashes_equal(record.content_hash.as_ref(), cached.content_hash.as_ref()) {
                    changes.unchanged.push(path.clone());
                } else {
                    changes.modified.push(path.clone());
                }
            }
        }
    }

    changes.removed = previous
        .paths()
        .filter(|path| !current.contains_key(*path))
        .map(str::to_string)
        .collect();

    debug!(
        added = changes.added.len(),
        modified = changes.modified.len(),
        removed = changes.removed.len(),
        unchanged = changes.unchanged.len(),
        "Diff complete"
    );

    changes
}

/// A missing hash never equals anything, including another missing hash.
fn hashes_equal(a: Option<&ChecksumValue>, b: Option<&ChecksumValue>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a == b)
}

/// Result of rename detection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenameOutcome {
    /// (from, to) pairs, in order of `to`
    pub renamed: Vec<(String, String)>,
    /// Added paths that were not paired
    pub added: Vec<String>,
    /// Removed paths that were not paired
    pub removed: Vec<String>,
}

/// Pair removed paths with added paths of identical content.
///
/// Added paths are visited in lexicographic order. Each takes the
/// lexicographically smallest still-unclaimed removed path with the same
/// hash. Paths whose hash is unknown are never paired.
///
/// Known limitation: content-identical files are indistinguishable, so when
/// several removed paths share a hash the pairing is a deterministic
/// heuristic, not a guarantee of which file "really" moved. The remote
/// result is the same bytes under the same names either way.
pub fn detect_renames<'a, F>(added: &[String], removed: &[String], hash_of: F) -> RenameOutcome
where
    F: Fn(&str) -> Option<&'a ChecksumValue>,
{
    let mut candidates: HashMap<&ChecksumValue, BTreeSet<&str>> = HashMap::new();
    for path in removed {
        if let Some(hash) = hash_of(path) {
            candidates.entry(hash).or_default().insert(path.as_str());
        }
    }

    let mut sorted_added: Vec<&String> = added.iter().collect();
    sorted_added.sort();

    let mut outcome = RenameOutcome::default();
    let mut claimed: BTreeSet<String> = BTreeSet::new();

    for path in sorted_added {
        let pick = hash_of(path)
            .and_then(|hash| candidates.get_mut(hash))
            .and_then(|pool| pool.pop_first());

        match pick {
            Some(from) => {
                debug!(from, to = %path, "Detected rename");
                claimed.insert(from.to_string());
                outcome.renamed.push((from.to_string(), path.clone()));
            }
            None => outcome.added.push(path.clone()),
        }
    }

    outcome.removed = removed
        .iter()
        .filter(|path| !claimed.contains(path.as_str()))
        .cloned()
        .collect();
    outcome.removed.sort();

    outcome
}

/// Run rename detection on a change set in place.
///
/// Added paths get their hash from `current`, removed paths from `previous`.
/// A removed file whose path is now a local directory is never a rename
/// source: the remote file has to be deleted before that directory can be
/// created, so it stays in `removed`.
pub fn apply_renames(
    changes: &mut ChangeSet,
    current: &BTreeMap<String, FileRecord>,
    previous: &CacheSnapshot,
) {
    let hash_of = |path: &str| {
        current
            .get(path)
            .or_else(|| previous.get(path))
            .and_then(|record| record.content_hash.as_ref())
    };

    let now_dirs: BTreeSet<&str> = current
        .keys()
        .map(String::as_str)
        .flat_map(parent_dirs)
        .collect();
    let (shadowed, sources): (Vec<String>, Vec<String>) = changes
        .removed
        .iter()
        .cloned()
        .partition(|path| now_dirs.contains(path.as_str()));

    let outcome = detect_renames(&changes.added, &sources, hash_of);
    changes.renamed = outcome.renamed;
    changes.added = outcome.added;
    changes.removed = outcome.removed;
    changes.removed.extend(shadowed);
    changes.removed.sort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksums::ChecksumAlgorithm;
    use chrono::{TimeZone, Utc};

    fn hash(hex: &str) -> ChecksumValue {
        ChecksumValue::new(ChecksumAlgorithm::Md5, hex.to_string())
    }

    fn record(path: &str, hex: &str, secs: i64) -> FileRecord {
        FileRecord::new(path, 4, Utc.timestamp_opt(secs, 0).unwrap()).with_hash(hash(hex))
    }

    fn current(records: &[FileRecord]) -> BTreeMap<String, FileRecord> {
        records
            .iter()
            .map(|r| (r.path.clone(), r.clone()))
            .collect()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_diff_classifies_all_four_cases() {
        let previous = CacheSnapshot::from_records(vec![
            record("same.txt", "11", 1),
            record("edited.txt", "22", 1),
            record("gone.txt", "33", 1),
        ]);
        let now = current(&[
            record("same.txt", "11", 1),
            record("edited.txt", "99", 2),
            record("new.txt", "44", 2),
        ]);

        let changes = diff(&now, &previous, false);

        assert_eq!(changes.added, strings(&["new.txt"]));
        assert_eq!(changes.modified, strings(&["edited.txt"]));
        assert_eq!(changes.unchanged, strings(&["same.txt"]));
        assert_eq!(changes.removed, strings(&["gone.txt"]));
        assert!(changes.renamed.is_empty());
    }

    #[test]
    fn test_diff_hash_is_authoritative_over_mtime() {
        let previous = CacheSnapshot::from_records(vec![record("a.txt", "11", 1_000)]);
        let now = current(&[record("a.txt", "11", 5_000)]);

        let changes = diff(&now, &previous, false);

        assert_eq!(changes.unchanged, strings(&["a.txt"]));
        assert!(changes.modified.is_empty());
    }

    #[test]
    fn test_diff_force_marks_everything_modified() {
        let previous = CacheSnapshot::from_records(vec![
            record("a.txt", "11", 1),
            record("old.txt", "22", 1),
        ]);
        let now = current(&[record("a.txt", "11", 1), record("b.txt", "33", 1)]);

        let changes = diff(&now, &previous, true);

        assert_eq!(changes.modified, strings(&["a.txt", "b.txt"]));
        assert!(changes.added.is_empty());
        assert!(changes.unchanged.is_empty());
        assert_eq!(changes.removed, strings(&["old.txt"]));
    }

    #[test]
    fn test_diff_missing_cached_hash_is_modified() {
        let mut cached = record("a.txt", "11", 1);
        cached.content_hash = None;
        let previous = CacheSnapshot::from_records(vec![cached]);
        let now = current(&[record("a.txt", "11", 1)]);

        let changes = diff(&now, &previous, false);
        assert_eq!(changes.modified, strings(&["a.txt"]));
    }

    #[test]
    fn test_diff_detects_new_file() {
        let previous = CacheSnapshot::from_records(vec![record("a.txt", "h1", 1)]);
        let now = current(&[record("a.txt", "h1", 1), record("b.txt", "h2", 1)]);

        let changes = diff(&now, &previous, false);
        assert_eq!(changes.added, strings(&["b.txt"]));
        assert_eq!(changes.unchanged, strings(&["a.txt"]));
        assert!(changes.removed.is_empty());
    }

    #[test]
    fn test_rename_single_match() {
        let previous = CacheSnapshot::from_records(vec![record("a/old.txt", "h1", 1)]);
        let now = current(&[record("a/new.txt", "h1", 1)]);

        let mut changes = diff(&now, &previous, false);
        apply_renames(&mut changes, &now, &previous);

        assert_eq!(
            changes.renamed,
            vec![("a/old.txt".to_string(), "a/new.txt".to_string())]
        );
        assert!(changes.added.is_empty());
        assert!(changes.removed.is_empty());
    }

    #[test]
    fn test_rename_requires_equal_content() {
        let previous = CacheSnapshot::from_records(vec![
            record("keep.txt", "h1", 1),
            record("dup.txt", "h1", 1),
        ]);
        let now = current(&[record("keep.txt", "h1", 1), record("other.txt", "h2", 1)]);

        let mut changes = diff(&now, &previous, false);
        apply_renames(&mut changes, &now, &previous);

        assert!(changes.renamed.is_empty());
        assert_eq!(changes.added, strings(&["other.txt"]));
        assert_eq!(changes.removed, strings(&["dup.txt"]));
    }

    #[test]
    fn test_rename_tie_break_picks_smallest_path() {
        let h = hash("h1");
        let hashes: HashMap<&str, &ChecksumValue> = [
            ("z.txt", &h),
            ("b.txt", &h),
            ("m.txt", &h),
            ("new1.txt", &h),
            ("new2.txt", &h),
        ]
        .into_iter()
        .collect();

        let outcome = detect_renames(
            &strings(&["new2.txt", "new1.txt"]),
            &strings(&["z.txt", "b.txt", "m.txt"]),
            |p| hashes.get(p).copied(),
        );

        assert_eq!(
            outcome.renamed,
            vec![
                ("b.txt".to_string(), "new1.txt".to_string()),
                ("m.txt".to_string(), "new2.txt".to_string()),
            ]
        );
        assert!(outcome.added.is_empty());
        assert_eq!(outcome.removed, strings(&["z.txt"]));
    }

    #[test]
    fn test_rename_is_stable_across_input_order() {
        let h = hash("h1");
        let lookup = |_: &str| Some(&h);

        let first = detect_renames(&strings(&["x", "y"]), &strings(&["b", "a"]), lookup);
        let second = detect_renames(&strings(&["y", "x"]), &strings(&["a", "b"]), lookup);

        assert_eq!(first, second);
    }

    #[test]
    fn test_rename_ignores_unknown_hashes() {
        let outcome = detect_renames(&strings(&["new.txt"]), &strings(&["old.txt"]), |_| None);
        assert!(outcome.renamed.is_empty());
        assert_eq!(outcome.added, strings(&["new.txt"]));
        assert_eq!(outcome.removed, strings(&["old.txt"]));
    }

    #[test]
    fn test_file_replaced_by_directory_is_not_a_rename_source() {
        let previous = CacheSnapshot::from_records(vec![record("a", "11", 1)]);
        let now = current(&[record("a/a", "11", 2)]);

        let mut changes = diff(&now, &previous, false);
        apply_renames(&mut changes, &now, &previous);

        assert!(changes.renamed.is_empty());
        assert_eq!(changes.added, strings(&["a/a"]));
        assert_eq!(changes.removed, strings(&["a"]));
    }
}
