//! Plan building.
//!
//! Turns a `ChangeSet` into an ordered list of remote operations that is
//! safe to execute one at a time and to stop at any point:
//!
//! 1. `MakeDir` for every missing parent directory, parents first
//! 2. `Rename`, so content already on the server is reused before any upload
//! 3. `Upload` for modified and added files
//! 4. `Delete` last, so nothing a rename still needs is removed early

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::cache::CacheSnapshot;
use crate::model::{ChangeSet, FileRecord, Operation, Plan};

/// Build the ordered plan for `changes`.
///
/// Directories that hold a file of the previous snapshot are assumed to
/// exist remotely; every other parent of an upload or rename target gets a
/// `MakeDir`.
pub fn build_plan(
    changes: &ChangeSet,
    current: &BTreeMap<String, FileRecord>,
    previous: &CacheSnapshot,
    origin: &Path,
) -> Plan {
    let known_dirs: BTreeSet<&str> = previous.paths().flat_map(parent_dirs).collect();

    let mut uploads: Vec<&String> = changes.added.iter().chain(&changes.modified).collect();
    uploads.sort();

    let mut renames: Vec<&(String, String)> = changes.renamed.iter().collect();
    renames.sort_by(|a, b| a.1.cmp(&b.1));

    let mut deletes: Vec<&String> = changes.removed.iter().collect();
    deletes.sort();

    // BTreeSet order puts "a" before "a/b", so parents come first.
    let needed_dirs: BTreeSet<&str> = uploads
        .iter()
        .map(|p| p.as_str())
        .chain(renames.iter().map(|(_, to)| to.as_str()))
        .flat_map(parent_dirs)
        .filter(|dir| !known_dirs.contains(dir))
        .collect();

    let mut operations = Vec::with_capacity(
        needed_dirs.len() + renames.len() + uploads.len() + deletes.len(),
    );

    operations.extend(needed_dirs.into_iter().map(|dir| Operation::MakeDir {
        path: dir.to_string(),
    }));

    operations.extend(renames.into_iter().map(|(from, to)| Operation::Rename {
        from: from.clone(),
        to: to.clone(),
    }));

    operations.extend(uploads.into_iter().map(|path| {
        let local_path = match current.get(path) {
            Some(record) => record.local_path(origin),
            None => path
                .split('/')
                .fold(origin.to_path_buf(), |acc, part| acc.join(part)),
        };
        Operation::Upload {
            local_path,
            remote_path: path.clone(),
        }
    }));

    operations.extend(deletes.into_iter().map(|path| Operation::Delete {
        remote_path: path.clone(),
    }));

    Plan { operations }
}

/// Every proper ancestor directory of a relative path: "a/b/c.txt" gives
/// "a" and "a/b".
pub fn parent_dirs(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/').map(move |(idx, _)| &path[..idx])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksums::{ChecksumAlgorithm, ChecksumValue};
    use chrono::Utc;

    fn record(path: &str, hex: &str) -> FileRecord {
        FileRecord::new(path, 1, Utc::now())
            .with_hash(ChecksumValue::new(ChecksumAlgorithm::Md5, hex.to_string()))
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn current(paths: &[&str]) -> BTreeMap<String, FileRecord> {
        paths
            .iter()
            .map(|p| (p.to_string(), record(p, "00")))
            .collect()
    }

    #[test]
    fn test_parent_dirs() {
        assert_eq!(parent_dirs("a/b/c.txt").collect::<Vec<_>>(), vec!["a", "a/b"]);
        assert_eq!(parent_dirs("top.txt").count(), 0);
    }

    #[test]
    fn test_plan_orders_mkdir_rename_upload_delete() {
        let previous = CacheSnapshot::from_records(vec![
            record("old/name.txt", "11"),
            record("stale.txt", "22"),
            record("edit.txt", "33"),
        ]);
        let changes = ChangeSet {
            added: strings(&["new/deep/file.txt"]),
            modified: strings(&["edit.txt"]),
            removed: strings(&["stale.txt"]),
            unchanged: vec![],
            renamed: vec![("old/name.txt".to_string(), "moved/name.txt".to_string())],
        };
        let now = current(&["new/deep/file.txt", "edit.txt", "moved/name.txt"]);

        let plan = build_plan(&changes, &now, &previous, Path::new("/site"));
        let kinds: Vec<_> = plan.operations.iter().map(|op| op.kind()).collect();

        assert_eq!(
            kinds,
            vec!["mkdir", "mkdir", "mkdir", "rename", "upload", "upload", "delete"]
        );
        let dirs: Vec<_> = plan.operations[..3].iter().map(|op| op.target()).collect();
        assert_eq!(dirs, vec!["moved", "new", "new/deep"]);
        assert_eq!(plan.operations[4].target(), "edit.txt");
        assert_eq!(plan.operations[5].target(), "new/deep/file.txt");
    }

    #[test]
    fn test_plan_skips_known_directories() {
        let previous = CacheSnapshot::from_records(vec![record("css/a.css", "11")]);
        let changes = ChangeSet {
            added: strings(&["css/b.css"]),
            ..ChangeSet::default()
        };

        let plan = build_plan(&changes, &current(&["css/b.css"]), &previous, Path::new("/site"));

        assert_eq!(plan.count("mkdir"), 0);
        assert_eq!(plan.count("upload"), 1);
    }

    #[test]
    fn test_plan_upload_uses_local_path() {
        let changes = ChangeSet {
            added: strings(&["img/logo.png"]),
            ..ChangeSet::default()
        };
        let plan = build_plan(
            &changes,
            &current(&["img/logo.png"]),
            &CacheSnapshot::default(),
            Path::new("/site"),
        );

        assert_eq!(
            plan.operations[1],
            Operation::Upload {
                local_path: Path::new("/site").join("img").join("logo.png"),
                remote_path: "img/logo.png".to_string(),
            }
        );
    }

    #[test]
    fn test_rename_only_plan() {
        let previous = CacheSnapshot::from_records(vec![record("a.txt", "h1")]);
        let changes = ChangeSet {
            renamed: vec![("a.txt".to_string(), "renamed.txt".to_string())],
            ..ChangeSet::default()
        };

        let plan = build_plan(&changes, &current(&["renamed.txt"]), &previous, Path::new("/s"));

        assert_eq!(
            plan.operations,
            vec![Operation::Rename {
                from: "a.txt".to_string(),
                to: "renamed.txt".to_string(),
            }]
        );
    }

    #[test]
    fn test_empty_changes_give_empty_plan() {
        let plan = build_plan(
            &ChangeSet::default(),
            &BTreeMap::new(),
            &CacheSnapshot::default(),
            Path::new("/s"),
        );
        assert!(plan.is_empty());
    }
}
