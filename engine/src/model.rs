//! Core data model for deployments.
//!
//! This module defines the main data structures:
//! - FileRecord: one tracked file (local scan result or cache entry)
//! - ChangeSet: per-run classification of paths
//! - Operation / Plan: the ordered remote operations of a run
//! - RunReport: outcomes and accumulated non-fatal issues
//! - DeployJob: the whole deployment, threaded through create/plan/run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use uuid::Uuid;

use crate::checksums::ChecksumValue;
use crate::config::DeployConfig;

/// One tracked file, keyed by its relative path.
///
/// Used both for the current scan and for cache entries. In the cache file
/// the path is the map key, so it is not serialized inside the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Relative path, forward-slash separated
    #[serde(skip)]
    pub path: String,

    /// File size in bytes
    pub size: u64,

    /// Local modification time (pre-filter only; the hash decides equality)
    pub modified_time: DateTime<Utc>,

    /// Content fingerprint; `None` until the fingerprint pass has run
    #[serde(default)]
    pub content_hash: Option<ChecksumValue>,

    /// When this content was last confirmed on the remote side
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    /// Create a record without a fingerprint.
    pub fn new(path: impl Into<String>, size: u64, modified_time: DateTime<Utc>) -> Self {
        FileRecord {
            path: path.into(),
            size,
            modified_time,
            content_hash: None,
            uploaded_at: None,
        }
    }

    /// Builder-style fingerprint setter.
    pub fn with_hash(mut self, hash: ChecksumValue) -> Self {
        self.content_hash = Some(hash);
        self
    }

    /// Absolute local path of this record under `root`.
    pub fn local_path(&self, root: &Path) -> PathBuf {
        self.path
            .split('/')
            .fold(root.to_path_buf(), |acc, part| acc.join(part))
    }
}

/// Classification of the current scan against the cache.
///
/// `added`, `modified`, `removed` and `unchanged` are disjoint and sorted.
/// `renamed` pairs are extracted from `added` x `removed` by the rename
/// detector; a renamed path appears in neither of those lists afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
    /// (from, to)
    pub renamed: Vec<(String, String)>,
}

impl ChangeSet {
    /// True when nothing needs to happen remotely.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.modified.is_empty()
            && self.removed.is_empty()
            && self.renamed.is_empty()
    }
}

/// A single remote operation. Remote paths are relative to the remote folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Create a remote directory (succeeds if it already exists)
    MakeDir { path: String },
    /// Transfer a local file
    Upload {
        local_path: PathBuf,
        remote_path: String,
    },
    /// Remove a remote file
    Delete { remote_path: String },
    /// Rename a remote file in place
    Rename { from: String, to: String },
}

impl Operation {
    /// The remote path this operation creates or touches.
    pub fn target(&self) -> &str {
        match self {
            Operation::MakeDir { path } => path,
            Operation::Upload { remote_path, .. } => remote_path,
            Operation::Delete { remote_path } => remote_path,
            Operation::Rename { to, .. } => to,
        }
    }

    /// Short verb used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::MakeDir { .. } => "mkdir",
            Operation::Upload { .. } => "upload",
            Operation::Delete { .. } => "delete",
            Operation::Rename { .. } => "rename",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::MakeDir { path } => write!(f, "mkdir {}", path),
            Operation::Upload {
                local_path,
                remote_path,
            } => write!(f, "upload {} -> {}", local_path.display(), remote_path),
            Operation::Delete { remote_path } => write!(f, "delete {}", remote_path),
            Operation::Rename { from, to } => write!(f, "rename {} -> {}", from, to),
        }
    }
}

/// Ordered list of remote operations, safe to execute incrementally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub operations: Vec<Operation>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Number of operations of the given kind ("upload", "rename", ...).
    pub fn count(&self, kind: &str) -> usize {
        self.operations.iter().filter(|op| op.kind() == kind).count()
    }
}

/// Outcome of one planned operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// Not executed yet (or dry run)
    Pending,
    /// Applied remotely and recorded in the cache
    Done,
    /// Attempted and failed; cache untouched
    Failed { reason: String },
    /// Not attempted because a prerequisite failed
    Skipped { reason: String },
    /// Not attempted because the run was aborted
    Aborted,
}

/// A planned operation together with what happened to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRecord {
    pub operation: Operation,
    pub outcome: OperationOutcome,
}

/// Category of a non-fatal problem found outside plan execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    /// Unreadable directory entry, broken symlink, non-UTF-8 name
    Scan,
    /// File could not be read for hashing
    Hash,
    /// Cache checkpoint could not be written
    Cache,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueKind::Scan => write!(f, "scan"),
            IssueKind::Hash => write!(f, "hash"),
            IssueKind::Cache => write!(f, "cache"),
        }
    }
}

/// A non-fatal problem, reported at the end of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub kind: IssueKind,
    pub path: String,
    pub message: String,
}

impl Issue {
    pub fn new(kind: IssueKind, path: impl Into<String>, message: impl Into<String>) -> Self {
        Issue {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Everything that happened during a run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// One entry per planned operation, in plan order
    pub operations: Vec<OperationRecord>,
    /// Scan, hash and cache problems
    pub issues: Vec<Issue>,
    /// True if the abort flag stopped execution
    pub aborted: bool,
    /// Bytes transferred by successful uploads
    pub bytes_uploaded: u64,
}

impl RunReport {
    pub fn done_count(&self) -> usize {
        self.count(|o| matches!(o, OperationOutcome::Done))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|o| matches!(o, OperationOutcome::Failed { .. }))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|o| matches!(o, OperationOutcome::Skipped { .. }))
    }

    pub fn aborted_count(&self) -> usize {
        self.count(|o| matches!(o, OperationOutcome::Aborted))
    }

    /// True when nothing went wrong: no issues, no failed, skipped or aborted
    /// operations. Drives the process exit code.
    pub fn is_success(&self) -> bool {
        self.issues.is_empty()
            && !self.aborted
            && self.failed_count() == 0
            && self.skipped_count() == 0
            && self.aborted_count() == 0
    }

    fn count(&self, pred: impl Fn(&OperationOutcome) -> bool) -> usize {
        self.operations.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Flags that change how a run behaves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeployOptions {
    /// Compute and report the plan only; never connect, never touch the cache
    pub dry_run: bool,
    /// Treat every local file as modified
    pub force: bool,
}

/// The state of a deployment job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Created, not yet planned
    Pending,
    /// Scanned, diffed and planned
    Planned,
    /// Currently executing
    Running,
    /// All operations processed (some may have failed)
    Completed,
}

/// A single deployment run.
#[derive(Debug)]
pub struct DeployJob {
    /// Unique identifier for this run (shows up in logs)
    pub id: Uuid,

    /// Validated configuration
    pub config: DeployConfig,

    /// Run flags
    pub options: DeployOptions,

    /// Current job state
    pub state: JobState,

    /// Current local files with fingerprints, keyed by relative path
    pub records: BTreeMap<String, FileRecord>,

    /// Classification against the cache
    pub changes: ChangeSet,

    /// Cached paths that now match an exclude rule; dropped from the cache
    /// without a remote delete
    pub forgotten: Vec<String>,

    /// Operations to execute
    pub plan: Plan,

    /// Outcomes and issues
    pub report: RunReport,

    /// When the job was created
    pub created_at: SystemTime,

    /// When execution started
    pub start_time: Option<SystemTime>,

    /// When execution completed
    pub end_time: Option<SystemTime>,

    pub(crate) abort: Arc<AtomicBool>,
}

impl DeployJob {
    /// Handle that stops execution before the next operation when set.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    pub fn is_abort_requested(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    /// Total bytes the plan would upload.
    pub fn total_bytes_to_upload(&self) -> u64 {
        self.plan
            .operations
            .iter()
            .filter_map(|op| match op {
                Operation::Upload { remote_path, .. } => {
                    self.records.get(remote_path).map(|r| r.size)
                }
                _ => None,
            })
            .sum()
    }
}
