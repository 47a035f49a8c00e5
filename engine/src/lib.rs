//! # ftp-deploy engine
//!
//! Change detection and reconciliation for one-way FTP deployments.
//! Designed as a headless library; the `ftp-deploy` CLI is one front end.
//!
//! ## Overview
//!
//! Given a local origin folder and a cache of what the server is believed to
//! hold, the engine decides the smallest set of remote operations (mkdir,
//! rename, upload, delete) that brings the server in line, then applies it
//! one operation at a time. It features:
//! - Content fingerprints (MD5, SHA-256, BLAKE3), reused while size and
//!   modification time are unchanged
//! - Rename detection by equal content
//! - A crash-safe cache, checkpointed after every successful operation
//! - Per-operation error isolation and abort support
//! - Progress reporting via an observer trait
//!
//! ## Basic Usage
//!
//! ```no_run
//! use engine::{create_job, plan_job, run_job, CacheRepository, DeployConfig, DeployOptions};
//! use engine::transport::{transport_for, Transport};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DeployConfig::load(".ftprules")?;
//! let mut cache = CacheRepository::load(config.cache_path());
//!
//! let mut job = create_job(config, DeployOptions::default())?;
//! plan_job(&mut job, &cache)?;
//! println!("{} operations planned", job.plan.len());
//!
//! let mut session = transport_for(&job.config).connect(&job.config)?;
//! run_job(&mut job, session.as_mut(), &mut cache, None)?;
//! session.close()?;
//!
//! for record in &job.report.operations {
//!     println!("{}: {:?}", record.operation, record.outcome);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core data structures (DeployJob, FileRecord, Operation, RunReport)
//! - **error**: Error types and handling
//! - **config**: `.ftprules` parsing and `--init` templates
//! - **rules**: Exclude patterns
//! - **fs_ops**: Tree scanning and low-level filesystem operations
//! - **checksums**: Content fingerprints
//! - **cache**: The persisted deployment cache
//! - **diff**: Change classification and rename detection
//! - **plan**: Operation ordering
//! - **job**: Job orchestration (create, plan, preview, run)
//! - **transport**: FTP and local-mirror sessions
//! - **progress**: Observer trait

pub mod cache;
pub mod checksums;
pub mod config;
pub mod diff;
pub mod error;
pub mod fs_ops;
pub mod job;
pub mod model;
pub mod plan;
pub mod progress;
pub mod rules;
pub mod transport;

// Re-export main types and functions
pub use cache::{CacheRepository, CacheSnapshot};
pub use checksums::{compute_file_checksum, ChecksumAlgorithm, ChecksumValue};
pub use config::{init_config, DeployConfig};
pub use error::EngineError;
pub use job::{create_job, deploy, plan_job, preview_job, run_job};
pub use model::{
    ChangeSet, DeployJob, DeployOptions, FileRecord, Issue, IssueKind, JobState, Operation,
    OperationOutcome, OperationRecord, Plan, RunReport,
};
pub use progress::DeployObserver;
pub use rules::ExcludeRuleSet;
