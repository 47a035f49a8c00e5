//! Job orchestration module.
//!
//! This module provides the deployment lifecycle:
//! - `create_job`: validate the config and origin folder
//! - `plan_job`: scan, fingerprint, diff against the cache, build the plan
//! - `preview_job`: report the plan without connecting (dry run)
//! - `run_job`: execute the plan through a `RemoteSession`, checkpointing
//!   the cache after every successful operation
//! - `deploy`: all of the above in one call

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::cache::CacheRepository;
use crate::checksums::fill_fingerprints;
use crate::config::DeployConfig;
use crate::diff::{apply_renames, diff};
use crate::error::EngineError;
use crate::fs_ops;
use crate::model::{
    ChangeSet, DeployJob, DeployOptions, Issue, IssueKind, JobState, Operation, OperationOutcome,
    OperationRecord, Plan, RunReport,
};
use crate::plan::build_plan;
use crate::progress::DeployObserver;
use crate::transport::{RemoteSession, Transport, TransportError};

/// Create a new deployment job.
///
/// # Arguments
/// * `config` - Validated configuration
/// * `options` - Dry-run and force flags
///
/// # Returns
/// A new DeployJob in Pending state
///
/// # Errors
/// Returns EngineError if the origin folder is missing or not a directory,
/// or if an exclude pattern does not compile.
pub fn create_job(config: DeployConfig, options: DeployOptions) -> Result<DeployJob, EngineError> {
    fs_ops::check_origin(&config.origin_folder)?;
    config.exclude_rules()?;

    Ok(DeployJob {
        id: Uuid::new_v4(),
        config,
        options,
        state: JobState::Pending,
        records: BTreeMap::new(),
        changes: ChangeSet::default(),
        forgotten: Vec::new(),
        plan: Plan::default(),
        report: RunReport::default(),
        created_at: SystemTime::now(),
        start_time: None,
        end_time: None,
        abort: Arc::new(AtomicBool::new(false)),
    })
}

/// Plan a job: scan the origin folder, fingerprint, diff against the cache
/// and build the ordered plan.
///
/// Cached paths that now match an exclude rule are listed in
/// `job.forgotten` and left out of the diff, so they are never deleted
/// remotely. Scan and hash problems are recorded in `job.report.issues`.
///
/// # Arguments
/// * `job` - Job to plan (must be in Pending state)
/// * `cache` - Loaded cache; not modified
///
/// # Errors
/// Returns EngineError if the job is not Pending or the origin folder
/// cannot be scanned.
pub fn plan_job(job: &mut DeployJob, cache: &CacheRepository) -> Result<(), EngineError> {
    if job.state != JobState::Pending {
        return Err(EngineError::InvalidState {
            reason: format!("Job must be Pending to plan; current state: {:?}", job.state),
        });
    }

    let _span = info_span!("plan", job = %job.id).entered();

    let rules = job.config.exclude_rules()?;
    let (previous, forgotten) = cache.snapshot().without_excluded(&rules);

    let origin = job.config.origin_folder.clone();
    let mut scan = fs_ops::scan_tree(&origin, &rules)?;
    let own_files = job.config.own_files_in_origin();
    if !own_files.is_empty() {
        debug!(files = ?own_files, "Leaving config and cache files out of the scan");
        scan.records.retain(|record| !own_files.contains(&record.path));
    }
    let fingerprints = fill_fingerprints(
        &origin,
        scan.records,
        &previous,
        job.config.hash,
        job.options.force,
    );
    info!(
        files = fingerprints.records.len(),
        hashed = fingerprints.hashed,
        reused = fingerprints.reused,
        "Scanned origin"
    );

    let records: BTreeMap<_, _> = fingerprints
        .records
        .into_iter()
        .map(|record| (record.path.clone(), record))
        .collect();

    let mut changes = diff(&records, &previous, job.options.force);
    if job.options.force {
        keep_unreadable(&mut changes, &fingerprints.issues);
    }
    apply_renames(&mut changes, &records, &previous);
    let plan = build_plan(&changes, &records, &previous, &origin);

    info!(
        mkdir = plan.count("mkdir"),
        rename = plan.count("rename"),
        upload = plan.count("upload"),
        delete = plan.count("delete"),
        forgotten = forgotten.len(),
        "Plan ready"
    );

    job.report.issues.extend(scan.issues);
    job.report.issues.extend(fingerprints.issues);
    job.report.operations = plan
        .operations
        .iter()
        .cloned()
        .map(|operation| OperationRecord {
            operation,
            outcome: OperationOutcome::Pending,
        })
        .collect();
    job.records = records;
    job.changes = changes;
    job.forgotten = forgotten;
    job.plan = plan;
    job.state = JobState::Planned;

    Ok(())
}

/// Report the plan without executing it.
///
/// Nothing is sent and the cache is not touched; every operation stays
/// `Pending`.
///
/// # Errors
/// Returns EngineError if the job is not Planned.
pub fn preview_job(
    job: &mut DeployJob,
    observer: Option<&dyn DeployObserver>,
) -> Result<(), EngineError> {
    require_planned(job)?;

    if let Some(observer) = observer {
        observer.on_plan_ready(job);
    }

    job.state = JobState::Completed;
    job.end_time = Some(SystemTime::now());

    if let Some(observer) = observer {
        observer.on_job_completed(job);
    }
    Ok(())
}

/// Run a job, executing the plan in order.
///
/// Per operation:
/// - the abort flag is checked first; once set, every remaining operation
///   is `Aborted`
/// - an operation under a directory whose `MakeDir` failed or was skipped
///   is `Skipped` without being attempted
/// - on success the cache is updated and saved before the next operation
/// - on failure the cache entry is left as it was
///
/// Operation errors never stop the run. The cache is saved once more at the
/// end; a failed save is recorded as an `IssueKind::Cache` issue.
///
/// # Arguments
/// * `job` - Job to execute (must be in Planned state, not a dry run)
/// * `session` - Open remote session
/// * `cache` - Cache the plan was built from
/// * `observer` - Optional progress observer
///
/// # Errors
/// Returns EngineError only for lifecycle misuse.
pub fn run_job(
    job: &mut DeployJob,
    session: &mut dyn RemoteSession,
    cache: &mut CacheRepository,
    observer: Option<&dyn DeployObserver>,
) -> Result<(), EngineError> {
    start_run(job, cache, observer)?;
    let _span = info_span!("run", job = %job.id).entered();

    let mut failed_dirs: Vec<String> = Vec::new();

    for index in 0..job.report.operations.len() {
        if job.is_abort_requested() {
            abort_remaining(job, index, observer);
            break;
        }

        let operation = job.report.operations[index].operation.clone();

        let outcome = if let Some(dir) = blocked_by(&failed_dirs, operation.target()) {
            OperationOutcome::Skipped {
                reason: format!("directory {} could not be created", dir),
            }
        } else {
            if let Some(observer) = observer {
                observer.on_operation_started(job, index, &operation);
            }
            match send(session, &operation) {
                Ok(bytes) => {
                    record_success(job, cache, &operation, bytes);
                    OperationOutcome::Done
                }
                Err(e) => {
                    warn!(operation = %operation, error = %e, "Operation failed");
                    OperationOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            }
        };

        if let Operation::MakeDir { path } = &operation {
            if outcome != OperationOutcome::Done {
                failed_dirs.push(path.clone());
            }
        }

        job.report.operations[index].outcome = outcome;
        if let Some(observer) = observer {
            observer.on_operation_completed(job, index, &job.report.operations[index]);
        }
    }

    finish_run(job, cache, observer);
    Ok(())
}

/// Plan and execute a deployment end to end.
///
/// Loads the cache next to the config file, plans, and then either
/// previews (dry run), finishes without connecting (nothing to send), or
/// connects through `transport` and runs the plan.
///
/// # Errors
/// Returns EngineError for fatal problems: invalid origin, failed scan,
/// failed connect. The cache is untouched in those cases.
pub fn deploy(
    config: DeployConfig,
    options: DeployOptions,
    transport: &dyn Transport,
    observer: Option<&dyn DeployObserver>,
) -> Result<DeployJob, EngineError> {
    let mut job = create_job(config, options)?;
    let mut cache = CacheRepository::load(job.config.cache_path());
    plan_job(&mut job, &cache)?;

    if job.options.dry_run {
        preview_job(&mut job, observer)?;
        return Ok(job);
    }

    if job.plan.is_empty() {
        start_run(&mut job, &mut cache, observer)?;
        finish_run(&mut job, &mut cache, observer);
        return Ok(job);
    }

    let mut session = transport
        .connect(&job.config)
        .map_err(|source| EngineError::Connect {
            host: job.config.host.clone(),
            source,
        })?;

    run_job(&mut job, session.as_mut(), &mut cache, observer)?;

    if let Err(e) = session.close() {
        warn!(error = %e, "Closing the session failed");
    }
    Ok(job)
}

fn require_planned(job: &DeployJob) -> Result<(), EngineError> {
    if job.state != JobState::Planned {
        return Err(EngineError::InvalidState {
            reason: format!("Job must be Planned; current state: {:?}", job.state),
        });
    }
    Ok(())
}

fn start_run(
    job: &mut DeployJob,
    cache: &mut CacheRepository,
    observer: Option<&dyn DeployObserver>,
) -> Result<(), EngineError> {
    require_planned(job)?;
    if job.options.dry_run {
        return Err(EngineError::InvalidState {
            reason: "Dry-run jobs are previewed, not run".to_string(),
        });
    }

    let rules = job.config.exclude_rules()?;
    cache.forget_excluded(&rules);

    job.state = JobState::Running;
    job.start_time = Some(SystemTime::now());
    info!(job = %job.id, operations = job.plan.len(), "Deploy started");

    if let Some(observer) = observer {
        observer.on_plan_ready(job);
    }
    Ok(())
}

fn finish_run(
    job: &mut DeployJob,
    cache: &mut CacheRepository,
    observer: Option<&dyn DeployObserver>,
) {
    if cache.is_dirty() {
        checkpoint(job, cache);
    }

    job.state = JobState::Completed;
    job.end_time = Some(SystemTime::now());
    info!(
        job = %job.id,
        done = job.report.done_count(),
        failed = job.report.failed_count(),
        skipped = job.report.skipped_count(),
        aborted = job.report.aborted_count(),
        bytes = job.report.bytes_uploaded,
        "Deploy finished"
    );

    if let Some(observer) = observer {
        observer.on_job_completed(job);
    }
}

/// Under force every file is `modified`; a cached file that could not be
/// hashed keeps its cached state instead.
fn keep_unreadable(changes: &mut ChangeSet, issues: &[Issue]) {
    let unreadable: Vec<&str> = issues
        .iter()
        .filter(|issue| issue.kind == IssueKind::Hash)
        .map(|issue| issue.path.as_str())
        .collect();
    if unreadable.is_empty() {
        return;
    }

    let (held, modified): (Vec<String>, Vec<String>) = std::mem::take(&mut changes.modified)
        .into_iter()
        .partition(|path| unreadable.contains(&path.as_str()));
    changes.modified = modified;
    changes.unchanged.extend(held);
    changes.unchanged.sort();
}

fn abort_remaining(job: &mut DeployJob, from: usize, observer: Option<&dyn DeployObserver>) {
    warn!(remaining = job.report.operations.len() - from, "Abort requested");
    job.report.aborted = true;
    for index in from..job.report.operations.len() {
        job.report.operations[index].outcome = OperationOutcome::Aborted;
        if let Some(observer) = observer {
            observer.on_operation_completed(job, index, &job.report.operations[index]);
        }
    }
}

/// The failed directory `target` lives under, if any.
fn blocked_by<'a>(failed_dirs: &'a [String], target: &str) -> Option<&'a str> {
    failed_dirs
        .iter()
        .map(String::as_str)
        .find(|dir| target.strip_prefix(*dir).is_some_and(|rest| rest.starts_with('/')))
}

fn send(session: &mut dyn RemoteSession, operation: &Operation) -> Result<u64, TransportError> {
    match operation {
        Operation::MakeDir { path } => session.mkdir(path).map(|_| 0),
        Operation::Upload {
            local_path,
            remote_path,
        } => session.upload(local_path, remote_path),
        Operation::Delete { remote_path } => session.delete(remote_path).map(|_| 0),
        Operation::Rename { from, to } => session.rename(from, to).map(|_| 0),
    }
}

/// Reflect a successful operation in the cache and checkpoint it.
fn record_success(
    job: &mut DeployJob,
    cache: &mut CacheRepository,
    operation: &Operation,
    bytes: u64,
) {
    let now = Utc::now();
    let mut confirm = |path: &str, cache: &mut CacheRepository| {
        if let Some(record) = job.records.get_mut(path) {
            record.uploaded_at = Some(now);
            cache.update(record.clone());
        }
    };

    match operation {
        Operation::MakeDir { .. } => return,
        Operation::Upload { remote_path, .. } => {
            confirm(remote_path, cache);
            job.report.bytes_uploaded += bytes;
        }
        Operation::Rename { from, to } => {
            cache.remove(from);
            confirm(to, cache);
        }
        Operation::Delete { remote_path } => {
            cache.remove(remote_path);
        }
    }

    checkpoint(job, cache);
}

fn checkpoint(job: &mut DeployJob, cache: &mut CacheRepository) {
    if let Err(e) = cache.save() {
        warn!(error = %e, "Cache checkpoint failed");
        job.report.issues.push(Issue::new(
            IssueKind::Cache,
            cache.path().display().to_string(),
            e.to_string(),
        ));
    }
}
