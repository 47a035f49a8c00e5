//! Progress reporting trait.
//!
//! This module defines the DeployObserver trait, which decouples the deploy
//! engine from the console (or any other front end).

use crate::model::{DeployJob, Operation, OperationRecord};

/// Receives updates from a deployment.
///
/// All methods are called synchronously on the thread running the job.
/// A dry run only ever sees `on_plan_ready` followed by `on_job_completed`.
pub trait DeployObserver {
    /// Called once the plan is known, before anything is sent.
    fn on_plan_ready(&self, job: &DeployJob);

    /// Called when an operation is about to be sent.
    fn on_operation_started(&self, job: &DeployJob, index: usize, operation: &Operation);

    /// Called when an operation is done, failed, skipped or aborted.
    fn on_operation_completed(&self, job: &DeployJob, index: usize, record: &OperationRecord);

    /// Called when the run is over (all operations processed).
    fn on_job_completed(&self, job: &DeployJob);
}
