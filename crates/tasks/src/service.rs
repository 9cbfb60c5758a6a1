//! Transactional-tier task services
//!
//! These are the narrow interfaces the reconciliation layer consumes. The
//! transactional implementation lives elsewhere; this crate only composes it.

use chronicle_core::{Context, PlatformId, Result};

use crate::model::{Run, RunFilter, Task};

/// Task and run lookups backed by the transactional tier
///
/// `find_run_by_id` and `retry_run` must report a missing run as
/// [`chronicle_core::Error::RunNotFound`]; the archival fallback keys on it.
pub trait TaskService: Send + Sync {
    /// Load a task
    fn find_task_by_id(&self, ctx: &Context, id: PlatformId) -> Result<Task>;

    /// List runs, returning the page and its count
    fn find_runs(&self, ctx: &Context, filter: &RunFilter) -> Result<(Vec<Run>, usize)>;

    /// Load one run
    fn find_run_by_id(&self, ctx: &Context, task_id: PlatformId, run_id: PlatformId)
        -> Result<Run>;

    /// Schedule a new run with the same scheduled-for time as `run_id`
    fn retry_run(&self, ctx: &Context, task_id: PlatformId, run_id: PlatformId) -> Result<Run>;

    /// Schedule a new run for `scheduled_for` (Unix seconds)
    fn force_run(&self, ctx: &Context, task_id: PlatformId, scheduled_for: i64) -> Result<Run>;
}

/// Run state transitions owned by the scheduler
pub trait TaskControlService: Send + Sync {
    /// Mark a run finished and return its final state
    fn finish_run(&self, ctx: &Context, task_id: PlatformId, run_id: PlatformId) -> Result<Run>;
}
