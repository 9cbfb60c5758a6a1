//! AnalyticalStorage: one view of runs across both tiers
//!
//! The transactional tier holds active and recently finished runs. Finished
//! runs are also recorded into the organization's tasks system bucket, which
//! the archival query gateway reads back.
//!
//! ## Lookup Order
//!
//! 1. Ask the transactional tier.
//! 2. Only when it returned less than a full page (or reported a missing
//!    run) consult the archival tier.
//! 3. Merge: a run present in both tiers is taken from the archive. The
//!    transactional runs keep their order and the archival runs follow.
//!
//! The archival tier keeps runs for about a week, so queries look back over
//! a two-week window to be sure of overlap.
//!
//! ## Authorization
//!
//! Archival queries run under a synthesized credential that can only read
//! the tasks system bucket. The caller's own credential is never used.

use std::collections::HashSet;
use std::sync::Arc;

use chronicle_core::{Context, Error, PlatformId, Result};
use chronicle_tenant::{Bucket, BucketService, Clock, SystemClock};
use tracing::{debug, warn};

use crate::model::{LogFilter, Run, RunFilter, RunLogEvent, Task};
use crate::query::{Authorization, QueryRequest, QueryService, ReleaseGuard};
use crate::reader::RunReader;
use crate::recorder::{PointsWriter, RunRecorder, StoragePointsWriterRecorder};
use crate::script::{find_run_script, find_runs_script, TimeRange};
use crate::service::{TaskControlService, TaskService};

/// Page size used when a filter leaves the limit at zero
pub const TASK_DEFAULT_PAGE_SIZE: usize = 100;
/// Largest accepted page size
pub const TASK_MAX_PAGE_SIZE: usize = 500;
/// Name of the per-organization bucket holding recorded runs
pub const TASKS_SYSTEM_BUCKET_NAME: &str = "_tasks";
/// How far back archival queries look
pub const DEFAULT_ARCHIVE_WINDOW_DAYS: u32 = 14;

/// Tuning for [`AnalyticalStorage`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyticalOptions {
    /// Page size when the filter limit is zero
    pub default_page_size: usize,
    /// Largest accepted page size
    pub max_page_size: usize,
    /// Days of archive each query covers
    pub archive_window_days: u32,
    /// Name of the tasks system bucket
    pub system_bucket: String,
}

impl Default for AnalyticalOptions {
    fn default() -> Self {
        Self {
            default_page_size: TASK_DEFAULT_PAGE_SIZE,
            max_page_size: TASK_MAX_PAGE_SIZE,
            archive_window_days: DEFAULT_ARCHIVE_WINDOW_DAYS,
            system_bucket: TASKS_SYSTEM_BUCKET_NAME.to_string(),
        }
    }
}

/// Drop transactional runs that also came back from the archive, then
/// append the archived runs.
pub fn combine_runs(current: Vec<Run>, archived: Vec<Run>) -> Vec<Run> {
    let archived_ids: HashSet<PlatformId> = archived.iter().map(|r| r.id).collect();
    let mut combined: Vec<Run> = current
        .into_iter()
        .filter(|r| !archived_ids.contains(&r.id))
        .collect();
    combined.extend(archived);
    combined
}

/// Run lookups spanning the transactional and archival tiers
pub struct AnalyticalStorage {
    tasks: Arc<dyn TaskService>,
    buckets: Arc<dyn BucketService>,
    control: Arc<dyn TaskControlService>,
    recorder: Arc<dyn RunRecorder>,
    queries: Arc<dyn QueryService>,
    clock: Arc<dyn Clock>,
    options: AnalyticalOptions,
}

impl AnalyticalStorage {
    /// Compose the collaborators; finished runs are recorded through `points`
    pub fn new(
        tasks: Arc<dyn TaskService>,
        buckets: Arc<dyn BucketService>,
        control: Arc<dyn TaskControlService>,
        points: Arc<dyn PointsWriter>,
        queries: Arc<dyn QueryService>,
    ) -> Self {
        Self {
            tasks,
            buckets,
            control,
            recorder: Arc::new(StoragePointsWriterRecorder::new(points)),
            queries,
            clock: Arc::new(SystemClock),
            options: AnalyticalOptions::default(),
        }
    }

    /// Replace the run recorder
    pub fn with_recorder(mut self, recorder: Arc<dyn RunRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Replace the clock used for open-ended time ranges
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the options
    pub fn with_options(mut self, options: AnalyticalOptions) -> Self {
        self.options = options;
        self
    }

    /// Current options
    pub fn options(&self) -> &AnalyticalOptions {
        &self.options
    }

    fn normalize_limit(&self, limit: i64) -> Result<usize> {
        let max = self.options.max_page_size;
        if limit == 0 {
            return Ok(self.options.default_page_size);
        }
        match usize::try_from(limit) {
            Ok(n) if n <= max => Ok(n),
            _ => Err(Error::OutOfBoundsLimit { limit, max }),
        }
    }

    fn system_bucket(&self, ctx: &Context, task: &Task) -> Result<Bucket> {
        self.buckets
            .find_bucket_by_name(ctx, task.org_id, &self.options.system_bucket)
    }

    /// Run `script` against the system bucket and decode the runs it returns
    fn query_runs(&self, ctx: &Context, task: &Task, bucket: &Bucket, script: String) -> Result<Vec<Run>> {
        ctx.check()?;
        let request = QueryRequest {
            authorization: Authorization::read_bucket(task.org_id, bucket.id),
            organization_id: task.org_id,
            query: script,
        };

        let mut results = ReleaseGuard::new(self.queries.query(ctx, &request)?);
        let mut reader = RunReader::new(task.id);
        while results.more() {
            let Some(result) = results.next() else {
                break;
            };
            for table in &result.tables {
                ctx.check()?;
                reader.read_table(table);
            }
        }

        if let Some(e) = results.err() {
            return Err(Error::Query {
                message: format!("unexpected internal error while decoding run response: {}", e),
            });
        }
        Ok(reader.into_runs())
    }

    /// List runs of a task across both tiers
    ///
    /// The archive is consulted only when the transactional tier returned
    /// less than `limit` runs, and only for the remainder of the page.
    pub fn find_runs(&self, ctx: &Context, filter: &RunFilter) -> Result<(Vec<Run>, usize)> {
        let limit = self.normalize_limit(filter.limit)?;
        let filter = RunFilter {
            limit: limit as i64,
            ..filter.clone()
        };

        let (runs, n) = self.tasks.find_runs(ctx, &filter)?;
        if runs.len() >= limit {
            return Ok((runs, n));
        }

        let task = self.tasks.find_task_by_id(ctx, filter.task)?;
        let bucket = self.system_bucket(ctx, &task)?;
        let range = TimeRange::parse(
            filter.after_time.as_deref(),
            filter.before_time.as_deref(),
            self.clock.now(),
        )?;

        let remaining = limit - runs.len();
        let script = find_runs_script(
            bucket.id,
            filter.task,
            filter.after,
            range.as_ref(),
            remaining,
            self.options.archive_window_days,
        );
        debug!(
            target: "chronicle::tasks",
            task_id = %filter.task,
            current = runs.len(),
            remaining,
            "Consulting archived runs"
        );

        let archived = self.query_runs(ctx, &task, &bucket, script)?;
        let combined = combine_runs(runs, archived);
        let n = combined.len();
        Ok((combined, n))
    }

    /// Load one run, falling back to the archive when the transactional tier
    /// no longer has it
    pub fn find_run_by_id(&self, ctx: &Context, task_id: PlatformId, run_id: PlatformId) -> Result<Run> {
        match self.tasks.find_run_by_id(ctx, task_id, run_id) {
            Ok(run) => return Ok(run),
            Err(e) if e.is_run_not_found() => {
                debug!(
                    target: "chronicle::tasks",
                    task_id = %task_id,
                    run_id = %run_id,
                    "Run not in transactional tier, checking archive"
                );
            }
            Err(e) => return Err(e),
        }

        let task = self.tasks.find_task_by_id(ctx, task_id)?;
        let bucket = self.system_bucket(ctx, &task)?;
        let script = find_run_script(bucket.id, task_id, run_id, self.options.archive_window_days);

        let mut runs = self.query_runs(ctx, &task, &bucket, script)?;
        match runs.len() {
            0 => Err(Error::RunNotFound),
            1 => runs.pop().ok_or(Error::RunNotFound),
            _ => Err(Error::MultipleArchivedRuns { run_id }),
        }
    }

    /// Retry a run, recovering its scheduled time from the archive if needed
    pub fn retry_run(&self, ctx: &Context, task_id: PlatformId, run_id: PlatformId) -> Result<Run> {
        match self.tasks.retry_run(ctx, task_id, run_id) {
            Ok(run) => return Ok(run),
            Err(e) if e.is_run_not_found() => {}
            Err(e) => return Err(e),
        }

        let run = self.find_run_by_id(ctx, task_id, run_id)?;
        self.tasks
            .force_run(ctx, task_id, run.scheduled_for.timestamp())
    }

    /// Finish a run and record it into the archive.
    ///
    /// A recording failure is returned even though the run itself finished;
    /// the run is still readable from the transactional tier.
    pub fn finish_run(&self, ctx: &Context, task_id: PlatformId, run_id: PlatformId) -> Result<Run> {
        let run = self.control.finish_run(ctx, task_id, run_id)?;
        if !run.id.is_valid() {
            return Ok(run);
        }

        let task = self.tasks.find_task_by_id(ctx, run.task_id)?;
        let bucket = self.system_bucket(ctx, &task)?;
        if let Err(e) = self
            .recorder
            .record(ctx, bucket.id, &self.options.system_bucket, &task, &run)
        {
            warn!(
                target: "chronicle::tasks",
                task_id = %run.task_id,
                run_id = %run.id,
                error = %e,
                "Finished run was not recorded"
            );
            return Err(e);
        }
        Ok(run)
    }

    /// Logs of one run, or of every run of the task
    pub fn find_logs(&self, ctx: &Context, filter: &LogFilter) -> Result<(Vec<RunLogEvent>, usize)> {
        if let Some(run_id) = filter.run {
            let run = self.find_run_by_id(ctx, filter.task, run_id)?;
            let n = run.log.len();
            return Ok((run.log, n));
        }

        let (runs, n) = self.find_runs(ctx, &RunFilter::task(filter.task))?;
        let logs = runs.into_iter().flat_map(|r| r.log).collect();
        Ok((logs, n))
    }
}

impl TaskService for AnalyticalStorage {
    fn find_task_by_id(&self, ctx: &Context, id: PlatformId) -> Result<Task> {
        self.tasks.find_task_by_id(ctx, id)
    }

    fn find_runs(&self, ctx: &Context, filter: &RunFilter) -> Result<(Vec<Run>, usize)> {
        AnalyticalStorage::find_runs(self, ctx, filter)
    }

    fn find_run_by_id(&self, ctx: &Context, task_id: PlatformId, run_id: PlatformId) -> Result<Run> {
        AnalyticalStorage::find_run_by_id(self, ctx, task_id, run_id)
    }

    fn retry_run(&self, ctx: &Context, task_id: PlatformId, run_id: PlatformId) -> Result<Run> {
        AnalyticalStorage::retry_run(self, ctx, task_id, run_id)
    }

    fn force_run(&self, ctx: &Context, task_id: PlatformId, scheduled_for: i64) -> Result<Run> {
        self.tasks.force_run(ctx, task_id, scheduled_for)
    }
}

impl TaskControlService for AnalyticalStorage {
    fn finish_run(&self, ctx: &Context, task_id: PlatformId, run_id: PlatformId) -> Result<Run> {
        AnalyticalStorage::finish_run(self, ctx, task_id, run_id)
    }
}
