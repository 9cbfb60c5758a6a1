//! Shared test utilities for the integration suites.
//!
//! Import via `mod common;` from a suite's main.rs.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

pub use chronicle::prelude::*;
pub use chronicle::tasks::{
    ColReader, Point, PointsWriter, QueryRequest, QueryResult, ResultIterator, RunLogEvent,
    StoragePointsWriterRecorder, Table,
};
pub use chronicle::tenant::{ManualClock, SequentialIdGenerator};

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Route log output through the test harness
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

/// Fixed "now" for every clock in the suites
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// Chronicle with sequential bucket IDs starting at `first`
pub fn chronicle_from(first: u64) -> Chronicle {
    init_tracing();
    Chronicle::open_with(
        ChronicleConfig::default(),
        Arc::new(SequentialIdGenerator::starting_at(first)),
        Arc::new(ManualClock::new(epoch())),
    )
    .unwrap()
}

// ============================================================================
// Transactional tier
// ============================================================================

/// In-memory transactional tier
#[derive(Default)]
pub struct FakeTaskService {
    tasks: Mutex<HashMap<PlatformId, Task>>,
    runs: Mutex<Vec<Run>>,
    pub retried: Mutex<Vec<(PlatformId, PlatformId)>>,
    pub forced: Mutex<Vec<(PlatformId, i64)>>,
    pub find_runs_calls: AtomicUsize,
    pub fail_find_runs: AtomicBool,
    next_id: AtomicU64,
}

impl FakeTaskService {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0x1000),
            ..Self::default()
        }
    }

    pub fn add_task(&self, task: Task) {
        self.tasks.lock().insert(task.id, task);
    }

    pub fn add_run(&self, run: Run) {
        self.runs.lock().push(run);
    }

    pub fn run_ids(&self) -> Vec<PlatformId> {
        self.runs.lock().iter().map(|r| r.id).collect()
    }

    fn new_run(&self, task_id: PlatformId, scheduled_for: DateTime<Utc>) -> Run {
        let id = PlatformId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let run = Run::new(id, task_id, scheduled_for).with_status(RunStatus::Scheduled);
        self.runs.lock().push(run.clone());
        run
    }
}

impl TaskService for FakeTaskService {
    fn find_task_by_id(&self, _ctx: &Context, id: PlatformId) -> Result<Task> {
        self.tasks.lock().get(&id).cloned().ok_or(Error::TaskNotFound)
    }

    fn find_runs(&self, _ctx: &Context, filter: &RunFilter) -> Result<(Vec<Run>, usize)> {
        self.find_runs_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_find_runs.load(Ordering::SeqCst) {
            return Err(Error::internal("transactional tier unavailable"));
        }
        let limit = usize::try_from(filter.limit).unwrap_or(0);
        let runs: Vec<Run> = self
            .runs
            .lock()
            .iter()
            .filter(|r| r.task_id == filter.task)
            .filter(|r| filter.after.map_or(true, |after| r.id > after))
            .take(if limit == 0 { usize::MAX } else { limit })
            .cloned()
            .collect();
        let n = runs.len();
        Ok((runs, n))
    }

    fn find_run_by_id(&self, _ctx: &Context, task_id: PlatformId, run_id: PlatformId) -> Result<Run> {
        self.runs
            .lock()
            .iter()
            .find(|r| r.task_id == task_id && r.id == run_id)
            .cloned()
            .ok_or(Error::RunNotFound)
    }

    fn retry_run(&self, ctx: &Context, task_id: PlatformId, run_id: PlatformId) -> Result<Run> {
        let existing = self.find_run_by_id(ctx, task_id, run_id)?;
        self.retried.lock().push((task_id, run_id));
        Ok(self.new_run(task_id, existing.scheduled_for))
    }

    fn force_run(&self, _ctx: &Context, task_id: PlatformId, scheduled_for: i64) -> Result<Run> {
        if !self.tasks.lock().contains_key(&task_id) {
            return Err(Error::TaskNotFound);
        }
        self.forced.lock().push((task_id, scheduled_for));
        let at = Utc
            .timestamp_opt(scheduled_for, 0)
            .single()
            .ok_or_else(|| Error::internal("scheduled time out of range"))?;
        Ok(self.new_run(task_id, at))
    }
}

/// Control plane that finishes runs handed to it up front
#[derive(Default)]
pub struct FakeControl {
    pending: Mutex<HashMap<PlatformId, Run>>,
    pub finished: Mutex<Vec<PlatformId>>,
}

impl FakeControl {
    pub fn add_pending(&self, run: Run) {
        self.pending.lock().insert(run.id, run);
    }
}

impl TaskControlService for FakeControl {
    fn finish_run(&self, _ctx: &Context, _task_id: PlatformId, run_id: PlatformId) -> Result<Run> {
        let mut run = self.pending.lock().remove(&run_id).ok_or(Error::RunNotFound)?;
        self.finished.lock().push(run_id);
        if run.id.is_valid() {
            run.status = Some(RunStatus::Success);
            run.finished_at = Some(run.scheduled_for + chrono::Duration::seconds(5));
        }
        Ok(run)
    }
}

// ============================================================================
// Archival tier
// ============================================================================

/// Points writer that keeps every write and can be told to fail
#[derive(Default)]
pub struct CapturePointsWriter {
    pub writes: Mutex<Vec<(PlatformId, PlatformId, Vec<Point>)>>,
    pub fail: AtomicBool,
}

impl PointsWriter for CapturePointsWriter {
    fn write_points(
        &self,
        _ctx: &Context,
        org_id: PlatformId,
        bucket_id: PlatformId,
        points: Vec<Point>,
    ) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::internal("points writer unavailable"));
        }
        self.writes.lock().push((org_id, bucket_id, points));
        Ok(())
    }
}

/// Query gateway answering every query with the same tables
#[derive(Default)]
pub struct FakeQueryService {
    pub requests: Mutex<Vec<QueryRequest>>,
    tables: Mutex<Vec<Table>>,
    stream_error: Mutex<Option<String>>,
    pub fail_query: AtomicBool,
    pub released: Arc<AtomicUsize>,
}

impl FakeQueryService {
    pub fn respond_with(&self, tables: Vec<Table>) {
        *self.tables.lock() = tables;
    }

    pub fn fail_stream(&self, message: &str) {
        *self.stream_error.lock() = Some(message.to_string());
    }

    pub fn query_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn released_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl QueryService for FakeQueryService {
    fn query(&self, _ctx: &Context, request: &QueryRequest) -> Result<Box<dyn ResultIterator>> {
        self.requests.lock().push(request.clone());
        if self.fail_query.load(Ordering::SeqCst) {
            return Err(Error::internal("gateway unavailable"));
        }
        let results = self
            .tables
            .lock()
            .iter()
            .map(|t| QueryResult {
                name: "_result".to_string(),
                tables: vec![t.clone()],
            })
            .collect();
        Ok(Box::new(FakeResults {
            results,
            error: self.stream_error.lock().clone(),
            released: Arc::clone(&self.released),
        }))
    }
}

struct FakeResults {
    results: VecDeque<QueryResult>,
    error: Option<String>,
    released: Arc<AtomicUsize>,
}

impl ResultIterator for FakeResults {
    fn more(&mut self) -> bool {
        !self.results.is_empty()
    }

    fn next(&mut self) -> Option<QueryResult> {
        self.results.pop_front()
    }

    fn release(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    fn err(&mut self) -> Option<Error> {
        self.error.take().map(Error::internal)
    }
}

/// Pivot recorded points into the table the archive would return:
/// one row per point, one string column per tag or field.
pub fn pivot(points: &[Point]) -> Table {
    let labels: BTreeSet<&str> = points
        .iter()
        .flat_map(|p| p.tags.keys().chain(p.fields.keys()))
        .map(String::as_str)
        .collect();
    let mut builder = ColReader::builder();
    for label in labels {
        let values: Vec<String> = points
            .iter()
            .map(|p| {
                p.fields
                    .get(label)
                    .or_else(|| p.tags.get(label))
                    .cloned()
                    .unwrap_or_default()
            })
            .collect();
        builder = builder.strings(label, values);
    }
    Table::new(vec![builder.build().unwrap()])
}

// ============================================================================
// Harness
// ============================================================================

/// Reconciliation layer over fakes, with a `_tasks` bucket for one org
pub struct Harness {
    pub db: Chronicle,
    pub tasks: Arc<FakeTaskService>,
    pub control: Arc<FakeControl>,
    pub points: Arc<CapturePointsWriter>,
    pub queries: Arc<FakeQueryService>,
    pub storage: AnalyticalStorage,
    pub task: Task,
    pub system_bucket: Bucket,
}

impl Harness {
    pub fn new() -> Self {
        let db = chronicle_from(0x500);
        let ctx = Context::background();
        let org = PlatformId::new(0x0a);
        let system_bucket = db
            .bucket_service()
            .create_bucket(&ctx, Bucket::system(org, "_tasks"))
            .unwrap();

        let task = Task {
            id: PlatformId::new(0x77),
            org_id: org,
            name: "downsample".to_string(),
            flux: "option task = {name: \"downsample\", every: 1h}".to_string(),
        };
        let tasks = Arc::new(FakeTaskService::new());
        tasks.add_task(task.clone());

        let control = Arc::new(FakeControl::default());
        let points = Arc::new(CapturePointsWriter::default());
        let queries = Arc::new(FakeQueryService::default());
        let storage = db.analytical_storage(
            tasks.clone(),
            control.clone(),
            points.clone(),
            queries.clone(),
        );

        Self {
            db,
            tasks,
            control,
            points,
            queries,
            storage,
            task,
            system_bucket,
        }
    }

    /// A finished run of the harness task
    pub fn run(&self, id: u64, scheduled_minute: i64) -> Run {
        let scheduled = epoch() - chrono::Duration::hours(1)
            + chrono::Duration::minutes(scheduled_minute);
        let mut run = Run::new(PlatformId::new(id), self.task.id, scheduled)
            .with_status(RunStatus::Success);
        run.started_at = Some(scheduled + chrono::Duration::seconds(1));
        run.finished_at = Some(scheduled + chrono::Duration::seconds(2));
        run
    }

    /// Make the archive answer with `runs`, encoded the way they are recorded
    pub fn archive(&self, runs: &[Run]) {
        let recorder = StoragePointsWriterRecorder::new(self.points.clone());
        let points: Vec<Point> = runs
            .iter()
            .map(|r| recorder.point(&self.task, r).unwrap())
            .collect();
        self.queries.respond_with(vec![pivot(&points)]);
    }
}
