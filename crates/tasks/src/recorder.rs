//! Recording finished runs into the archival tier
//!
//! A finished run becomes one point in the `runs` measurement of the
//! organization's tasks system bucket:
//!
//! | Kind | Keys |
//! |------|------|
//! | tags | `taskID`, `status`, `ot_trace_sampled` (only when traced) |
//! | fields | `runID`, `name`, `scheduledFor`, `requestedAt`, `startedAt`, `finishedAt`, `logs`, `flux`, `ot_trace_id` |
//!
//! The point's timestamp is the run's start time.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use chronicle_core::{Context, Error, PlatformId, Result};
use chronicle_tenant::{Clock, SystemClock};
use tracing::error;

use crate::model::{
    Run, Task, FINISHED_AT_FIELD, FLUX_FIELD, LOG_FIELD, NAME_FIELD, REQUESTED_AT_FIELD,
    RUNS_MEASUREMENT, RUN_ID_FIELD, SCHEDULED_FOR_FIELD, STARTED_AT_FIELD, STATUS_TAG,
    TASK_ID_TAG, TRACE_ID_FIELD, TRACE_SAMPLED_TAG,
};

/// A single time-series point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Point {
    /// Measurement name
    pub measurement: String,
    /// Indexed string tags
    pub tags: BTreeMap<String, String>,
    /// String fields
    pub fields: BTreeMap<String, String>,
    /// Point timestamp
    pub time: DateTime<Utc>,
}

/// Write path into the time-series engine
pub trait PointsWriter: Send + Sync {
    /// Write `points` into `bucket_id` of `org_id`
    fn write_points(
        &self,
        ctx: &Context,
        org_id: PlatformId,
        bucket_id: PlatformId,
        points: Vec<Point>,
    ) -> Result<()>;
}

/// Records runs into archival storage
pub trait RunRecorder: Send + Sync {
    /// Record `run` of `task` into bucket `bucket_id` (named `bucket`)
    fn record(
        &self,
        ctx: &Context,
        bucket_id: PlatformId,
        bucket: &str,
        task: &Task,
        run: &Run,
    ) -> Result<()>;
}

/// [`RunRecorder`] that writes one point per run through a [`PointsWriter`]
pub struct StoragePointsWriterRecorder {
    writer: Arc<dyn PointsWriter>,
    clock: Arc<dyn Clock>,
}

impl StoragePointsWriterRecorder {
    /// Record through `writer`
    pub fn new(writer: Arc<dyn PointsWriter>) -> Self {
        Self {
            writer,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock used when a run never started
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the point for `run` without writing it
    pub fn point(&self, task: &Task, run: &Run) -> Result<Point> {
        let mut tags = BTreeMap::new();
        tags.insert(
            STATUS_TAG.to_string(),
            run.status.map(|s| s.as_str()).unwrap_or_default().to_string(),
        );
        tags.insert(TASK_ID_TAG.to_string(), run.task_id.to_string());

        if !run.id.is_valid()
            || run.status.is_none()
            || run.started_at.is_none()
            || run.finished_at.is_none()
        {
            error!(
                target: "chronicle::tasks::recorder",
                task_id = %run.task_id,
                run_id = %run.id,
                "Run missing critical fields"
            );
        }

        let nanos = |t: &DateTime<Utc>| t.to_rfc3339_opts(SecondsFormat::AutoSi, true);
        let started_at = run.started_at.unwrap_or_else(|| self.clock.now());

        let mut fields = BTreeMap::new();
        fields.insert(RUN_ID_FIELD.to_string(), run.id.to_string());
        fields.insert(NAME_FIELD.to_string(), task.name.clone());
        fields.insert(
            SCHEDULED_FOR_FIELD.to_string(),
            run.scheduled_for.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        if let Some(requested) = &run.requested_at {
            fields.insert(REQUESTED_AT_FIELD.to_string(), nanos(requested));
        }
        fields.insert(STARTED_AT_FIELD.to_string(), nanos(&started_at));
        if let Some(finished) = &run.finished_at {
            fields.insert(FINISHED_AT_FIELD.to_string(), nanos(finished));
        }
        if !run.log.is_empty() {
            let log = serde_json::to_string(&run.log)
                .map_err(|e| Error::internal(format!("failed to encode run log: {}", e)))?;
            fields.insert(LOG_FIELD.to_string(), log);
        }
        if !run.flux.is_empty() {
            fields.insert(FLUX_FIELD.to_string(), run.flux.clone());
        }
        if !run.trace_id.is_empty() {
            fields.insert(TRACE_ID_FIELD.to_string(), run.trace_id.clone());
            tags.insert(TRACE_SAMPLED_TAG.to_string(), run.is_sampled.to_string());
        }

        Ok(Point {
            measurement: RUNS_MEASUREMENT.to_string(),
            tags,
            fields,
            time: started_at,
        })
    }
}

impl RunRecorder for StoragePointsWriterRecorder {
    fn record(
        &self,
        ctx: &Context,
        bucket_id: PlatformId,
        _bucket: &str,
        task: &Task,
        run: &Run,
    ) -> Result<()> {
        let point = self.point(task, run)?;
        self.writer
            .write_points(ctx, task.org_id, bucket_id, vec![point])
    }
}
