//! Column decoder: archived query tables into runs
//!
//! Each row becomes one [`Run`]. Columns are matched by label; unknown labels
//! are ignored. A field that fails to decode is logged and left unset, and
//! the rest of the row still decodes. Rows that never yield a valid run ID
//! are dropped.

use chrono::{DateTime, Utc};
use chronicle_core::PlatformId;
use tracing::info;

use crate::model::{
    Run, RunLogEvent, RunStatus, FINISHED_AT_FIELD, FLUX_FIELD, LOG_FIELD, REQUESTED_AT_FIELD,
    RUN_ID_FIELD, SCHEDULED_FOR_FIELD, STARTED_AT_FIELD, STATUS_TAG, TASK_ID_TAG,
    TRACE_ID_FIELD, TRACE_SAMPLED_TAG,
};
use crate::query::{ColReader, Table};

/// Accumulates runs decoded from one query execution
#[derive(Debug, Default)]
pub struct RunReader {
    task_id: PlatformId,
    runs: Vec<Run>,
}

impl RunReader {
    /// Reader for runs of `task_id`; the ID only labels log lines
    pub fn new(task_id: PlatformId) -> Self {
        Self {
            task_id,
            runs: Vec::new(),
        }
    }

    /// Decode every chunk of `table`
    pub fn read_table(&mut self, table: &Table) {
        for chunk in table.chunks() {
            self.read_runs(chunk);
        }
    }

    /// Decode every row of `cr`, keeping rows with a valid run ID
    pub fn read_runs(&mut self, cr: &ColReader) {
        for i in 0..cr.len() {
            let mut run = Run::default();
            for (j, col) in cr.cols().iter().enumerate() {
                self.read_field(cr, i, j, &col.label, &mut run);
            }
            if run.id.is_valid() {
                self.runs.push(run);
            }
        }
    }

    /// Runs decoded so far, in stream order
    pub fn runs(&self) -> &[Run] {
        &self.runs
    }

    /// Take the decoded runs
    pub fn into_runs(self) -> Vec<Run> {
        self.runs
    }

    fn read_field(&self, cr: &ColReader, i: usize, j: usize, label: &str, run: &mut Run) {
        match label {
            RUN_ID_FIELD => {
                if let Some(v) = self.string(cr, i, j, label).filter(|v| !v.is_empty()) {
                    match v.parse::<PlatformId>() {
                        Ok(id) => run.id = id,
                        Err(e) => self.skip(label, &e),
                    }
                }
            }
            TASK_ID_TAG => {
                if let Some(v) = self.string(cr, i, j, label).filter(|v| !v.is_empty()) {
                    match v.parse::<PlatformId>() {
                        Ok(id) => run.task_id = id,
                        Err(e) => self.skip(label, &e),
                    }
                }
            }
            SCHEDULED_FOR_FIELD => {
                if let Some(t) = self.time(cr, i, j, label) {
                    run.scheduled_for = t;
                }
            }
            STARTED_AT_FIELD => run.started_at = self.time(cr, i, j, label),
            REQUESTED_AT_FIELD => run.requested_at = self.time(cr, i, j, label),
            FINISHED_AT_FIELD => run.finished_at = self.time(cr, i, j, label),
            STATUS_TAG => {
                if let Some(v) = self.string(cr, i, j, label) {
                    match v.parse::<RunStatus>() {
                        Ok(status) => run.status = Some(status),
                        Err(e) => self.skip(label, &e),
                    }
                }
            }
            FLUX_FIELD => {
                if let Some(v) = self.string(cr, i, j, label) {
                    run.flux = v.to_string();
                }
            }
            TRACE_ID_FIELD => {
                if let Some(v) = self.string(cr, i, j, label) {
                    run.trace_id = v.to_string();
                }
            }
            TRACE_SAMPLED_TAG => {
                // written as a tag (string) but accepted as a boolean column too
                if let Some(v) = cr.bools(j).and_then(|col| col.get(i)) {
                    run.is_sampled = *v;
                } else if let Some(v) = self.string(cr, i, j, label) {
                    match v.parse::<bool>() {
                        Ok(b) => run.is_sampled = b,
                        Err(e) => self.skip(label, &e),
                    }
                }
            }
            LOG_FIELD => {
                if let Some(v) = self.string(cr, i, j, label) {
                    let raw = v.trim();
                    if !raw.is_empty() {
                        match serde_json::from_str::<Vec<RunLogEvent>>(raw) {
                            Ok(log) => run.log = log,
                            Err(e) => info!(
                                target: "chronicle::tasks::run_reader",
                                task_id = %self.task_id,
                                error = %e,
                                log_bytes = raw,
                                "Failed to parse log data"
                            ),
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn string<'a>(&self, cr: &'a ColReader, i: usize, j: usize, label: &str) -> Option<&'a str> {
        match cr.strings(j) {
            Some(col) => col.get(i).map(String::as_str),
            None => {
                self.skip(label, &"column is not a string column");
                None
            }
        }
    }

    fn time(&self, cr: &ColReader, i: usize, j: usize, label: &str) -> Option<DateTime<Utc>> {
        let v = self.string(cr, i, j, label)?;
        match DateTime::parse_from_rfc3339(v) {
            Ok(t) => Some(t.with_timezone(&Utc)),
            Err(e) => {
                self.skip(label, &e);
                None
            }
        }
    }

    fn skip(&self, label: &str, error: &dyn std::fmt::Display) {
        info!(
            target: "chronicle::tasks::run_reader",
            task_id = %self.task_id,
            field = label,
            error = %error,
            "Failed to parse run field"
        );
    }
}
