//! Archival query scripts
//!
//! Scripts are rendered from a fixed template. Only typed values are
//! interpolated: identities in their canonical hex form and timestamps as
//! RFC-3339. No caller-supplied text ever reaches a script.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use chronicle_core::{Error, PlatformId, Result};

/// Exclusive bounds on a run's scheduled-for time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Lower bound
    pub after: DateTime<Utc>,
    /// Upper bound
    pub before: DateTime<Utc>,
}

impl TimeRange {
    /// Parse optional RFC-3339 bounds.
    ///
    /// Returns `None` when neither bound is given. A missing lower bound is
    /// the start of year 1; a missing upper bound is `now`. Fails unless
    /// `after` is strictly before `before`.
    pub fn parse(
        after: Option<&str>,
        before: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>> {
        let after = after.filter(|s| !s.is_empty());
        let before = before.filter(|s| !s.is_empty());
        if after.is_none() && before.is_none() {
            return Ok(None);
        }

        let after = match after {
            Some(s) => parse_bound("after", s)?,
            None => Utc
                .with_ymd_and_hms(1, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        };
        let before = match before {
            Some(s) => parse_bound("before", s)?,
            None => now,
        };

        if before <= after {
            return Err(Error::InvalidTimeRange);
        }
        Ok(Some(Self { after, before }))
    }
}

fn parse_bound(bound: &'static str, s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::InvalidTimeBound {
            bound,
            message: e.to_string(),
        })
}

fn rfc3339(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Script listing archived runs of `task_id`, newest scheduled first
pub fn find_runs_script(
    bucket_id: PlatformId,
    task_id: PlatformId,
    after: Option<PlatformId>,
    range: Option<&TimeRange>,
    limit: usize,
    window_days: u32,
) -> String {
    let after_filter = after
        .map(|id| format!("|> filter(fn: (r) => r.runID > \"{}\")", id))
        .unwrap_or_default();
    let time_filter = range
        .map(|r| {
            format!(
                "|> filter(fn: (r) => time(v: r[\"scheduledFor\"]) > {} and time(v: r[\"scheduledFor\"]) < {})",
                rfc3339(&r.after),
                rfc3339(&r.before)
            )
        })
        .unwrap_or_default();

    format!(
        r#"from(bucketID: "{bucket_id}")
  |> range(start: -{window_days}d)
  |> filter(fn: (r) => r._field != "status")
  |> filter(fn: (r) => r._measurement == "runs" and r.taskID == "{task_id}")
  {after_filter}
  |> pivot(rowKey:["_time"], columnKey: ["_field"], valueColumn: "_value")
  {time_filter}
  |> group(columns: ["taskID"])
  |> sort(columns:["scheduledFor"], desc: true)
  |> limit(n:{limit})
"#
    )
}

/// Script looking up a single archived run
pub fn find_run_script(
    bucket_id: PlatformId,
    task_id: PlatformId,
    run_id: PlatformId,
    window_days: u32,
) -> String {
    format!(
        r#"from(bucketID: "{bucket_id}")
  |> range(start: -{window_days}d)
  |> filter(fn: (r) => r._field != "status")
  |> filter(fn: (r) => r._measurement == "runs" and r.taskID == "{task_id}")
  |> pivot(rowKey:["_time"], columnKey: ["_field"], valueColumn: "_value")
  |> group(columns: ["taskID"])
  |> filter(fn: (r) => r.runID == "{run_id}")
"#
    )
}
