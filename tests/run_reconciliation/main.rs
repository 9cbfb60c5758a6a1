//! Run reconciliation across the transactional and archival tiers.

#[path = "../common/mod.rs"]
mod common;

use common::*;

use chronicle::tasks::{Action, Authorization};

fn ctx() -> Context {
    Context::background()
}

fn ids(runs: &[Run]) -> Vec<u64> {
    runs.iter().map(|r| r.id.as_u64()).collect()
}

// ============================================================================
// FindRuns: tier short-circuit and paging
// ============================================================================

#[test]
fn full_transactional_page_never_queries_archive() {
    let h = Harness::new();
    for id in 1..=3 {
        h.tasks.add_run(h.run(id, id as i64));
    }

    let (runs, n) = h
        .storage
        .find_runs(&ctx(), &RunFilter::task(h.task.id).limit(3))
        .unwrap();

    assert_eq!(ids(&runs), vec![1, 2, 3]);
    assert_eq!(n, 3);
    assert_eq!(h.queries.query_count(), 0);
}

#[test]
fn partial_page_asks_archive_for_the_remainder() {
    let h = Harness::new();
    h.tasks.add_run(h.run(1, 1));
    h.tasks.add_run(h.run(2, 2));

    h.storage
        .find_runs(&ctx(), &RunFilter::task(h.task.id).limit(5))
        .unwrap();

    let requests = h.queries.requests.lock();
    assert_eq!(requests.len(), 1);
    let script = &requests[0].query;
    assert!(script.contains("limit(n:3)"), "{}", script);
    assert!(script.contains("range(start: -14d)"));
    assert!(script.contains(&format!("from(bucketID: \"{}\")", h.system_bucket.id)));
    assert!(script.contains(&format!("r.taskID == \"{}\"", h.task.id)));
}

#[test]
fn zero_limit_uses_default_page_size() {
    let h = Harness::new();
    h.storage
        .find_runs(&ctx(), &RunFilter::task(h.task.id))
        .unwrap();
    assert!(h.queries.requests.lock()[0].query.contains("limit(n:100)"));
}

#[test]
fn limit_out_of_bounds_is_rejected_before_any_lookup() {
    let h = Harness::new();
    for limit in [-1, 501, i64::MAX] {
        let err = h
            .storage
            .find_runs(&ctx(), &RunFilter::task(h.task.id).limit(limit))
            .unwrap_err();
        assert!(matches!(err, Error::OutOfBoundsLimit { .. }), "{:?}", err);
        assert_eq!(err.code(), ErrorCode::Invalid);
    }
    assert_eq!(h.tasks.find_runs_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(h.queries.query_count(), 0);

    assert!(h
        .storage
        .find_runs(&ctx(), &RunFilter::task(h.task.id).limit(500))
        .is_ok());
}

#[test]
fn after_filter_is_forwarded_to_both_tiers() {
    let h = Harness::new();
    h.tasks.add_run(h.run(1, 1));
    h.tasks.add_run(h.run(5, 5));

    let filter = RunFilter {
        after: Some(PlatformId::new(2)),
        ..RunFilter::task(h.task.id).limit(10)
    };
    let (runs, _) = h.storage.find_runs(&ctx(), &filter).unwrap();

    assert_eq!(ids(&runs), vec![5]);
    assert!(h.queries.requests.lock()[0]
        .query
        .contains("r.runID > \"0000000000000002\""));
}

#[test]
fn transactional_failure_is_terminal() {
    let h = Harness::new();
    h.tasks
        .fail_find_runs
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let err = h
        .storage
        .find_runs(&ctx(), &RunFilter::task(h.task.id))
        .unwrap_err();
    assert!(err.to_string().contains("transactional tier unavailable"));
    assert_eq!(h.queries.query_count(), 0);
}

// ============================================================================
// FindRuns: merging
// ============================================================================

#[test]
fn run_in_both_tiers_appears_once_as_archived_copy() {
    let h = Harness::new();
    h.tasks.add_run(h.run(1, 1));
    let mut live = h.run(2, 2).with_status(RunStatus::Started);
    live.finished_at = None;
    h.tasks.add_run(live);

    let mut archived = h.run(2, 2);
    archived.flux = "archived".to_string();
    h.archive(&[archived.clone(), h.run(9, 0)]);

    let (runs, n) = h
        .storage
        .find_runs(&ctx(), &RunFilter::task(h.task.id).limit(5))
        .unwrap();

    assert_eq!(ids(&runs), vec![1, 2, 9]);
    assert_eq!(n, 3);
    assert_eq!(runs[1], archived);
    assert_eq!(runs[1].status, Some(RunStatus::Success));
}

#[test]
fn archive_only_results_keep_stream_order() {
    let h = Harness::new();
    h.archive(&[h.run(30, 30), h.run(20, 20), h.run(10, 10)]);

    let (runs, n) = h
        .storage
        .find_runs(&ctx(), &RunFilter::task(h.task.id))
        .unwrap();
    assert_eq!(ids(&runs), vec![30, 20, 10]);
    assert_eq!(n, 3);
}

#[test]
fn archived_fields_decode_to_the_recorded_run() {
    let h = Harness::new();
    let mut run = h.run(4, 4);
    run.requested_at = Some(run.scheduled_for - chrono::Duration::milliseconds(250));
    run.trace_id = "4bf92f3577b34da6".to_string();
    run.is_sampled = true;
    run.log.push(RunLogEvent {
        run_id: run.id,
        time: run.scheduled_for + chrono::Duration::milliseconds(1500),
        message: "Completed(success)".to_string(),
    });
    h.archive(&[run.clone()]);

    let (runs, _) = h
        .storage
        .find_runs(&ctx(), &RunFilter::task(h.task.id))
        .unwrap();
    assert_eq!(runs, vec![run]);
}

// ============================================================================
// FindRuns: time range
// ============================================================================

#[test]
fn time_range_is_rendered_into_the_script() {
    let h = Harness::new();
    let filter = RunFilter {
        after_time: Some("2024-05-01T00:00:00Z".to_string()),
        before_time: Some("2024-05-02T00:00:00+00:00".to_string()),
        ..RunFilter::task(h.task.id)
    };
    h.storage.find_runs(&ctx(), &filter).unwrap();

    let script = h.queries.requests.lock()[0].query.clone();
    assert!(script.contains("> 2024-05-01T00:00:00Z"), "{}", script);
    assert!(script.contains("< 2024-05-02T00:00:00Z"), "{}", script);
}

#[test]
fn open_ended_range_is_bounded_by_now() {
    let h = Harness::new();
    let filter = RunFilter {
        after_time: Some("2024-05-01T00:00:00Z".to_string()),
        ..RunFilter::task(h.task.id)
    };
    h.storage.find_runs(&ctx(), &filter).unwrap();
    assert!(h.queries.requests.lock()[0]
        .query
        .contains("< 2024-06-01T12:00:00Z"));
}

#[test]
fn inverted_range_fails_without_querying() {
    let h = Harness::new();
    for (after, before) in [
        ("2024-05-02T00:00:00Z", "2024-05-01T00:00:00Z"),
        ("2024-05-01T00:00:00Z", "2024-05-01T00:00:00Z"),
    ] {
        let filter = RunFilter {
            after_time: Some(after.to_string()),
            before_time: Some(before.to_string()),
            ..RunFilter::task(h.task.id)
        };
        let err = h.storage.find_runs(&ctx(), &filter).unwrap_err();
        assert!(matches!(err, Error::InvalidTimeRange));
    }
    assert_eq!(h.queries.query_count(), 0);
}

#[test]
fn unparsable_bound_fails_without_querying() {
    let h = Harness::new();
    let filter = RunFilter {
        before_time: Some("last tuesday".to_string()),
        ..RunFilter::task(h.task.id)
    };
    let err = h.storage.find_runs(&ctx(), &filter).unwrap_err();
    assert!(matches!(err, Error::InvalidTimeBound { bound: "before", .. }));
    assert!(err.to_string().starts_with("failed parsing before time"));
    assert_eq!(h.queries.query_count(), 0);
}

#[test]
fn bad_range_is_ignored_when_transactional_page_is_full() {
    let h = Harness::new();
    h.tasks.add_run(h.run(1, 1));
    let filter = RunFilter {
        after_time: Some("nonsense".to_string()),
        ..RunFilter::task(h.task.id).limit(1)
    };
    let (runs, _) = h.storage.find_runs(&ctx(), &filter).unwrap();
    assert_eq!(ids(&runs), vec![1]);
}

// ============================================================================
// Authorization and collaborators
// ============================================================================

#[test]
fn archive_is_read_with_a_system_bucket_credential() {
    let h = Harness::new();
    h.storage
        .find_runs(&ctx(), &RunFilter::task(h.task.id))
        .unwrap();

    let request = h.queries.requests.lock()[0].clone();
    assert_eq!(request.organization_id, h.task.org_id);
    assert_eq!(
        request.authorization,
        Authorization::read_bucket(h.task.org_id, h.system_bucket.id)
    );
    assert!(request
        .authorization
        .allows(Action::Read, h.system_bucket.id));
    assert!(!request
        .authorization
        .allows(Action::Write, h.system_bucket.id));
}

#[test]
fn missing_system_bucket_is_not_found() {
    let h = Harness::new();
    let stranger = Task {
        id: PlatformId::new(0x88),
        org_id: PlatformId::new(0xbeef),
        name: "orphan".to_string(),
        flux: String::new(),
    };
    h.tasks.add_task(stranger.clone());

    let err = h
        .storage
        .find_runs(&ctx(), &RunFilter::task(stranger.id))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
    assert_eq!(h.queries.query_count(), 0);
}

#[test]
fn unknown_task_is_reported() {
    let h = Harness::new();
    let err = h
        .storage
        .find_runs(&ctx(), &RunFilter::task(PlatformId::new(0x999)))
        .unwrap_err();
    assert!(matches!(err, Error::TaskNotFound));
}

// ============================================================================
// Result release and errors
// ============================================================================

#[test]
fn results_are_released_after_success() {
    let h = Harness::new();
    h.archive(&[h.run(1, 1)]);
    h.storage
        .find_runs(&ctx(), &RunFilter::task(h.task.id))
        .unwrap();
    assert_eq!(h.queries.released_count(), 1);
}

#[test]
fn stream_error_is_wrapped_and_results_released() {
    let h = Harness::new();
    h.archive(&[h.run(1, 1)]);
    h.queries.fail_stream("connection reset");

    let err = h
        .storage
        .find_runs(&ctx(), &RunFilter::task(h.task.id))
        .unwrap_err();
    assert!(matches!(err, Error::Query { .. }));
    let msg = err.to_string();
    assert!(msg.contains("unexpected internal error while decoding run response"), "{}", msg);
    assert!(msg.contains("connection reset"), "{}", msg);
    assert_eq!(err.code(), ErrorCode::Internal);
    assert_eq!(h.queries.released_count(), 1);
}

#[test]
fn gateway_failure_propagates() {
    let h = Harness::new();
    h.queries
        .fail_query
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let err = h
        .storage
        .find_runs(&ctx(), &RunFilter::task(h.task.id))
        .unwrap_err();
    assert!(err.to_string().contains("gateway unavailable"));
    assert_eq!(h.queries.released_count(), 0);
}

#[test]
fn cancelled_context_stops_before_the_archive() {
    let h = Harness::new();
    let ctx = Context::background();
    ctx.cancel();

    let err = h
        .storage
        .find_runs(&ctx, &RunFilter::task(h.task.id))
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(h.queries.query_count(), 0);
}

#[test]
fn expired_deadline_stops_before_the_archive() {
    let h = Harness::new();
    let ctx = Context::background().with_timeout(std::time::Duration::ZERO);
    std::thread::sleep(std::time::Duration::from_millis(2));

    let err = h
        .storage
        .find_run_by_id(&ctx, h.task.id, PlatformId::new(1))
        .unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded));
    assert_eq!(h.queries.query_count(), 0);
}

// ============================================================================
// FindRunByID
// ============================================================================

#[test]
fn transactional_hit_skips_archive() {
    let h = Harness::new();
    h.tasks.add_run(h.run(7, 7));
    let run = h
        .storage
        .find_run_by_id(&ctx(), h.task.id, PlatformId::new(7))
        .unwrap();
    assert_eq!(run.id, PlatformId::new(7));
    assert_eq!(h.queries.query_count(), 0);
}

#[test]
fn transactional_miss_falls_back_to_archive() {
    let h = Harness::new();
    let archived = h.run(7, 7);
    h.archive(&[archived.clone()]);

    let run = h
        .storage
        .find_run_by_id(&ctx(), h.task.id, PlatformId::new(7))
        .unwrap();
    assert_eq!(run, archived);
    assert!(h.queries.requests.lock()[0]
        .query
        .contains("r.runID == \"0000000000000007\""));
}

#[test]
fn archive_miss_is_run_not_found() {
    let h = Harness::new();
    let err = h
        .storage
        .find_run_by_id(&ctx(), h.task.id, PlatformId::new(7))
        .unwrap_err();
    assert!(err.is_run_not_found());
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[test]
fn duplicate_archived_rows_are_a_consistency_error() {
    let h = Harness::new();
    h.archive(&[h.run(7, 7), h.run(7, 8)]);
    let err = h
        .storage
        .find_run_by_id(&ctx(), h.task.id, PlatformId::new(7))
        .unwrap_err();
    assert!(matches!(err, Error::MultipleArchivedRuns { .. }));
    assert_eq!(err.code(), ErrorCode::Internal);
}

// ============================================================================
// RetryRun
// ============================================================================

#[test]
fn retry_in_transactional_tier_uses_its_retry() {
    let h = Harness::new();
    h.tasks.add_run(h.run(3, 3));
    let retried = h
        .storage
        .retry_run(&ctx(), h.task.id, PlatformId::new(3))
        .unwrap();

    assert_eq!(retried.scheduled_for, h.run(3, 3).scheduled_for);
    assert_eq!(
        *h.tasks.retried.lock(),
        vec![(h.task.id, PlatformId::new(3))]
    );
    assert!(h.tasks.forced.lock().is_empty());
    assert_eq!(h.queries.query_count(), 0);
}

#[test]
fn retry_of_archived_run_reschedules_its_original_time() {
    let h = Harness::new();
    let scheduled = epoch() - chrono::Duration::days(10);
    let mut old = Run::new(PlatformId::new(0x42), h.task.id, scheduled)
        .with_status(RunStatus::Failed);
    old.started_at = Some(scheduled + chrono::Duration::seconds(1));
    old.finished_at = Some(scheduled + chrono::Duration::seconds(9));
    h.archive(&[old]);

    let retried = h
        .storage
        .retry_run(&ctx(), h.task.id, PlatformId::new(0x42))
        .unwrap();

    assert_eq!(
        *h.tasks.forced.lock(),
        vec![(h.task.id, scheduled.timestamp())]
    );
    assert_eq!(retried.scheduled_for, scheduled);
    assert_ne!(retried.id, PlatformId::new(0x42));
    assert_eq!(retried.status, Some(RunStatus::Scheduled));
}

#[test]
fn retry_of_unknown_run_is_not_found() {
    let h = Harness::new();
    let err = h
        .storage
        .retry_run(&ctx(), h.task.id, PlatformId::new(0x42))
        .unwrap_err();
    assert!(err.is_run_not_found());
    assert!(h.tasks.forced.lock().is_empty());
}

// ============================================================================
// FinishRun
// ============================================================================

#[test]
fn finished_run_is_recorded_into_system_bucket() {
    let h = Harness::new();
    let mut run = h.run(5, 5);
    run.status = Some(RunStatus::Started);
    run.finished_at = None;
    h.control.add_pending(run);

    let finished = h
        .storage
        .finish_run(&ctx(), h.task.id, PlatformId::new(5))
        .unwrap();
    assert_eq!(finished.status, Some(RunStatus::Success));

    let writes = h.points.writes.lock();
    assert_eq!(writes.len(), 1);
    let (org, bucket, points) = &writes[0];
    assert_eq!(*org, h.task.org_id);
    assert_eq!(*bucket, h.system_bucket.id);
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].measurement, "runs");
    assert_eq!(points[0].tags["status"], "success");
    assert_eq!(points[0].fields["runID"], "0000000000000005");
    assert_eq!(points[0].fields["name"], "downsample");
}

#[test]
fn recording_failure_surfaces_after_the_transition() {
    let h = Harness::new();
    h.control.add_pending(h.run(5, 5));
    h.points
        .fail
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let err = h
        .storage
        .finish_run(&ctx(), h.task.id, PlatformId::new(5))
        .unwrap_err();
    assert!(err.to_string().contains("points writer unavailable"));
    assert_eq!(*h.control.finished.lock(), vec![PlatformId::new(5)]);
}

#[test]
fn finish_without_a_valid_run_records_nothing() {
    let h = Harness::new();
    h.control
        .add_pending(Run::new(PlatformId::invalid(), h.task.id, epoch()));

    let run = h
        .storage
        .finish_run(&ctx(), h.task.id, PlatformId::invalid())
        .unwrap();
    assert!(!run.id.is_valid());
    assert!(h.points.writes.lock().is_empty());
}

#[test]
fn recorded_run_reads_back_from_archive() {
    let h = Harness::new();
    let mut run = h.run(0x51, 3);
    run.finished_at = None;
    run.log.push(RunLogEvent {
        run_id: run.id,
        time: run.scheduled_for,
        message: "Started task from script".to_string(),
    });
    h.control.add_pending(run);
    let finished = h
        .storage
        .finish_run(&ctx(), h.task.id, PlatformId::new(0x51))
        .unwrap();

    let points = h.points.writes.lock()[0].2.clone();
    h.queries.respond_with(vec![pivot(&points)]);

    let read = h
        .storage
        .find_run_by_id(&ctx(), h.task.id, PlatformId::new(0x51))
        .unwrap();
    assert_eq!(read, finished);
}

// ============================================================================
// FindLogs
// ============================================================================

fn with_log(mut run: Run, message: &str) -> Run {
    run.log.push(RunLogEvent {
        run_id: run.id,
        time: run.scheduled_for,
        message: message.to_string(),
    });
    run
}

#[test]
fn logs_of_one_run_cross_tiers() {
    let h = Harness::new();
    h.archive(&[with_log(h.run(2, 2), "archived line")]);

    let (logs, n) = h
        .storage
        .find_logs(
            &ctx(),
            &LogFilter {
                task: h.task.id,
                run: Some(PlatformId::new(2)),
            },
        )
        .unwrap();
    assert_eq!(n, 1);
    assert_eq!(logs[0].message, "archived line");
}

#[test]
fn logs_of_a_task_concatenate_every_run() {
    let h = Harness::new();
    h.tasks.add_run(with_log(h.run(1, 1), "live line"));
    h.archive(&[with_log(h.run(2, 2), "archived line")]);

    let (logs, _) = h
        .storage
        .find_logs(
            &ctx(),
            &LogFilter {
                task: h.task.id,
                run: None,
            },
        )
        .unwrap();
    let messages: Vec<&str> = logs.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(messages, vec!["live line", "archived line"]);
}

// ============================================================================
// Trait objects
// ============================================================================

#[test]
fn usable_as_task_service() {
    let h = Harness::new();
    h.archive(&[h.run(2, 2)]);
    let service: &dyn TaskService = &h.storage;

    let (runs, _) = service
        .find_runs(&ctx(), &RunFilter::task(h.task.id))
        .unwrap();
    assert_eq!(ids(&runs), vec![2]);
    assert_eq!(service.find_task_by_id(&ctx(), h.task.id).unwrap(), h.task);
}
