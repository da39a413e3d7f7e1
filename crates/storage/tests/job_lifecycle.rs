#![forbid(unsafe_code)]

use bt_core::state::JobState;
use bt_storage::{
    JobEventsTailRequest, JobsListRequest, SqliteStore, StopOutcome, StoreError, SubmitRequest,
};
use serde_json::json;
use std::path::PathBuf;

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("bt_storage_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn setup(test_name: &str) -> SqliteStore {
    SqliteStore::open(temp_dir(test_name)).expect("open store")
}

fn submit_ping(store: &mut SqliteStore, sleep_sec: f64) -> String {
    store
        .submit(SubmitRequest {
            job_type: "PING".to_string(),
            params: json!({ "sleep_sec": sleep_sec }),
            tags: vec!["smoke".to_string()],
        })
        .expect("submit job")
}

#[test]
fn submit_inserts_queued() {
    let mut store = setup("submit_inserts_queued");
    let job_id = submit_ping(&mut store, 0.1);

    let job = store
        .get_job(&job_id)
        .expect("get job")
        .expect("job exists");
    assert_eq!(job.state, JobState::Queued);
    assert_eq!(job.job_type, "PING");
    assert!(job.worker_id.is_none());
    assert!(job.worker_pid.is_none());
    assert!(job.last_heartbeat_ms.is_none());
    assert_eq!(job.tags, vec!["smoke".to_string()]);
    assert!(!job.fingerprint.is_empty());
}

#[test]
fn claim_returns_oldest_queued_first() {
    let mut store = setup("claim_oldest_first");
    let first = submit_ping(&mut store, 0.1);
    let second = submit_ping(&mut store, 0.2);

    let claimed = store
        .claim_next_queued()
        .expect("claim")
        .expect("one queued job");
    assert_eq!(claimed.id, first);

    store
        .mark_running(&first, "bt_worker:1", 1)
        .expect("mark running");

    let claimed = store
        .claim_next_queued()
        .expect("claim")
        .expect("second queued job");
    assert_eq!(claimed.id, second);
}

#[test]
fn full_lifecycle_to_succeeded() {
    let mut store = setup("full_lifecycle");
    let job_id = submit_ping(&mut store, 0.1);

    let claimed = store.claim_next_queued().expect("claim").expect("job");
    assert_eq!(claimed.id, job_id);

    store
        .mark_running(&job_id, "bt_worker:77", 77)
        .expect("mark running");
    let job = store.get_job(&job_id).expect("get").expect("exists");
    assert_eq!(job.state, JobState::Running);
    assert_eq!(job.worker_id.as_deref(), Some("bt_worker:77"));
    assert_eq!(job.worker_pid, Some(77));
    assert!(job.last_heartbeat_ms.is_some());

    let ack = store
        .update_heartbeat(&job_id, 0.5, "simulating")
        .expect("heartbeat");
    assert!(!ack.requested_stop);
    assert!(!ack.requested_pause);

    store
        .mark_succeeded(&job_id, json!({ "elapsed": 0.12 }))
        .expect("mark succeeded");

    let job = store.get_job(&job_id).expect("get").expect("exists");
    assert_eq!(job.state, JobState::Succeeded);
    assert!(job.completed_at_ms.is_some());
    assert_eq!(job.result.as_ref().and_then(|r| r.get("elapsed")), Some(&json!(0.12)));
    // Worker bookkeeping is cleared once the job leaves RUNNING.
    assert!(job.worker_id.is_none());
    assert!(job.worker_pid.is_none());
    assert!(job.last_heartbeat_ms.is_none());
}

#[test]
fn transitions_from_terminal_fail_loudly() {
    let mut store = setup("terminal_fails_loudly");
    let job_id = submit_ping(&mut store, 0.1);
    store.mark_running(&job_id, "bt_worker:1", 1).expect("run");
    store
        .mark_succeeded(&job_id, json!({}))
        .expect("succeed");

    let err = store
        .mark_running(&job_id, "bt_worker:2", 2)
        .expect_err("terminal job must refuse mark_running");
    assert!(matches!(err, StoreError::TerminalTransition { .. }));
    assert!(
        format!("{err}").contains("Cannot transition from terminal status"),
        "error: {err}"
    );

    let err = store
        .mark_failed(&job_id, json!({ "kind": "ExecutionError" }))
        .expect_err("terminal job must refuse mark_failed");
    assert!(matches!(err, StoreError::TerminalTransition { .. }));

    // The record is unchanged by the refused transitions.
    let job = store.get_job(&job_id).expect("get").expect("exists");
    assert_eq!(job.state, JobState::Succeeded);
}

#[test]
fn illegal_edges_are_refused() {
    let mut store = setup("illegal_edges");
    let job_id = submit_ping(&mut store, 0.1);

    let err = store
        .mark_succeeded(&job_id, json!({}))
        .expect_err("QUEUED -> SUCCEEDED is not an edge");
    assert!(matches!(err, StoreError::IllegalTransition { .. }));

    let err = store
        .update_heartbeat(&job_id, 0.1, "warmup")
        .expect_err("heartbeat requires RUNNING");
    assert!(matches!(err, StoreError::NotRunning { .. }));

    let job = store.get_job(&job_id).expect("get").expect("exists");
    assert_eq!(job.state, JobState::Queued);
}

#[test]
fn stop_request_kills_queued_immediately() {
    let mut store = setup("stop_kills_queued");
    let job_id = submit_ping(&mut store, 0.1);

    let outcome = store
        .request_stop(&job_id, Some("operator cancel"))
        .expect("request stop");
    assert_eq!(outcome, StopOutcome::KilledImmediately);

    let job = store.get_job(&job_id).expect("get").expect("exists");
    assert_eq!(job.state, JobState::Killed);
    assert_eq!(
        job.error.as_ref().and_then(|e| e.get("kind")),
        Some(&json!("AbortRequested"))
    );

    // A killed job is terminal: no claim, no further stop.
    assert!(store.claim_next_queued().expect("claim").is_none());
    let err = store
        .request_stop(&job_id, None)
        .expect_err("stop on terminal job");
    assert!(matches!(err, StoreError::TerminalTransition { .. }));
}

#[test]
fn stop_request_on_running_sets_flag_only() {
    let mut store = setup("stop_flags_running");
    let job_id = submit_ping(&mut store, 0.1);
    store.mark_running(&job_id, "bt_worker:9", 9).expect("run");

    let outcome = store.request_stop(&job_id, None).expect("request stop");
    assert_eq!(outcome, StopOutcome::FlagSet);

    let job = store.get_job(&job_id).expect("get").expect("exists");
    assert_eq!(job.state, JobState::Running);
    assert!(job.requested_stop);

    let ack = store
        .update_heartbeat(&job_id, 0.7, "simulating")
        .expect("heartbeat");
    assert!(ack.requested_stop);
}

#[test]
fn pause_flag_is_advisory_and_visible_in_ack() {
    let mut store = setup("pause_flag");
    let job_id = submit_ping(&mut store, 0.1);
    store.request_pause(&job_id).expect("pause queued job");

    // Pause never blocks claiming.
    let claimed = store.claim_next_queued().expect("claim").expect("job");
    assert_eq!(claimed.id, job_id);
    store.mark_running(&job_id, "bt_worker:3", 3).expect("run");

    let ack = store
        .update_heartbeat(&job_id, 0.1, "warmup")
        .expect("heartbeat");
    assert!(ack.requested_pause);
    assert!(!ack.requested_stop);
}

#[test]
fn stale_scan_finds_old_heartbeats() {
    let mut store = setup("stale_scan");
    let job_id = submit_ping(&mut store, 0.1);
    store.mark_running(&job_id, "bt_worker:5", 5).expect("run");

    std::thread::sleep(std::time::Duration::from_millis(40));

    let stale = store.find_stale_running(10).expect("stale scan");
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id, job_id);

    let stale = store.find_stale_running(60_000).expect("stale scan");
    assert!(stale.is_empty(), "fresh heartbeat must not be stale");

    // A fresh heartbeat resets the window.
    store
        .update_heartbeat(&job_id, 0.2, "simulating")
        .expect("heartbeat");
    let stale = store.find_stale_running(30_000).expect("stale scan");
    assert!(stale.is_empty());
}

#[test]
fn orphaned_records_heartbeat_timeout_reason() {
    let mut store = setup("orphan_reason");
    let job_id = submit_ping(&mut store, 0.1);
    store.mark_running(&job_id, "bt_worker:6", 6).expect("run");

    store
        .mark_orphaned(&job_id, "heartbeat_timeout")
        .expect("mark orphaned");

    let job = store.get_job(&job_id).expect("get").expect("exists");
    assert_eq!(job.state, JobState::Orphaned);
    let error = job.error.expect("orphan error payload");
    assert_eq!(error.get("kind"), Some(&json!("HeartbeatTimeout")));
    assert!(
        error
            .get("reason")
            .and_then(|r| r.as_str())
            .unwrap_or("")
            .contains("heartbeat_timeout")
    );

    let tail = store
        .job_events_tail(JobEventsTailRequest {
            job_id: job_id.clone(),
            after_seq: 0,
            limit: 50,
        })
        .expect("events tail");
    assert!(
        tail.events
            .iter()
            .any(|e| e.kind == "orphaned" && e.message.contains("heartbeat_timeout"))
    );
}

#[test]
fn heartbeat_events_coalesce_in_place() {
    let mut store = setup("heartbeat_coalesce");
    let job_id = submit_ping(&mut store, 0.1);
    store.mark_running(&job_id, "bt_worker:8", 8).expect("run");

    for step in 1..=5 {
        store
            .update_heartbeat(&job_id, step as f64 / 10.0, "simulating")
            .expect("heartbeat");
    }

    let tail = store
        .job_events_tail(JobEventsTailRequest {
            job_id,
            after_seq: 0,
            limit: 50,
        })
        .expect("events tail");
    let heartbeats = tail
        .events
        .iter()
        .filter(|e| e.kind == "heartbeat")
        .count();
    assert_eq!(heartbeats, 1, "consecutive heartbeats must coalesce");
    let last = tail
        .events
        .iter()
        .find(|e| e.kind == "heartbeat")
        .expect("heartbeat event");
    assert_eq!(last.percent, Some(50));
}

#[test]
fn jobs_list_filters_by_state_and_tag() {
    let mut store = setup("jobs_list_filters");
    let a = submit_ping(&mut store, 0.1);
    let b = store
        .submit(SubmitRequest {
            job_type: "PING".to_string(),
            params: json!({ "sleep_sec": 0.3 }),
            tags: vec!["nightly".to_string()],
        })
        .expect("submit");
    store.mark_running(&a, "bt_worker:2", 2).expect("run");

    let running = store
        .jobs_list(JobsListRequest {
            state: Some(JobState::Running),
            tag: None,
            limit: 10,
        })
        .expect("list running");
    assert_eq!(running.jobs.len(), 1);
    assert_eq!(running.jobs[0].id, a);

    let nightly = store
        .jobs_list(JobsListRequest {
            state: None,
            tag: Some("nightly".to_string()),
            limit: 10,
        })
        .expect("list by tag");
    assert_eq!(nightly.jobs.len(), 1);
    assert_eq!(nightly.jobs[0].id, b);
}

#[test]
fn count_running_tracks_transitions() {
    let mut store = setup("count_running");
    let a = submit_ping(&mut store, 0.1);
    let b = submit_ping(&mut store, 0.2);
    assert_eq!(store.count_running().expect("count"), 0);

    store.mark_running(&a, "bt_worker:1", 1).expect("run");
    store.mark_running(&b, "bt_worker:2", 2).expect("run");
    assert_eq!(store.count_running().expect("count"), 2);

    store.mark_aborted(&a, json!({ "kind": "AbortRequested" })).expect("abort");
    assert_eq!(store.count_running().expect("count"), 1);
}
