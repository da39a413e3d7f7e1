#![forbid(unsafe_code)]

//! The worker execution unit: runs exactly one claimed job to a terminal
//! state. Resolution, validation, and execution failures are isolated to the
//! job; the final evidence manifest is persisted before the terminal
//! transition so no outcome goes unaudited.

use crate::context::JobContext;
use crate::error::WorkerError;
use crate::registry::{HandlerError, HandlerOutcome, HandlerRegistry};
use bt_core::errors::ErrorKind;
use bt_core::state::JobState;
use bt_storage::{JobRecord, SqliteStore, StoreError, rfc3339_ms};
use serde_json::{Value as JsonValue, json};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub struct RunOptions {
    /// How long to wait for the supervisor's spawn -> mark_running ordering
    /// to catch up before giving up.
    pub startup_wait: Duration,
    /// Bound on how stale the cached abort/pause flags may get between
    /// heartbeats.
    pub flag_refresh: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            startup_wait: Duration::from_secs(10),
            flag_refresh: Duration::from_millis(500),
        }
    }
}

/// Runs the claimed job to a terminal state and returns it. `Err` means an
/// infrastructure failure before or after handler execution; the job record
/// is only ever touched once it is RUNNING under `worker_id`.
pub fn run_claimed_job(
    store: &mut SqliteStore,
    registry: &HandlerRegistry,
    job_id: &str,
    worker_id: &str,
    options: &RunOptions,
) -> Result<JobState, WorkerError> {
    let job = wait_until_running(store, job_id, worker_id, options.startup_wait)?;

    let Some(handler) = registry.resolve(&job.job_type) else {
        let error = HandlerError {
            kind: ErrorKind::UnknownHandler,
            message: format!("no handler registered for job_type '{}'", job.job_type),
            detail: None,
        };
        return finish_failed(store, &job, &error, "resolve");
    };

    if let Err(error) = handler.validate_params(&job.params) {
        return finish_failed(store, &job, &error, "validate");
    }

    let mut ctx = JobContext::new(
        store,
        job.id.clone(),
        options.flag_refresh,
        job.requested_stop,
        job.requested_pause,
    );
    let outcome = handler.execute(&job.params, &mut ctx);
    let phase = ctx.last_phase().to_string();
    let progress = ctx.last_progress();

    match outcome {
        Ok(HandlerOutcome::Completed(result)) => {
            write_final_manifest(store, &job, JobState::Succeeded, Some(&result), None)?;
            store.mark_succeeded(&job.id, result)?;
            Ok(JobState::Succeeded)
        }
        Ok(HandlerOutcome::Aborted) => {
            let error = json!({
                "kind": ErrorKind::AbortRequested.as_str(),
                "reason": "abort requested",
                "phase": phase,
                "progress": progress,
            });
            write_final_manifest(store, &job, JobState::Aborted, None, Some(&error))?;
            store.mark_aborted(&job.id, error)?;
            Ok(JobState::Aborted)
        }
        Err(handler_error) => finish_failed(store, &job, &handler_error, &phase),
    }
}

fn finish_failed(
    store: &mut SqliteStore,
    job: &JobRecord,
    error: &HandlerError,
    phase: &str,
) -> Result<JobState, WorkerError> {
    let error = json!({
        "kind": error.kind.as_str(),
        "message": error.message,
        "detail": error.detail,
        "phase": phase,
    });
    write_final_manifest(store, job, JobState::Failed, None, Some(&error))?;
    store.mark_failed(&job.id, error)?;
    Ok(JobState::Failed)
}

/// The terminal outcome snapshot, written before the state transition. The
/// admission-time `manifest.json` stays immutable; the outcome goes to the
/// distinctly named `manifest.final.json`. A conflict means a bundle already
/// exists for this attempt; the guarded transition that follows is the
/// arbiter then.
fn write_final_manifest(
    store: &mut SqliteStore,
    job: &JobRecord,
    state: JobState,
    result: Option<&JsonValue>,
    error: Option<&JsonValue>,
) -> Result<(), WorkerError> {
    let now = now_ms();
    let mut manifest = serde_json::Map::new();
    manifest.insert("job_id".to_string(), json!(job.id));
    manifest.insert("state".to_string(), json!(state.as_str()));
    manifest.insert("fingerprint".to_string(), json!(job.fingerprint));
    if let Some(result) = result {
        manifest.insert("result".to_string(), result.clone());
    }
    if let Some(error) = error {
        manifest.insert("error".to_string(), error.clone());
    }
    manifest.insert("completed_at".to_string(), json!(rfc3339_ms(now)));
    manifest.insert("completed_at_ms".to_string(), json!(now));

    match store
        .evidence_writer()
        .write_json(&job.id, "manifest.final.json", &manifest.into())
    {
        Ok(_) | Err(StoreError::EvidenceConflict { .. }) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// The supervisor spawns the process first and flips QUEUED -> RUNNING right
/// after; wait out that window. Exits without touching the job when it is
/// owned by someone else or already past RUNNING.
fn wait_until_running(
    store: &mut SqliteStore,
    job_id: &str,
    worker_id: &str,
    startup_wait: Duration,
) -> Result<JobRecord, WorkerError> {
    let deadline = Instant::now() + startup_wait;
    loop {
        let job = store.get_job(job_id)?.ok_or_else(|| WorkerError::UnknownJob {
            job_id: job_id.to_string(),
        })?;
        match job.state {
            JobState::Running => {
                if job.worker_id.as_deref() == Some(worker_id) {
                    return Ok(job);
                }
                return Err(WorkerError::NotOurs {
                    job_id: job.id,
                    state: job.state,
                    owner: job.worker_id,
                });
            }
            JobState::Queued => {
                if Instant::now() >= deadline {
                    return Err(WorkerError::StartupTimeout {
                        job_id: job_id.to_string(),
                    });
                }
                std::thread::sleep(Duration::from_millis(25));
            }
            state => {
                return Err(WorkerError::NotOurs {
                    job_id: job.id,
                    state,
                    owner: job.worker_id,
                });
            }
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis()
        .min(i64::MAX as u128) as i64
}
