#![forbid(unsafe_code)]

use bt_core::state::JobState;
use serde_json::Value as JsonValue;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct JobRecord {
    pub id: String,
    pub job_type: String,
    pub params: JsonValue,
    pub fingerprint: String,
    pub state: JobState,
    pub worker_id: Option<String>,
    pub worker_pid: Option<i64>,
    pub last_heartbeat_ms: Option<i64>,
    pub progress: f64,
    pub phase: Option<String>,
    pub result: Option<JsonValue>,
    pub error: Option<JsonValue>,
    pub requested_pause: bool,
    pub requested_stop: bool,
    pub tags: Vec<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub completed_at_ms: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct SubmitRequest {
    pub job_type: String,
    pub params: JsonValue,
    pub tags: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmissionVerdict {
    Admit,
    Reject,
}

impl AdmissionVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            AdmissionVerdict::Admit => "ADMIT",
            AdmissionVerdict::Reject => "REJECT",
        }
    }
}

#[derive(Clone, Debug)]
pub struct AdmissionOutcome {
    pub job_id: String,
    pub state: JobState,
    pub fingerprint: String,
    pub verdict: AdmissionVerdict,
    pub reason: Option<String>,
    pub evidence_dir: PathBuf,
}

/// Returned by every heartbeat write so a worker learns about advisory
/// stop/pause requests without issuing a second query.
#[derive(Clone, Copy, Debug)]
pub struct HeartbeatAck {
    pub requested_stop: bool,
    pub requested_pause: bool,
    pub last_heartbeat_ms: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    /// The job was still QUEUED; no worker exists, so it was killed in place.
    KilledImmediately,
    /// The job is RUNNING; the flag is set and the worker will observe it at
    /// its next abort checkpoint.
    FlagSet,
}

#[derive(Clone, Debug, Default)]
pub struct JobsListRequest {
    pub state: Option<JobState>,
    pub tag: Option<String>,
    pub limit: usize,
}

#[derive(Clone, Debug)]
pub struct JobsListResult {
    pub jobs: Vec<JobRecord>,
    pub has_more: bool,
}

#[derive(Clone, Debug)]
pub struct JobEventRow {
    pub seq: i64,
    pub job_id: String,
    pub ts_ms: i64,
    pub kind: String,
    pub message: String,
    pub percent: Option<i64>,
    pub meta_json: Option<String>,
}

#[derive(Clone, Debug)]
pub struct JobEventsTailRequest {
    pub job_id: String,
    pub after_seq: i64,
    pub limit: usize,
}

#[derive(Clone, Debug)]
pub struct JobEventsTailResult {
    pub job_id: String,
    pub after_seq: i64,
    pub next_after_seq: i64,
    pub events: Vec<JobEventRow>,
    pub has_more: bool,
}
