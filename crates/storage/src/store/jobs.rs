#![forbid(unsafe_code)]

use super::*;
use bt_core::state::JobState;
use rusqlite::{OptionalExtension, TransactionBehavior, params};
use serde_json::Value as JsonValue;

const MAX_JOB_TYPE_LEN: usize = 64;
const MAX_PHASE_LEN: usize = 200;
const MAX_TAGS_PER_JOB: usize = 32;
const MAX_TAG_LEN: usize = 64;
const MAX_LIST_LIMIT: usize = 200;
const MAX_TAIL_EVENTS: usize = 200;
const MAX_EVENT_MESSAGE_LEN: usize = 400;

const JOB_COLUMNS: &str = "id, job_type, params_json, fingerprint, state, worker_id, worker_pid, \
     last_heartbeat_ms, progress, phase, result_json, error_json, requested_pause, \
     requested_stop, tags_json, created_at_ms, updated_at_ms, completed_at_ms";

pub(in crate::store) fn normalize_job_id(raw: &str) -> Result<String, StoreError> {
    let raw = raw.trim();
    bt_core::ids::JobId::try_new(raw)
        .map(|id| id.as_str().to_string())
        .map_err(|_| StoreError::InvalidInput("job id must look like JOB-0001"))
}

pub(in crate::store) fn normalize_job_type(raw: &str) -> Result<String, StoreError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(StoreError::InvalidInput("job_type must not be empty"));
    }
    if raw.len() > MAX_JOB_TYPE_LEN {
        return Err(StoreError::InvalidInput("job_type is too long"));
    }
    if !raw
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(StoreError::InvalidInput(
            "job_type may contain only [A-Za-z0-9._-]",
        ));
    }
    Ok(raw.to_string())
}

fn normalize_worker_id(raw: &str) -> Result<String, StoreError> {
    bt_core::ids::WorkerId::try_new(raw.trim())
        .map(|id| id.as_str().to_string())
        .map_err(|_| StoreError::InvalidInput("worker_id is invalid"))
}

fn normalize_phase(raw: &str) -> String {
    raw.trim().chars().take(MAX_PHASE_LEN).collect()
}

pub(in crate::store) fn normalize_tags(mut tags: Vec<String>) -> Result<Vec<String>, StoreError> {
    if tags.len() > MAX_TAGS_PER_JOB {
        return Err(StoreError::InvalidInput("too many tags"));
    }
    let mut out = Vec::<String>::new();
    let mut seen = std::collections::BTreeSet::<String>::new();
    for tag in tags.drain(..) {
        let trimmed = tag.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.len() > MAX_TAG_LEN {
            return Err(StoreError::InvalidInput("tag is too long"));
        }
        if seen.insert(trimmed.to_string()) {
            out.push(trimmed.to_string());
        }
    }
    Ok(out)
}

fn ensure_transition(job_id: &str, from: JobState, to: JobState) -> Result<(), StoreError> {
    if from.is_terminal() {
        return Err(StoreError::TerminalTransition {
            job_id: job_id.to_string(),
            state: from,
        });
    }
    if !from.can_transition_to(to) {
        return Err(StoreError::IllegalTransition {
            job_id: job_id.to_string(),
            from,
            to,
        });
    }
    Ok(())
}

struct RawJobRow {
    id: String,
    job_type: String,
    params_json: String,
    fingerprint: String,
    state: String,
    worker_id: Option<String>,
    worker_pid: Option<i64>,
    last_heartbeat_ms: Option<i64>,
    progress: f64,
    phase: Option<String>,
    result_json: Option<String>,
    error_json: Option<String>,
    requested_pause: i64,
    requested_stop: i64,
    tags_json: Option<String>,
    created_at_ms: i64,
    updated_at_ms: i64,
    completed_at_ms: Option<i64>,
}

fn read_raw_job_row(row: &rusqlite::Row<'_>) -> Result<RawJobRow, rusqlite::Error> {
    Ok(RawJobRow {
        id: row.get(0)?,
        job_type: row.get(1)?,
        params_json: row.get(2)?,
        fingerprint: row.get(3)?,
        state: row.get(4)?,
        worker_id: row.get(5)?,
        worker_pid: row.get(6)?,
        last_heartbeat_ms: row.get(7)?,
        progress: row.get(8)?,
        phase: row.get(9)?,
        result_json: row.get(10)?,
        error_json: row.get(11)?,
        requested_pause: row.get(12)?,
        requested_stop: row.get(13)?,
        tags_json: row.get(14)?,
        created_at_ms: row.get(15)?,
        updated_at_ms: row.get(16)?,
        completed_at_ms: row.get(17)?,
    })
}

fn decode_job_row(raw: RawJobRow) -> Result<JobRecord, StoreError> {
    let state = JobState::parse(&raw.state)
        .ok_or(StoreError::InvalidInput("stored job state is not recognized"))?;
    let params: JsonValue = serde_json::from_str(&raw.params_json)?;
    let result = raw
        .result_json
        .as_deref()
        .map(serde_json::from_str::<JsonValue>)
        .transpose()?;
    let error = raw
        .error_json
        .as_deref()
        .map(serde_json::from_str::<JsonValue>)
        .transpose()?;
    let tags = match raw.tags_json.as_deref() {
        Some(json) => serde_json::from_str::<Vec<String>>(json)?,
        None => Vec::new(),
    };
    Ok(JobRecord {
        id: raw.id,
        job_type: raw.job_type,
        params,
        fingerprint: raw.fingerprint,
        state,
        worker_id: raw.worker_id,
        worker_pid: raw.worker_pid,
        last_heartbeat_ms: raw.last_heartbeat_ms,
        progress: raw.progress,
        phase: raw.phase,
        result,
        error,
        requested_pause: raw.requested_pause != 0,
        requested_stop: raw.requested_stop != 0,
        tags,
        created_at_ms: raw.created_at_ms,
        updated_at_ms: raw.updated_at_ms,
        completed_at_ms: raw.completed_at_ms,
    })
}

fn load_job_tx(tx: &rusqlite::Transaction<'_>, job_id: &str) -> Result<JobRecord, StoreError> {
    let raw = tx
        .query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id=?1"),
            params![job_id],
            read_raw_job_row,
        )
        .optional()?;
    let Some(raw) = raw else {
        return Err(StoreError::UnknownJob {
            job_id: job_id.to_string(),
        });
    };
    decode_job_row(raw)
}

fn load_state_tx(tx: &rusqlite::Transaction<'_>, job_id: &str) -> Result<JobState, StoreError> {
    let state: Option<String> = tx
        .query_row(
            "SELECT state FROM jobs WHERE id=?1",
            params![job_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(state) = state else {
        return Err(StoreError::UnknownJob {
            job_id: job_id.to_string(),
        });
    };
    JobState::parse(&state).ok_or(StoreError::InvalidInput("stored job state is not recognized"))
}

pub(in crate::store) struct InsertJobEventTxArgs<'a> {
    pub ts_ms: i64,
    pub kind: &'a str,
    pub message: &'a str,
    pub percent: Option<i64>,
    pub meta_json: Option<String>,
}

pub(in crate::store) fn insert_job_event_tx(
    tx: &rusqlite::Transaction<'_>,
    job_id: &str,
    args: InsertJobEventTxArgs<'_>,
) -> Result<JobEventRow, StoreError> {
    let message: String = args.message.trim().chars().take(MAX_EVENT_MESSAGE_LEN).collect();
    if message.is_empty() {
        return Err(StoreError::InvalidInput("job_event.message must not be empty"));
    }

    // Noise control: a healthy worker emits frequent `heartbeat` events. Keep
    // storage bounded by coalescing consecutive heartbeats in place (only when
    // the most recent event for the job is also a heartbeat).
    if args.kind == "heartbeat" {
        let last: Option<(i64, String)> = tx
            .query_row(
                r#"
                SELECT seq, kind
                FROM job_events
                WHERE job_id=?1
                ORDER BY seq DESC
                LIMIT 1
                "#,
                params![job_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((seq, last_kind)) = last
            && last_kind == "heartbeat"
        {
            tx.execute(
                r#"
                UPDATE job_events
                SET ts_ms=?1, message=?2, percent=?3, meta_json=?4
                WHERE seq=?5
                "#,
                params![args.ts_ms, message, args.percent, args.meta_json, seq],
            )?;
            return Ok(JobEventRow {
                seq,
                job_id: job_id.to_string(),
                ts_ms: args.ts_ms,
                kind: args.kind.to_string(),
                message,
                percent: args.percent,
                meta_json: args.meta_json,
            });
        }
    }

    tx.execute(
        r#"
        INSERT INTO job_events(job_id, ts_ms, kind, message, percent, meta_json)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            job_id,
            args.ts_ms,
            args.kind,
            message,
            args.percent,
            args.meta_json
        ],
    )?;

    let seq = tx.last_insert_rowid();
    Ok(JobEventRow {
        seq,
        job_id: job_id.to_string(),
        ts_ms: args.ts_ms,
        kind: args.kind.to_string(),
        message,
        percent: args.percent,
        meta_json: args.meta_json,
    })
}

pub(in crate::store) struct InsertJobTxArgs {
    pub job_type: String,
    pub params_json: String,
    pub fingerprint: String,
    pub state: JobState,
    pub tags: Vec<String>,
}

pub(in crate::store) fn insert_job_tx(
    tx: &rusqlite::Transaction<'_>,
    now_ms: i64,
    args: InsertJobTxArgs,
) -> Result<String, StoreError> {
    let seq = next_counter_tx(tx, "job_seq")?;
    let id = format!("JOB-{seq:04}");

    let tags_json = if args.tags.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&args.tags)?)
    };

    tx.execute(
        r#"
        INSERT INTO jobs(
          id, job_type, params_json, fingerprint, state, worker_id, worker_pid,
          last_heartbeat_ms, progress, phase, result_json, error_json,
          requested_pause, requested_stop, tags_json,
          created_at_ms, updated_at_ms, completed_at_ms
        )
        VALUES (?1, ?2, ?3, ?4, ?5, NULL, NULL, NULL, 0, NULL, NULL, NULL, 0, 0, ?6, ?7, ?7, ?8)
        "#,
        params![
            id.as_str(),
            args.job_type,
            args.params_json,
            args.fingerprint,
            args.state.as_str(),
            tags_json,
            now_ms,
            if args.state.is_terminal() {
                Some(now_ms)
            } else {
                None
            },
        ],
    )?;

    let (kind, message) = match args.state {
        JobState::Queued => ("created", "created"),
        JobState::Rejected => ("rejected", "rejected at admission"),
        _ => return Err(StoreError::InvalidInput("jobs may only be inserted as QUEUED or REJECTED")),
    };
    insert_job_event_tx(
        tx,
        id.as_str(),
        InsertJobEventTxArgs {
            ts_ms: now_ms,
            kind,
            message,
            percent: None,
            meta_json: None,
        },
    )?;

    Ok(id)
}

impl SqliteStore {
    /// Plain enqueue without admission control. Prefer
    /// `submit_with_admission`; this path exists for trusted internal
    /// producers and never writes evidence.
    pub fn submit(&mut self, request: SubmitRequest) -> Result<String, StoreError> {
        let job_type = normalize_job_type(&request.job_type)?;
        let tags = normalize_tags(request.tags)?;
        let params_json = admission::canonical_params_json(&request.params)?;
        let fingerprint = admission::fingerprint_canonical(&params_json);

        let now_ms = now_ms();
        let tx = self.conn.transaction()?;
        let id = insert_job_tx(
            &tx,
            now_ms,
            InsertJobTxArgs {
                job_type,
                params_json,
                fingerprint,
                state: JobState::Queued,
                tags,
            },
        )?;
        tx.commit()?;
        Ok(id)
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        let job_id = normalize_job_id(job_id)?;
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id=?1"),
                params![job_id.as_str()],
                read_raw_job_row,
            )
            .optional()?;
        raw.map(decode_job_row).transpose()
    }

    /// Selects the oldest QUEUED job. The select runs inside an IMMEDIATE
    /// transaction so concurrent claimers serialize on the writer lock; the
    /// claim becomes effective only through `mark_running`, which re-validates
    /// QUEUED -> RUNNING, so a racing second claimer fails loudly there
    /// instead of silently sharing the job.
    pub fn claim_next_queued(&mut self) -> Result<Option<JobRecord>, StoreError> {
        let now_ms = now_ms();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let raw = tx
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs \
                     WHERE state='QUEUED' \
                     ORDER BY created_at_ms ASC, id ASC \
                     LIMIT 1"
                ),
                [],
                read_raw_job_row,
            )
            .optional()?;
        let Some(raw) = raw else {
            tx.commit()?;
            return Ok(None);
        };
        let job = decode_job_row(raw)?;

        insert_job_event_tx(
            &tx,
            &job.id,
            InsertJobEventTxArgs {
                ts_ms: now_ms,
                kind: "claimed",
                message: "claimed by supervisor",
                percent: None,
                meta_json: None,
            },
        )?;

        tx.commit()?;
        Ok(Some(job))
    }

    pub fn mark_running(
        &mut self,
        job_id: &str,
        worker_id: &str,
        worker_pid: u32,
    ) -> Result<(), StoreError> {
        let job_id = normalize_job_id(job_id)?;
        let worker_id = normalize_worker_id(worker_id)?;
        let now_ms = now_ms();

        let tx = self.conn.transaction()?;
        let current = load_state_tx(&tx, &job_id)?;
        ensure_transition(&job_id, current, JobState::Running)?;

        tx.execute(
            r#"
            UPDATE jobs
            SET state='RUNNING', worker_id=?2, worker_pid=?3, last_heartbeat_ms=?4,
                progress=0, updated_at_ms=?4
            WHERE id=?1 AND state='QUEUED'
            "#,
            params![job_id.as_str(), worker_id.as_str(), worker_pid as i64, now_ms],
        )?;

        insert_job_event_tx(
            &tx,
            &job_id,
            InsertJobEventTxArgs {
                ts_ms: now_ms,
                kind: "started",
                message: &format!("started by {worker_id} (pid {worker_pid})"),
                percent: None,
                meta_json: None,
            },
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Heartbeat write. Timestamps are assigned here, never by the caller, so
    /// clock skew between worker processes cannot reorder liveness signals.
    /// The ack carries the advisory stop/pause flags so cooperative abort
    /// costs no extra query.
    pub fn update_heartbeat(
        &mut self,
        job_id: &str,
        progress: f64,
        phase: &str,
    ) -> Result<HeartbeatAck, StoreError> {
        let job_id = normalize_job_id(job_id)?;
        let progress = progress.clamp(0.0, 1.0);
        let phase = normalize_phase(phase);
        let now_ms = now_ms();

        let tx = self.conn.transaction()?;
        let job = load_job_tx(&tx, &job_id)?;
        if job.state != JobState::Running {
            return Err(StoreError::NotRunning {
                job_id,
                state: job.state,
            });
        }

        // Monotonic per job: never move the committed heartbeat backwards.
        let last_heartbeat_ms = job.last_heartbeat_ms.unwrap_or(0).max(now_ms);

        tx.execute(
            r#"
            UPDATE jobs
            SET last_heartbeat_ms=?2, progress=?3, phase=?4, updated_at_ms=?5
            WHERE id=?1 AND state='RUNNING'
            "#,
            params![job_id.as_str(), last_heartbeat_ms, progress, phase, now_ms],
        )?;

        insert_job_event_tx(
            &tx,
            &job_id,
            InsertJobEventTxArgs {
                ts_ms: now_ms,
                kind: "heartbeat",
                message: if phase.is_empty() { "heartbeat" } else { &phase },
                percent: Some((progress * 100.0).round() as i64),
                meta_json: None,
            },
        )?;

        tx.commit()?;
        Ok(HeartbeatAck {
            requested_stop: job.requested_stop,
            requested_pause: job.requested_pause,
            last_heartbeat_ms,
        })
    }

    pub fn mark_succeeded(&mut self, job_id: &str, result: JsonValue) -> Result<(), StoreError> {
        self.terminal_from_running(job_id, JobState::Succeeded, Some(result), None)
    }

    pub fn mark_failed(&mut self, job_id: &str, error: JsonValue) -> Result<(), StoreError> {
        self.terminal_from_running(job_id, JobState::Failed, None, Some(error))
    }

    pub fn mark_aborted(&mut self, job_id: &str, error: JsonValue) -> Result<(), StoreError> {
        self.terminal_from_running(job_id, JobState::Aborted, None, Some(error))
    }

    /// Heartbeat-timeout promotion. Unconditional once the staleness window
    /// has elapsed; no attempt is made to contact the worker.
    pub fn mark_orphaned(&mut self, job_id: &str, reason: &str) -> Result<(), StoreError> {
        let error = serde_json::json!({
            "kind": bt_core::errors::ErrorKind::HeartbeatTimeout.as_str(),
            "reason": reason,
        });
        self.terminal_from_running(job_id, JobState::Orphaned, None, Some(error))
    }

    fn terminal_from_running(
        &mut self,
        job_id: &str,
        to: JobState,
        result: Option<JsonValue>,
        error: Option<JsonValue>,
    ) -> Result<(), StoreError> {
        let job_id = normalize_job_id(job_id)?;
        let now_ms = now_ms();

        let tx = self.conn.transaction()?;
        let job = load_job_tx(&tx, &job_id)?;
        ensure_transition(&job_id, job.state, to)?;

        let result_json = result.as_ref().map(serde_json::to_string).transpose()?;
        let error_json = error.as_ref().map(serde_json::to_string).transpose()?;

        tx.execute(
            r#"
            UPDATE jobs
            SET state=?2, result_json=?3, error_json=?4,
                worker_id=NULL, worker_pid=NULL, last_heartbeat_ms=NULL,
                updated_at_ms=?5, completed_at_ms=?5
            WHERE id=?1 AND state='RUNNING'
            "#,
            params![
                job_id.as_str(),
                to.as_str(),
                result_json,
                error_json,
                now_ms
            ],
        )?;

        let kind = match to {
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Aborted => "aborted",
            JobState::Orphaned => "orphaned",
            _ => "completed",
        };
        let message = match (&to, error.as_ref().and_then(|e| e.get("reason"))) {
            (JobState::Orphaned, Some(reason)) => {
                format!("orphaned: {}", reason.as_str().unwrap_or("heartbeat_timeout"))
            }
            _ => kind.to_string(),
        };
        let meta_json = serde_json::to_string(&serde_json::json!({
            "worker_id": job.worker_id,
            "worker_pid": job.worker_pid,
        }))
        .ok();
        insert_job_event_tx(
            &tx,
            &job_id,
            InsertJobEventTxArgs {
                ts_ms: now_ms,
                kind,
                message: &message,
                percent: None,
                meta_json,
            },
        )?;

        tx.commit()?;
        Ok(())
    }

    /// RUNNING jobs whose committed heartbeat is older than `timeout_ms`.
    /// The reference clock is the store's own, consistent with heartbeat
    /// writes.
    pub fn find_stale_running(&self, timeout_ms: u64) -> Result<Vec<JobRecord>, StoreError> {
        let now_ms = now_ms();
        let cutoff = now_ms.saturating_sub(timeout_ms.min(i64::MAX as u64) as i64);

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE state='RUNNING' AND last_heartbeat_ms IS NOT NULL AND last_heartbeat_ms <= ?1 \
             ORDER BY last_heartbeat_ms ASC, id ASC"
        ))?;
        let mut rows = stmt.query(params![cutoff])?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(decode_job_row(read_raw_job_row(row)?)?);
        }
        Ok(out)
    }

    /// Advisory stop. A QUEUED job has no worker to cooperate with, so it is
    /// killed in place; a RUNNING job only gets the flag and terminates when
    /// its handler next polls `is_abort_requested`.
    pub fn request_stop(
        &mut self,
        job_id: &str,
        reason: Option<&str>,
    ) -> Result<StopOutcome, StoreError> {
        let job_id = normalize_job_id(job_id)?;
        let now_ms = now_ms();

        let tx = self.conn.transaction()?;
        let current = load_state_tx(&tx, &job_id)?;
        if current.is_terminal() {
            return Err(StoreError::TerminalTransition {
                job_id,
                state: current,
            });
        }

        let reason = reason.map(str::trim).filter(|s| !s.is_empty());
        let outcome = match current {
            JobState::Queued => {
                ensure_transition(&job_id, current, JobState::Killed)?;
                let error = serde_json::json!({
                    "kind": bt_core::errors::ErrorKind::AbortRequested.as_str(),
                    "reason": reason.unwrap_or("stop requested before claim"),
                });
                tx.execute(
                    r#"
                    UPDATE jobs
                    SET state='KILLED', requested_stop=1, error_json=?2,
                        updated_at_ms=?3, completed_at_ms=?3
                    WHERE id=?1 AND state='QUEUED'
                    "#,
                    params![job_id.as_str(), serde_json::to_string(&error)?, now_ms],
                )?;
                let message = match reason {
                    Some(reason) => format!("killed before claim: {reason}"),
                    None => "killed before claim".to_string(),
                };
                insert_job_event_tx(
                    &tx,
                    &job_id,
                    InsertJobEventTxArgs {
                        ts_ms: now_ms,
                        kind: "killed",
                        message: &message,
                        percent: None,
                        meta_json: None,
                    },
                )?;
                StopOutcome::KilledImmediately
            }
            _ => {
                tx.execute(
                    "UPDATE jobs SET requested_stop=1, updated_at_ms=?2 WHERE id=?1",
                    params![job_id.as_str(), now_ms],
                )?;
                let message = match reason {
                    Some(reason) => format!("stop requested: {reason}"),
                    None => "stop requested".to_string(),
                };
                insert_job_event_tx(
                    &tx,
                    &job_id,
                    InsertJobEventTxArgs {
                        ts_ms: now_ms,
                        kind: "stop_requested",
                        message: &message,
                        percent: None,
                        meta_json: None,
                    },
                )?;
                StopOutcome::FlagSet
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    pub fn request_pause(&mut self, job_id: &str) -> Result<(), StoreError> {
        let job_id = normalize_job_id(job_id)?;
        let now_ms = now_ms();

        let tx = self.conn.transaction()?;
        let current = load_state_tx(&tx, &job_id)?;
        if current.is_terminal() {
            return Err(StoreError::TerminalTransition {
                job_id,
                state: current,
            });
        }

        tx.execute(
            "UPDATE jobs SET requested_pause=1, updated_at_ms=?2 WHERE id=?1",
            params![job_id.as_str(), now_ms],
        )?;
        insert_job_event_tx(
            &tx,
            &job_id,
            InsertJobEventTxArgs {
                ts_ms: now_ms,
                kind: "pause_requested",
                message: "pause requested",
                percent: None,
                meta_json: None,
            },
        )?;

        tx.commit()?;
        Ok(())
    }

    pub fn count_running(&self) -> Result<u64, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE state='RUNNING'",
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    pub fn jobs_list(&self, request: JobsListRequest) -> Result<JobsListResult, StoreError> {
        let limit = request.limit.clamp(1, MAX_LIST_LIMIT);
        let state = request.state.map(JobState::as_str);

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE (?1 IS NULL OR state=?1) \
             ORDER BY created_at_ms DESC, id DESC \
             LIMIT ?2"
        ))?;
        let mut rows = stmt.query(params![state, (limit + 1) as i64])?;

        let mut jobs = Vec::<JobRecord>::new();
        while let Some(row) = rows.next()? {
            jobs.push(decode_job_row(read_raw_job_row(row)?)?);
        }

        // Tag filtering happens over the scanned page; tags are a small
        // JSON-encoded label set, not an indexed column.
        if let Some(tag) = request
            .tag
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            jobs.retain(|job| job.tags.iter().any(|t| t == tag));
        }

        let has_more = jobs.len() > limit;
        if has_more {
            jobs.truncate(limit);
        }
        Ok(JobsListResult { jobs, has_more })
    }

    pub fn job_events_tail(
        &self,
        request: JobEventsTailRequest,
    ) -> Result<JobEventsTailResult, StoreError> {
        let job_id = normalize_job_id(&request.job_id)?;
        if request.after_seq < 0 {
            return Err(StoreError::InvalidInput("after_seq must be >= 0"));
        }
        let limit = request.limit.clamp(1, MAX_TAIL_EVENTS);

        let exists: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM jobs WHERE id=?1",
                params![job_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::UnknownJob { job_id });
        }

        let mut stmt = self.conn.prepare(
            r#"
            SELECT seq, ts_ms, kind, message, percent, meta_json
            FROM job_events
            WHERE job_id=?1 AND seq > ?2
            ORDER BY seq ASC
            LIMIT ?3
            "#,
        )?;
        let mut rows = stmt.query(params![
            job_id.as_str(),
            request.after_seq,
            (limit + 1) as i64
        ])?;

        let mut events = Vec::<JobEventRow>::new();
        while let Some(row) = rows.next()? {
            events.push(JobEventRow {
                seq: row.get(0)?,
                job_id: job_id.clone(),
                ts_ms: row.get(1)?,
                kind: row.get(2)?,
                message: row.get(3)?,
                percent: row.get(4)?,
                meta_json: row.get(5)?,
            });
        }

        let has_more = events.len() > limit;
        if has_more {
            events.truncate(limit);
        }
        let next_after_seq = events.last().map(|e| e.seq).unwrap_or(request.after_seq);

        Ok(JobEventsTailResult {
            job_id,
            after_seq: request.after_seq,
            next_after_seq,
            events,
            has_more,
        })
    }
}
