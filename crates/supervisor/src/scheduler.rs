#![forbid(unsafe_code)]

//! The scheduler loop. One `tick()` reaps exited children, promotes
//! stale-heartbeat jobs to ORPHANED, and claims/spawns queued work up to the
//! worker concurrency limit. The tick never blocks on a worker's completion;
//! workers report asynchronously through the job store.

use crate::SupervisorError;
use crate::liveness;
use crate::pidfile;
use bt_core::errors::ErrorKind;
use bt_core::state::JobState;
use bt_storage::{JobRecord, SqliteStore, StoreError, rfc3339_ms};
use serde_json::json;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub struct SupervisorConfig {
    pub storage_dir: PathBuf,
    pub worker_bin: String,
    pub max_workers: usize,
    pub heartbeat_timeout_ms: u64,
    pub drain_grace_ms: u64,
}

struct WorkerChild {
    job_id: String,
    child: Child,
    pidfile: PathBuf,
}

pub struct Supervisor {
    store: SqliteStore,
    config: SupervisorConfig,
    children: Vec<WorkerChild>,
    spawn_seq: u64,
}

/// What a single tick did, for logging and tests.
#[derive(Clone, Debug, Default)]
pub struct TickReport {
    pub exited: usize,
    pub orphaned: Vec<String>,
    pub spawned: Vec<String>,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.exited == 0 && self.orphaned.is_empty() && self.spawned.is_empty()
    }
}

impl Supervisor {
    pub fn open(config: SupervisorConfig) -> Result<Self, SupervisorError> {
        let store = SqliteStore::open(&config.storage_dir)?;
        Ok(Self {
            store,
            config,
            children: Vec::new(),
            spawn_seq: 0,
        })
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn active_workers(&self) -> usize {
        self.children.len()
    }

    /// One cooperative tick: reap exited children, orphan-scan, then claim
    /// and spawn until the worker limit is reached. Job-level failures are
    /// logged and contained; only store-level failures propagate.
    pub fn tick(&mut self) -> Result<TickReport, SupervisorError> {
        let exited = self.reap_exited_children();
        let orphaned = self.scan_orphans()?;
        let spawned = self.spawn_workers();
        Ok(TickReport {
            exited,
            orphaned,
            spawned,
        })
    }

    fn reap_exited_children(&mut self) -> usize {
        let mut exited = 0usize;
        self.children.retain_mut(|wc| match wc.child.try_wait() {
            Ok(Some(_)) => {
                pidfile::remove(&wc.pidfile);
                exited += 1;
                false
            }
            Ok(None) => true,
            Err(err) => {
                eprintln!("bt_supervisor: wait on worker for {} failed: {err}", wc.job_id);
                pidfile::remove(&wc.pidfile);
                exited += 1;
                false
            }
        });
        exited
    }

    /// Promote RUNNING jobs whose committed heartbeat is older than the
    /// configured timeout. Unconditional: no attempt is made to contact the
    /// worker, which may well still be alive. The reaper handles the process.
    fn scan_orphans(&mut self) -> Result<Vec<String>, SupervisorError> {
        let stale = self.store.find_stale_running(self.config.heartbeat_timeout_ms)?;
        let mut orphaned = Vec::new();
        for job in stale {
            if let Err(err) = self.orphan_one(&job) {
                eprintln!("bt_supervisor: orphaning {} failed: {err}", job.id);
                continue;
            }
            orphaned.push(job.id);
        }
        Ok(orphaned)
    }

    fn orphan_one(&mut self, job: &JobRecord) -> Result<(), SupervisorError> {
        let now = now_ms();
        let error = json!({
            "kind": ErrorKind::HeartbeatTimeout.as_str(),
            "reason": "heartbeat_timeout",
        });
        let mut manifest = serde_json::Map::new();
        manifest.insert("job_id".to_string(), json!(job.id));
        manifest.insert("state".to_string(), json!(JobState::Orphaned.as_str()));
        manifest.insert("fingerprint".to_string(), json!(job.fingerprint));
        manifest.insert("error".to_string(), error.clone());
        manifest.insert("completed_at".to_string(), json!(rfc3339_ms(now)));
        manifest.insert("completed_at_ms".to_string(), json!(now));

        // Evidence before transition: an unaudited terminal write is worse
        // than a blocked one. A conflict means a bundle already exists for
        // this attempt; the guarded transition below is the arbiter then.
        match self
            .store
            .evidence_writer()
            .write_json(&job.id, "manifest.final.json", &manifest.into())
        {
            Ok(_) | Err(StoreError::EvidenceConflict { .. }) => {}
            Err(err) => return Err(err.into()),
        }

        self.store.mark_orphaned(&job.id, "heartbeat_timeout")?;
        Ok(())
    }

    fn spawn_workers(&mut self) -> Vec<String> {
        let mut spawned = Vec::new();
        while self.children.len() < self.config.max_workers {
            let job = match self.store.claim_next_queued() {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(err) => {
                    eprintln!("bt_supervisor: claim failed: {err}");
                    break;
                }
            };
            match self.spawn_one(&job) {
                Ok(()) => spawned.push(job.id),
                Err(err) => {
                    // The claim did not change state; the job stays QUEUED
                    // and a later tick retries it.
                    eprintln!("bt_supervisor: spawn for {} failed: {err}", job.id);
                    break;
                }
            }
        }
        spawned
    }

    fn spawn_one(&mut self, job: &JobRecord) -> Result<(), SupervisorError> {
        self.spawn_seq += 1;
        let worker_id = format!("bt_worker:{}-{}", std::process::id(), self.spawn_seq);

        let mut cmd = Command::new(&self.config.worker_bin);
        cmd.arg("--storage-dir")
            .arg(&self.config.storage_dir)
            .arg("--job-id")
            .arg(&job.id)
            .arg("--worker-id")
            .arg(&worker_id)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let mut child = cmd.spawn()?;
        let pid = child.id();

        let pidfile = match pidfile::write(&self.config.storage_dir, &job.id, pid) {
            Ok(path) => path,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err.into());
            }
        };

        if let Err(err) = self.store.mark_running(&job.id, &worker_id, pid) {
            // The job was killed (or raced) between claim and here; the
            // spawned child must never touch it.
            let _ = child.kill();
            let _ = child.wait();
            pidfile::remove(&pidfile);
            return Err(err.into());
        }

        self.children.push(WorkerChild {
            job_id: job.id.clone(),
            child,
            pidfile,
        });
        Ok(())
    }

    /// Waits for in-flight workers to finish. With `force`, sends SIGTERM
    /// first and escalates to SIGKILL after the grace period.
    pub fn drain(&mut self, force: bool) {
        if force {
            for wc in &self.children {
                liveness::send_terminate(wc.child.id());
            }
            let deadline = Instant::now() + Duration::from_millis(self.config.drain_grace_ms);
            while Instant::now() < deadline {
                if self
                    .children
                    .iter_mut()
                    .all(|wc| matches!(wc.child.try_wait(), Ok(Some(_))))
                {
                    break;
                }
                std::thread::sleep(Duration::from_millis(40));
            }
            for wc in &mut self.children {
                if !matches!(wc.child.try_wait(), Ok(Some(_))) {
                    let _ = wc.child.kill();
                }
            }
        }
        for mut wc in self.children.drain(..) {
            let _ = wc.child.wait();
            pidfile::remove(&wc.pidfile);
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
