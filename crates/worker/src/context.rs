#![forbid(unsafe_code)]

use bt_storage::{SqliteStore, StoreError};
use std::time::{Duration, Instant};

/// What a handler sees while executing: heartbeat/progress reporting and the
/// advisory stop/pause flags. The flags are a cached view refreshed at a
/// bounded interval (and on every heartbeat ack), so a tight handler loop
/// never turns into a query per iteration.
pub struct JobContext<'a> {
    store: &'a mut SqliteStore,
    job_id: String,
    abort_requested: bool,
    pause_requested: bool,
    flags_refreshed_at: Instant,
    refresh_every: Duration,
    last_phase: String,
    last_progress: f64,
}

impl<'a> JobContext<'a> {
    pub(crate) fn new(
        store: &'a mut SqliteStore,
        job_id: String,
        refresh_every: Duration,
        abort_requested: bool,
        pause_requested: bool,
    ) -> Self {
        Self {
            store,
            job_id,
            abort_requested,
            pause_requested,
            flags_refreshed_at: Instant::now(),
            refresh_every,
            last_phase: String::new(),
            last_progress: 0.0,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Reports liveness and progress. The ack piggybacks the advisory flags,
    /// so a heartbeating handler pays nothing extra for abort polling.
    pub fn update_heartbeat(&mut self, progress: f64, phase: &str) -> Result<(), StoreError> {
        let ack = self.store.update_heartbeat(&self.job_id, progress, phase)?;
        self.abort_requested = ack.requested_stop;
        self.pause_requested = ack.requested_pause;
        self.flags_refreshed_at = Instant::now();
        self.last_phase = phase.to_string();
        self.last_progress = progress;
        Ok(())
    }

    pub fn is_abort_requested(&mut self) -> bool {
        self.refresh_flags_if_due();
        self.abort_requested
    }

    pub fn is_pause_requested(&mut self) -> bool {
        self.refresh_flags_if_due();
        self.pause_requested
    }

    fn refresh_flags_if_due(&mut self) {
        if self.flags_refreshed_at.elapsed() < self.refresh_every {
            return;
        }
        self.flags_refreshed_at = Instant::now();
        match self.store.get_job(&self.job_id) {
            Ok(Some(job)) => {
                self.abort_requested = job.requested_stop;
                self.pause_requested = job.requested_pause;
            }
            // Keep the last cached view; the next heartbeat write surfaces a
            // real store problem.
            Ok(None) | Err(_) => {}
        }
    }

    pub(crate) fn last_phase(&self) -> &str {
        &self.last_phase
    }

    pub(crate) fn last_progress(&self) -> f64 {
        self.last_progress
    }
}
