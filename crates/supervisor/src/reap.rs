#![forbid(unsafe_code)]

//! Out-of-band recovery of worker processes that crashed out from under the
//! supervisor. Scans pidfiles under a root directory and, independently, live
//! processes that look like workers but carry no pidfile (strays). A pidfile
//! is valid iff the referenced PID is alive, its command line matches the
//! worker entry point, the db reference resolves, and the associated job is
//! not already terminal. Everything else is reaped: dead or recycled PIDs get
//! their pidfile deleted without any signal; stale-but-alive workers and
//! strays get SIGTERM, a grace period, then SIGKILL.

use crate::liveness::{ProcessTable, is_worker_cmdline, kill_with_grace};
use crate::pidfile;
use bt_storage::{DB_FILE_NAME, SqliteStore};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct ReaperConfig {
    pub root: PathBuf,
    pub dry_run: bool,
    pub grace: Duration,
}

#[derive(Debug)]
pub enum ReapAction {
    /// Pidfile content could not be parsed as a PID; removed.
    RemovedUnreadable { path: PathBuf },
    /// Referenced PID is dead; pidfile removed, never signaled.
    RemovedDead { path: PathBuf, pid: u32 },
    /// PID is alive but its command line is not a worker (recycled PID);
    /// pidfile removed, process never signaled.
    RemovedRecycled { path: PathBuf, pid: u32 },
    /// A live worker whose job store record is gone or terminal.
    KilledStale {
        path: PathBuf,
        pid: u32,
        reason: String,
        forced: bool,
    },
    /// Command line (or job store) could not be read; never killed.
    Unverifiable {
        path: PathBuf,
        pid: u32,
        reason: String,
    },
    /// Live worker, matching command line, non-terminal job. Left alone.
    Healthy {
        path: PathBuf,
        pid: u32,
        job_id: String,
    },
    /// A worker-looking process with no pidfile anywhere under the root.
    KilledStray { pid: u32, forced: bool },
}

impl std::fmt::Display for ReapAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RemovedUnreadable { path } => {
                write!(f, "removed unreadable pidfile {}", path.display())
            }
            Self::RemovedDead { path, pid } => {
                write!(f, "removed pidfile {} (pid {pid} is dead)", path.display())
            }
            Self::RemovedRecycled { path, pid } => write!(
                f,
                "removed pidfile {} (pid {pid} is not a worker)",
                path.display()
            ),
            Self::KilledStale {
                path,
                pid,
                reason,
                forced,
            } => write!(
                f,
                "killed stale worker pid {pid} ({reason}, pidfile {}{})",
                path.display(),
                if *forced { ", forced" } else { "" }
            ),
            Self::Unverifiable { path, pid, reason } => write!(
                f,
                "skipped pid {pid} ({reason}, pidfile {})",
                path.display()
            ),
            Self::Healthy { path, pid, job_id } => write!(
                f,
                "healthy worker pid {pid} for {job_id} (pidfile {})",
                path.display()
            ),
            Self::KilledStray { pid, forced } => write!(
                f,
                "killed stray worker pid {pid}{}",
                if *forced { " (forced)" } else { "" }
            ),
        }
    }
}

#[derive(Debug, Default)]
pub struct ReapReport {
    pub actions: Vec<ReapAction>,
}

enum PidfileStatus {
    Valid { job_id: String },
    Stale { reason: String },
    Unverifiable { reason: String },
}

pub fn run_reaper(config: &ReaperConfig, table: &dyn ProcessTable) -> ReapReport {
    let mut report = ReapReport::default();
    let mut seen_pids = BTreeSet::<u32>::new();
    let mut stores = StoreCache::default();

    for path in pidfile::scan(&config.root) {
        let Some(pid) = pidfile::read_pid(&path) else {
            if !config.dry_run {
                pidfile::remove(&path);
            }
            report.actions.push(ReapAction::RemovedUnreadable { path });
            continue;
        };
        seen_pids.insert(pid);

        if !table.is_alive(pid) {
            if !config.dry_run {
                pidfile::remove(&path);
            }
            report.actions.push(ReapAction::RemovedDead { path, pid });
            continue;
        }

        let Some(argv) = table.cmdline(pid) else {
            report.actions.push(ReapAction::Unverifiable {
                path,
                pid,
                reason: "command line is unreadable".to_string(),
            });
            continue;
        };
        if !is_worker_cmdline(&argv) {
            if !config.dry_run {
                pidfile::remove(&path);
            }
            report
                .actions
                .push(ReapAction::RemovedRecycled { path, pid });
            continue;
        }

        match pidfile_status(&path, &mut stores) {
            PidfileStatus::Valid { job_id } => {
                report.actions.push(ReapAction::Healthy { path, pid, job_id });
            }
            PidfileStatus::Unverifiable { reason } => {
                report
                    .actions
                    .push(ReapAction::Unverifiable { path, pid, reason });
            }
            PidfileStatus::Stale { reason } => {
                let forced = if config.dry_run {
                    false
                } else {
                    kill_with_grace(table, pid, config.grace)
                };
                if !config.dry_run {
                    pidfile::remove(&path);
                }
                report.actions.push(ReapAction::KilledStale {
                    path,
                    pid,
                    reason,
                    forced,
                });
            }
        }
    }

    // Independent stray scan: worker-looking processes with no pidfile. A pid
    // referenced by any pidfile (even one reaped above) is skipped here; the
    // pidfile pass already decided its fate.
    for pid in table.worker_pids() {
        if seen_pids.contains(&pid) {
            continue;
        }
        let forced = if config.dry_run {
            false
        } else {
            kill_with_grace(table, pid, config.grace)
        };
        report.actions.push(ReapAction::KilledStray { pid, forced });
    }

    report
}

#[derive(Default)]
struct StoreCache {
    stores: HashMap<PathBuf, SqliteStore>,
}

impl StoreCache {
    fn open(&mut self, dir: &Path) -> Result<&SqliteStore, String> {
        let canonical = std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
        if !self.stores.contains_key(&canonical) {
            let store = SqliteStore::open(&canonical)
                .map_err(|err| format!("job store cannot be opened: {err}"))?;
            self.stores.insert(canonical.clone(), store);
        }
        Ok(&self.stores[&canonical])
    }
}

fn pidfile_status(path: &Path, stores: &mut StoreCache) -> PidfileStatus {
    let Some(job_id) = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(pidfile::job_id_from_name)
        .map(str::to_string)
    else {
        return PidfileStatus::Stale {
            reason: "pidfile name does not name a job".to_string(),
        };
    };

    let Some(store_dir) = pidfile::read_dbref(path) else {
        return PidfileStatus::Stale {
            reason: "db reference is missing".to_string(),
        };
    };
    if !store_dir.join(DB_FILE_NAME).exists() {
        return PidfileStatus::Stale {
            reason: "job store is missing".to_string(),
        };
    }

    let store = match stores.open(&store_dir) {
        Ok(store) => store,
        // A store we cannot open is not proof of staleness; never kill on
        // unverifiable evidence.
        Err(reason) => return PidfileStatus::Unverifiable { reason },
    };
    match store.get_job(&job_id) {
        Ok(Some(job)) if job.state.is_terminal() => PidfileStatus::Stale {
            reason: format!("job {job_id} is already {}", job.state),
        },
        Ok(Some(_)) => PidfileStatus::Valid { job_id },
        Ok(None) => PidfileStatus::Stale {
            reason: format!("job {job_id} has no record"),
        },
        Err(err) => PidfileStatus::Unverifiable {
            reason: format!("job lookup failed: {err}"),
        },
    }
}
