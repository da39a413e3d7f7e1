#![forbid(unsafe_code)]

//! Pidfile governance. One pidfile per spawned worker, co-located with the
//! job store it serves: `backtest_jobs.db.<job_id>.pid` containing a single
//! decimal PID line, plus a sibling `.dbref` file holding the absolute store
//! directory so the reaper can find the job record from the pidfile alone.
//! Pidfiles are advisory; every destructive decision re-validates against
//! live process state first.

use bt_storage::DB_FILE_NAME;
use std::path::{Path, PathBuf};

pub const PIDFILE_SUFFIX: &str = ".pid";
pub const DBREF_SUFFIX: &str = ".dbref";

const MAX_SCAN_DEPTH: usize = 8;

pub fn pidfile_path(storage_dir: &Path, job_id: &str) -> PathBuf {
    storage_dir.join(format!("{DB_FILE_NAME}.{job_id}{PIDFILE_SUFFIX}"))
}

pub fn dbref_path(pidfile: &Path) -> PathBuf {
    let mut os = pidfile.as_os_str().to_os_string();
    os.push(DBREF_SUFFIX);
    PathBuf::from(os)
}

/// `backtest_jobs.db.JOB-0001.pid` -> `JOB-0001`.
pub fn job_id_from_name(file_name: &str) -> Option<&str> {
    let rest = file_name.strip_prefix(DB_FILE_NAME)?;
    let rest = rest.strip_prefix('.')?;
    let job_id = rest.strip_suffix(PIDFILE_SUFFIX)?;
    if job_id.is_empty() { None } else { Some(job_id) }
}

pub fn write(storage_dir: &Path, job_id: &str, pid: u32) -> std::io::Result<PathBuf> {
    let storage_dir =
        std::fs::canonicalize(storage_dir).unwrap_or_else(|_| storage_dir.to_path_buf());
    let path = pidfile_path(&storage_dir, job_id);
    std::fs::write(&path, format!("{pid}\n"))?;
    std::fs::write(dbref_path(&path), format!("{}\n", storage_dir.display()))?;
    Ok(path)
}

pub fn read_pid(pidfile: &Path) -> Option<u32> {
    let text = std::fs::read_to_string(pidfile).ok()?;
    text.trim().parse().ok()
}

/// The storage directory this pidfile's worker serves, from the `.dbref`
/// sibling. None when the reference is missing or empty.
pub fn read_dbref(pidfile: &Path) -> Option<PathBuf> {
    let text = std::fs::read_to_string(dbref_path(pidfile)).ok()?;
    let line = text.trim();
    if line.is_empty() {
        None
    } else {
        Some(PathBuf::from(line))
    }
}

/// Removes the pidfile and its `.dbref` sibling. Best-effort on both.
pub fn remove(pidfile: &Path) {
    let _ = std::fs::remove_file(dbref_path(pidfile));
    let _ = std::fs::remove_file(pidfile);
}

/// All pidfiles under `root`, found by a bounded directory walk. Symlinked
/// directories are not followed.
pub fn scan(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    scan_dir(root, 0, &mut out);
    out.sort();
    out
}

fn scan_dir(dir: &Path, depth: usize, out: &mut Vec<PathBuf>) {
    if depth > MAX_SCAN_DEPTH {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            scan_dir(&path, depth + 1, out);
            continue;
        }
        if !file_type.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if job_id_from_name(name).is_some() {
            out.push(path);
        }
    }
}
