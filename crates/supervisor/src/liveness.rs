#![forbid(unsafe_code)]

//! Cross-process liveness checks. `ProcessTable` abstracts live-process state
//! (existence, command line, signals) so the reaper stays testable without
//! spawning anything; `SystemProcesses` is the real implementation backed by
//! signal-0 probes and `/proc`.

use std::path::Path;
use std::time::{Duration, Instant};

/// File name of the worker entry point; a process belongs to the worker fleet
/// iff its argv[0] resolves to this name.
pub const WORKER_CMD_NAME: &str = "bt_worker";

pub trait ProcessTable {
    fn is_alive(&self, pid: u32) -> bool;
    /// The process argv, None when it cannot be read.
    fn cmdline(&self, pid: u32) -> Option<Vec<String>>;
    fn terminate(&self, pid: u32);
    fn force_kill(&self, pid: u32);
    /// PIDs of all live processes whose command line matches the worker
    /// entry point.
    fn worker_pids(&self) -> Vec<u32>;
}

pub fn is_worker_cmdline(argv: &[String]) -> bool {
    let Some(argv0) = argv.first() else {
        return false;
    };
    let name = Path::new(argv0)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(argv0.as_str());
    name == WORKER_CMD_NAME
}

/// SIGTERM, then SIGKILL once the grace period runs out. Returns true when
/// the forced kill was needed.
pub fn kill_with_grace(table: &dyn ProcessTable, pid: u32, grace: Duration) -> bool {
    table.terminate(pid);
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !table.is_alive(pid) {
            return false;
        }
        std::thread::sleep(Duration::from_millis(40));
    }
    if table.is_alive(pid) {
        table.force_kill(pid);
        return true;
    }
    false
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemProcesses;

impl ProcessTable for SystemProcesses {
    fn is_alive(&self, pid: u32) -> bool {
        signal_alive(pid)
    }

    fn cmdline(&self, pid: u32) -> Option<Vec<String>> {
        read_cmdline(pid)
    }

    fn terminate(&self, pid: u32) {
        send_terminate(pid);
    }

    fn force_kill(&self, pid: u32) {
        send_force_kill(pid);
    }

    fn worker_pids(&self) -> Vec<u32> {
        scan_worker_pids()
    }
}

#[cfg(unix)]
pub(crate) fn signal_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    // kill(pid, 0) checks existence without delivering a signal.
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
pub(crate) fn signal_alive(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
pub(crate) fn send_terminate(pid: u32) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
}

#[cfg(not(unix))]
pub(crate) fn send_terminate(_pid: u32) {}

#[cfg(unix)]
pub(crate) fn send_force_kill(pid: u32) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
}

#[cfg(not(unix))]
pub(crate) fn send_force_kill(_pid: u32) {}

#[cfg(target_os = "linux")]
fn read_cmdline(pid: u32) -> Option<Vec<String>> {
    let raw = std::fs::read(format!("/proc/{pid}/cmdline")).ok()?;
    let argv: Vec<String> = raw
        .split(|b| *b == 0)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part).to_string())
        .collect();
    if argv.is_empty() { None } else { Some(argv) }
}

#[cfg(not(target_os = "linux"))]
fn read_cmdline(_pid: u32) -> Option<Vec<String>> {
    None
}

#[cfg(target_os = "linux")]
fn scan_worker_pids() -> Vec<u32> {
    let Ok(proc_dir) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for entry in proc_dir.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.is_empty() || !name.chars().all(|ch| ch.is_ascii_digit()) {
            continue;
        }
        let Ok(pid) = name.parse::<u32>() else {
            continue;
        };
        if let Some(argv) = read_cmdline(pid)
            && is_worker_cmdline(&argv)
        {
            out.push(pid);
        }
    }
    out.sort_unstable();
    out
}

#[cfg(not(target_os = "linux"))]
fn scan_worker_pids() -> Vec<u32> {
    Vec::new()
}
