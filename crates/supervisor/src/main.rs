#![forbid(unsafe_code)]

use bt_supervisor::{Supervisor, SupervisorConfig};
use std::path::PathBuf;
use std::time::Duration;

fn usage() -> &'static str {
    "bt_supervisor — tick-driven scheduler for backtest jobs\n\n\
USAGE:\n\
  bt_supervisor [--storage-dir DIR] [--max-workers N]\n\
                [--heartbeat-timeout-ms MS] [--tick-ms MS]\n\
                [--worker-bin PATH] [--drain-grace-ms MS] [--once]\n\n\
NOTES:\n\
  - Each tick reaps exited workers, promotes stale-heartbeat jobs to\n\
    ORPHANED, then claims QUEUED jobs and spawns `bt_worker` processes up\n\
    to the concurrency limit. The tick never blocks on a worker.\n\
  - `--once` runs a single tick, drains in-flight workers, and exits\n\
    (smoke test).\n\
  - A sibling `bt_worker` next to this binary is auto-detected; use\n\
    `--worker-bin` / `BT_WORKER_BIN` to override.\n"
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn default_worker_bin() -> String {
    // Prefer a sibling `bt_worker` next to this binary so
    // `./target/debug/bt_supervisor` works without PATH or `--worker-bin`.
    if let Ok(exe) = std::env::current_exe()
        && let Some(dir) = exe.parent()
    {
        let sibling = dir.join("bt_worker");
        if sibling.exists() {
            return sibling.to_string_lossy().to_string();
        }
    }
    "bt_worker".to_string()
}

struct MainConfig {
    supervisor: SupervisorConfig,
    tick_ms: u64,
    once: bool,
}

fn parse_args() -> Result<MainConfig, String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        print!("{}", usage());
        std::process::exit(0);
    }

    let mut storage_dir: Option<PathBuf> = env_var("BT_STORAGE_DIR").map(PathBuf::from);
    let mut max_workers: usize = env_var("BT_MAX_WORKERS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(4);
    let mut heartbeat_timeout_ms: u64 = env_var("BT_HEARTBEAT_TIMEOUT_MS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(60_000);
    let mut tick_ms: u64 = env_var("BT_TICK_MS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(1_000);
    let mut drain_grace_ms: u64 = env_var("BT_DRAIN_GRACE_MS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(2_000);
    let mut worker_bin: Option<String> = env_var("BT_WORKER_BIN");
    let mut once = false;

    let mut i = 0usize;
    while i < args.len() {
        let a = args[i].as_str();
        match a {
            "--storage-dir" => {
                i += 1;
                let v = args.get(i).ok_or("--storage-dir requires DIR")?;
                storage_dir = Some(PathBuf::from(v));
            }
            "--max-workers" => {
                i += 1;
                let v = args.get(i).ok_or("--max-workers requires N")?;
                max_workers = v
                    .parse::<usize>()
                    .map_err(|_| "--max-workers must be an integer")?;
            }
            "--heartbeat-timeout-ms" => {
                i += 1;
                let v = args.get(i).ok_or("--heartbeat-timeout-ms requires MS")?;
                heartbeat_timeout_ms = v
                    .parse::<u64>()
                    .map_err(|_| "--heartbeat-timeout-ms must be an integer (milliseconds)")?;
            }
            "--tick-ms" => {
                i += 1;
                let v = args.get(i).ok_or("--tick-ms requires MS")?;
                tick_ms = v
                    .parse::<u64>()
                    .map_err(|_| "--tick-ms must be an integer (milliseconds)")?;
            }
            "--drain-grace-ms" => {
                i += 1;
                let v = args.get(i).ok_or("--drain-grace-ms requires MS")?;
                drain_grace_ms = v
                    .parse::<u64>()
                    .map_err(|_| "--drain-grace-ms must be an integer (milliseconds)")?;
            }
            "--worker-bin" => {
                i += 1;
                let v = args.get(i).ok_or("--worker-bin requires PATH")?;
                worker_bin = Some(v.to_string());
            }
            "--once" => once = true,
            other => return Err(format!("Unknown arg: {other}\n\n{}", usage())),
        }
        i += 1;
    }

    let storage_dir = storage_dir.ok_or("--storage-dir (or BT_STORAGE_DIR) is required")?;
    let worker_bin = worker_bin.unwrap_or_else(default_worker_bin);

    Ok(MainConfig {
        supervisor: SupervisorConfig {
            storage_dir,
            worker_bin,
            max_workers,
            heartbeat_timeout_ms,
            drain_grace_ms,
        },
        tick_ms,
        once,
    })
}

fn main() {
    let cfg = parse_args().unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(2);
    });
    let tick_ms = cfg.tick_ms;
    let once = cfg.once;

    let mut supervisor = Supervisor::open(cfg.supervisor).unwrap_or_else(|e| {
        eprintln!("bt_supervisor: {e}");
        std::process::exit(2);
    });

    loop {
        match supervisor.tick() {
            Ok(report) => {
                if !report.is_empty() {
                    eprintln!(
                        "bt_supervisor: tick exited={} orphaned={:?} spawned={:?} active={}",
                        report.exited,
                        report.orphaned,
                        report.spawned,
                        supervisor.active_workers()
                    );
                }
            }
            // A failed tick never stops the loop; the next tick retries.
            Err(err) => eprintln!("bt_supervisor: tick failed: {err}"),
        }
        if once {
            break;
        }
        std::thread::sleep(Duration::from_millis(tick_ms));
    }

    supervisor.drain(false);
}
