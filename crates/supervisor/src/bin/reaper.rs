#![forbid(unsafe_code)]

use bt_supervisor::{ReaperConfig, SystemProcesses, run_reaper};
use std::path::PathBuf;
use std::time::Duration;

fn usage() -> &'static str {
    "bt_reaper — reap stray and stale backtest worker processes\n\n\
USAGE:\n\
  bt_reaper [--root DIR] [--grace-ms MS] [--dry-run]\n\n\
NOTES:\n\
  - Scans DIR for worker pidfiles and, independently, for live processes\n\
    that look like workers but have no pidfile (strays).\n\
  - Dead or recycled PIDs get their pidfile deleted without any signal;\n\
    stale-but-alive workers and strays get SIGTERM, then SIGKILL after the\n\
    grace period.\n\
  - `--dry-run` prints planned actions without deleting or signaling.\n\
  - Best-effort diagnostic tool: failures are reported, the exit code is\n\
    always 0.\n"
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_args() -> Result<ReaperConfig, String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        print!("{}", usage());
        std::process::exit(0);
    }

    let mut root: Option<PathBuf> = env_var("BT_ROOT").map(PathBuf::from);
    let mut grace_ms: u64 = env_var("BT_REAP_GRACE_MS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(2_000);
    let mut dry_run = false;

    let mut i = 0usize;
    while i < args.len() {
        let a = args[i].as_str();
        match a {
            "--root" => {
                i += 1;
                let v = args.get(i).ok_or("--root requires DIR")?;
                root = Some(PathBuf::from(v));
            }
            "--grace-ms" => {
                i += 1;
                let v = args.get(i).ok_or("--grace-ms requires MS")?;
                grace_ms = v
                    .parse::<u64>()
                    .map_err(|_| "--grace-ms must be an integer (milliseconds)")?;
            }
            "--dry-run" => dry_run = true,
            other => return Err(format!("Unknown arg: {other}\n\n{}", usage())),
        }
        i += 1;
    }

    Ok(ReaperConfig {
        root: root.unwrap_or_else(|| PathBuf::from(".")),
        dry_run,
        grace: Duration::from_millis(grace_ms),
    })
}

fn main() {
    // Best-effort diagnostic tool: every path out of here exits 0.
    let cfg = match parse_args() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("bt_reaper: {err}");
            return;
        }
    };

    let report = run_reaper(&cfg, &SystemProcesses);
    if report.actions.is_empty() {
        println!("bt_reaper: nothing to do under {}", cfg.root.display());
        return;
    }
    let prefix = if cfg.dry_run { "[dry-run] " } else { "" };
    for action in &report.actions {
        println!("bt_reaper: {prefix}{action}");
    }
}
