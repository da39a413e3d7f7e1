#![forbid(unsafe_code)]

use bt_storage::SqliteStore;
use bt_worker::{RunOptions, builtin_registry, run_claimed_job};
use std::path::PathBuf;

fn usage() -> &'static str {
    "bt_worker — execute one claimed backtest job to a terminal state\n\n\
USAGE:\n\
  bt_worker --storage-dir DIR --job-id JOB-0001 [--worker-id ID]\n\n\
NOTES:\n\
  - Spawned by bt_supervisor, one process per claimed job. Waits briefly\n\
    for the job to become RUNNING under its worker id, then resolves the\n\
    handler, validates params, executes, and records the terminal state.\n\
  - Exits 0 once a terminal state is durably recorded; exits 1 on an\n\
    infrastructure failure (the job is then recovered by the orphan scan\n\
    or the reaper).\n"
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

struct WorkerConfig {
    storage_dir: PathBuf,
    job_id: String,
    worker_id: String,
}

fn parse_args() -> Result<WorkerConfig, String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        print!("{}", usage());
        std::process::exit(0);
    }

    let mut storage_dir: Option<PathBuf> = env_var("BT_STORAGE_DIR").map(PathBuf::from);
    let mut job_id: Option<String> = env_var("BT_JOB_ID");
    let mut worker_id: Option<String> = env_var("BT_WORKER_ID");

    let mut i = 0usize;
    while i < args.len() {
        let a = args[i].as_str();
        match a {
            "--storage-dir" => {
                i += 1;
                let v = args.get(i).ok_or("--storage-dir requires DIR")?;
                storage_dir = Some(PathBuf::from(v));
            }
            "--job-id" => {
                i += 1;
                let v = args.get(i).ok_or("--job-id requires JOB-ID")?;
                job_id = Some(v.to_string());
            }
            "--worker-id" => {
                i += 1;
                let v = args.get(i).ok_or("--worker-id requires ID")?;
                worker_id = Some(v.to_string());
            }
            other => return Err(format!("Unknown arg: {other}\n\n{}", usage())),
        }
        i += 1;
    }

    let storage_dir = storage_dir.ok_or("--storage-dir (or BT_STORAGE_DIR) is required")?;
    let job_id = job_id.ok_or("--job-id (or BT_JOB_ID) is required")?;
    let worker_id = worker_id.unwrap_or_else(|| format!("bt_worker:{}", std::process::id()));

    Ok(WorkerConfig {
        storage_dir,
        job_id,
        worker_id,
    })
}

fn main() {
    let cfg = parse_args().unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(2);
    });

    let mut store = SqliteStore::open(&cfg.storage_dir).unwrap_or_else(|e| {
        eprintln!("bt_worker: {e}");
        std::process::exit(2);
    });

    let registry = builtin_registry();
    match run_claimed_job(
        &mut store,
        &registry,
        &cfg.job_id,
        &cfg.worker_id,
        &RunOptions::default(),
    ) {
        Ok(state) => {
            eprintln!("bt_worker: {} finished {state}", cfg.job_id);
        }
        Err(err) => {
            eprintln!("bt_worker: {}: {err}", cfg.job_id);
            std::process::exit(1);
        }
    }
}
