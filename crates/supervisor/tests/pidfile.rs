#![forbid(unsafe_code)]

use bt_supervisor::pidfile;
use std::path::PathBuf;

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("bt_pidfile_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

#[test]
fn write_read_remove_round_trip() {
    let dir = temp_dir("round_trip");
    let path = pidfile::write(&dir, "JOB-0007", 4242).expect("write pidfile");

    assert_eq!(
        path.file_name().and_then(|n| n.to_str()),
        Some("backtest_jobs.db.JOB-0007.pid")
    );
    assert_eq!(pidfile::read_pid(&path), Some(4242));

    let text = std::fs::read_to_string(&path).expect("read pidfile");
    assert_eq!(text, "4242\n");

    let dbref = pidfile::read_dbref(&path).expect("dbref resolves");
    assert_eq!(dbref, std::fs::canonicalize(&dir).expect("canonicalize"));

    pidfile::remove(&path);
    assert!(!path.exists());
    assert!(!pidfile::dbref_path(&path).exists());
}

#[test]
fn read_pid_rejects_garbage() {
    let dir = temp_dir("garbage");
    let path = dir.join("backtest_jobs.db.JOB-0001.pid");
    std::fs::write(&path, "not-a-pid\n").expect("write garbage");
    assert_eq!(pidfile::read_pid(&path), None);
    assert_eq!(pidfile::read_pid(&dir.join("missing.pid")), None);
}

#[test]
fn scan_finds_nested_pidfiles_only() {
    let root = temp_dir("scan");
    let nested = root.join("runs").join("alpha");
    std::fs::create_dir_all(&nested).expect("create nested dir");

    let top = pidfile::write(&root, "JOB-0001", 1).expect("write top pidfile");
    let deep = pidfile::write(&nested, "JOB-0002", 2).expect("write nested pidfile");
    std::fs::write(root.join("backtest_jobs.db"), b"").expect("decoy db file");
    std::fs::write(root.join("notes.pid"), b"3\n").expect("decoy pid file");

    let found = pidfile::scan(&root);
    assert_eq!(found.len(), 2);
    assert!(found.contains(&top));
    assert!(found.contains(&deep));
}
