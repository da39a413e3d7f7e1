#![forbid(unsafe_code)]

use bt_storage::{EvidenceWriter, StoreError};
use serde_json::json;
use std::path::PathBuf;

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("bt_evidence_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

#[test]
fn write_is_atomic_and_readable() {
    let writer = EvidenceWriter::new(temp_dir("atomic_readable"));
    let path = writer
        .write_json("JOB-0001", "manifest.json", &json!({ "state": "QUEUED" }))
        .expect("write manifest");

    assert_eq!(path, writer.bundle_dir("JOB-0001").join("manifest.json"));
    let raw = std::fs::read_to_string(&path).expect("read back");
    assert!(raw.ends_with('\n'));
    let parsed: serde_json::Value = serde_json::from_str(&raw).expect("parse");
    assert_eq!(parsed.get("state"), Some(&json!("QUEUED")));

    // No temp droppings left behind.
    let leftovers: Vec<_> = std::fs::read_dir(writer.bundle_dir("JOB-0001"))
        .expect("read bundle dir")
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().contains("tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn identical_rewrite_is_a_noop() {
    let writer = EvidenceWriter::new(temp_dir("identical_rewrite"));
    let value = json!({ "job_id": "JOB-0001", "state": "QUEUED" });

    let path = writer
        .write_json("JOB-0001", "manifest.json", &value)
        .expect("first write");
    let mtime_before = std::fs::metadata(&path)
        .expect("metadata")
        .modified()
        .expect("mtime");
    let hash_before = writer
        .content_hash("JOB-0001", "manifest.json")
        .expect("hash")
        .expect("file exists");

    std::thread::sleep(std::time::Duration::from_millis(20));
    writer
        .write_json("JOB-0001", "manifest.json", &value)
        .expect("identical rewrite");

    let mtime_after = std::fs::metadata(&path)
        .expect("metadata")
        .modified()
        .expect("mtime");
    let hash_after = writer
        .content_hash("JOB-0001", "manifest.json")
        .expect("hash")
        .expect("file exists");
    assert_eq!(mtime_before, mtime_after, "identical rewrite must not touch the file");
    assert_eq!(hash_before, hash_after);
}

#[test]
fn divergent_rewrite_is_refused() {
    let writer = EvidenceWriter::new(temp_dir("divergent_rewrite"));
    writer
        .write_json("JOB-0001", "manifest.json", &json!({ "state": "QUEUED" }))
        .expect("first write");

    let err = writer
        .write_json("JOB-0001", "manifest.json", &json!({ "state": "RUNNING" }))
        .expect_err("divergent rewrite must fail");
    assert!(matches!(err, StoreError::EvidenceConflict { .. }));

    // The original content survives untouched.
    let raw = std::fs::read_to_string(writer.bundle_dir("JOB-0001").join("manifest.json"))
        .expect("read back");
    let parsed: serde_json::Value = serde_json::from_str(&raw).expect("parse");
    assert_eq!(parsed.get("state"), Some(&json!("QUEUED")));
}

#[test]
fn distinct_names_coexist_in_one_bundle() {
    let writer = EvidenceWriter::new(temp_dir("distinct_names"));
    writer
        .write_json("JOB-0002", "manifest.json", &json!({ "state": "QUEUED" }))
        .expect("admission manifest");
    writer
        .write_json(
            "JOB-0002",
            "manifest.final.json",
            &json!({ "state": "SUCCEEDED" }),
        )
        .expect("final manifest");

    assert!(writer.bundle_dir("JOB-0002").join("manifest.json").exists());
    assert!(
        writer
            .bundle_dir("JOB-0002")
            .join("manifest.final.json")
            .exists()
    );
}

#[test]
fn artifact_names_must_be_bare_file_names() {
    let writer = EvidenceWriter::new(temp_dir("bare_names"));
    for bad in ["", "../escape.json", "nested/file.json", ".hidden"] {
        let err = writer
            .write_json("JOB-0003", bad, &json!({}))
            .expect_err("bad artifact name");
        assert!(matches!(err, StoreError::InvalidInput(_)), "name: {bad:?}");
    }
}
