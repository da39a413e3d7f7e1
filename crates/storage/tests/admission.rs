#![forbid(unsafe_code)]

use bt_core::state::JobState;
use bt_storage::{
    AdmissionVerdict, HASH_VERSION, SqliteStore, SubmitRequest, fingerprint_params,
};
use serde_json::{Value, json};
use std::path::PathBuf;

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("bt_storage_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn setup(test_name: &str) -> SqliteStore {
    SqliteStore::open(temp_dir(test_name)).expect("open store")
}

fn read_json(path: &std::path::Path) -> Value {
    let raw = std::fs::read_to_string(path).expect("read evidence file");
    serde_json::from_str(&raw).expect("parse evidence file")
}

#[test]
fn fingerprint_ignores_key_order() {
    let a = json!({ "symbol": "BTCUSD", "timeframe": "1h", "fast": 12, "slow": 26 });
    let b = json!({ "slow": 26, "fast": 12, "timeframe": "1h", "symbol": "BTCUSD" });
    let fa = fingerprint_params(&a).expect("fingerprint a");
    let fb = fingerprint_params(&b).expect("fingerprint b");
    assert_eq!(fa, fb);
    assert_eq!(fa.len(), 64);

    let c = json!({ "symbol": "ETHUSD", "timeframe": "1h", "fast": 12, "slow": 26 });
    assert_ne!(fa, fingerprint_params(&c).expect("fingerprint c"));
}

#[test]
fn duplicate_submission_yields_one_queued_one_rejected() {
    let mut store = setup("duplicate_submission");

    let first = store
        .submit_with_admission(SubmitRequest {
            job_type: "BACKTEST".to_string(),
            params: json!({ "symbol": "BTCUSD", "timeframe": "1h" }),
            tags: Vec::new(),
        })
        .expect("first admission");
    assert_eq!(first.verdict, AdmissionVerdict::Admit);
    assert_eq!(first.state, JobState::Queued);
    assert!(first.reason.is_none());

    // Same normalized params, different key order.
    let second = store
        .submit_with_admission(SubmitRequest {
            job_type: "BACKTEST".to_string(),
            params: json!({ "timeframe": "1h", "symbol": "BTCUSD" }),
            tags: Vec::new(),
        })
        .expect("second admission");
    assert_eq!(second.verdict, AdmissionVerdict::Reject);
    assert_eq!(second.state, JobState::Rejected);
    assert_eq!(second.reason.as_deref(), Some("duplicate fingerprint"));
    assert_eq!(second.fingerprint, first.fingerprint);

    // Exactly one job is claimable, and it is the admitted one.
    let claimed = store.claim_next_queued().expect("claim").expect("job");
    assert_eq!(claimed.id, first.job_id);
    assert!(store.claim_next_queued().expect("claim").is_none());
}

#[test]
fn rejected_job_is_terminal_and_never_claimed() {
    let mut store = setup("rejected_is_terminal");

    let outcome = store
        .submit_with_admission(SubmitRequest {
            job_type: "BACKTEST".to_string(),
            params: json!({ "timeframe": "7m" }),
            tags: Vec::new(),
        })
        .expect("admission");
    assert_eq!(outcome.state, JobState::Rejected);

    assert!(store.claim_next_queued().expect("claim").is_none());

    let err = store
        .mark_running(&outcome.job_id, "bt_worker:1", 1)
        .expect_err("rejected job must refuse transitions");
    assert!(
        format!("{err}").contains("Cannot transition from terminal status"),
        "error: {err}"
    );
}

#[test]
fn policy_rejection_names_failing_checks() {
    let mut store = setup("policy_rejection");

    let outcome = store
        .submit_with_admission(SubmitRequest {
            job_type: "BACKTEST".to_string(),
            params: json!({
                "timeframe": "7m",
                "start_date": "2025-06-01",
                "end_date": "2025-01-01",
            }),
            tags: Vec::new(),
        })
        .expect("admission");
    assert_eq!(outcome.verdict, AdmissionVerdict::Reject);
    let reason = outcome.reason.as_deref().expect("rejection reason");
    assert!(reason.contains("policy preflight failed"), "reason: {reason}");
    assert!(reason.contains("timeframe_allowed"), "reason: {reason}");
    assert!(reason.contains("date_range_valid"), "reason: {reason}");

    let policy = read_json(&outcome.evidence_dir.join("policy_check.json"));
    assert_eq!(policy.get("overall_status"), Some(&json!("REJECT")));
    assert_eq!(
        policy.get("final_reason").and_then(|r| r.as_str()),
        Some(reason)
    );
    let preflight = policy
        .get("preflight")
        .and_then(|p| p.as_array())
        .expect("preflight trace");
    let failed: Vec<&str> = preflight
        .iter()
        .filter(|check| check.get("status") == Some(&json!("fail")))
        .filter_map(|check| check.get("rule").and_then(|r| r.as_str()))
        .collect();
    assert_eq!(failed, vec!["timeframe_allowed", "date_range_valid"]);
}

#[test]
fn admission_writes_complete_evidence_bundle() {
    let mut store = setup("evidence_bundle");

    let outcome = store
        .submit_with_admission(SubmitRequest {
            job_type: "BACKTEST".to_string(),
            params: json!({ "symbol": "BTCUSD", "timeframe": "4h" }),
            tags: vec!["research".to_string()],
        })
        .expect("admission");
    assert_eq!(outcome.verdict, AdmissionVerdict::Admit);

    let manifest = read_json(&outcome.evidence_dir.join("manifest.json"));
    assert_eq!(
        manifest.get("job_id").and_then(|v| v.as_str()),
        Some(outcome.job_id.as_str())
    );
    assert_eq!(manifest.get("state"), Some(&json!("QUEUED")));
    assert_eq!(
        manifest.get("fingerprint").and_then(|v| v.as_str()),
        Some(outcome.fingerprint.as_str())
    );
    assert!(manifest.get("created_at").and_then(|v| v.as_str()).is_some());

    let policy = read_json(&outcome.evidence_dir.join("policy_check.json"));
    assert_eq!(policy.get("overall_status"), Some(&json!("ADMIT")));
    assert_eq!(policy.get("final_reason"), Some(&Value::Null));

    let inputs = read_json(&outcome.evidence_dir.join("inputs_fingerprint.json"));
    assert_eq!(
        inputs.get("params_hash").and_then(|v| v.as_str()),
        Some(outcome.fingerprint.as_str())
    );
    assert_eq!(inputs.get("hash_version"), Some(&json!(HASH_VERSION)));
}

#[test]
fn rejected_fingerprints_do_not_block_later_admissions() {
    let mut store = setup("rejected_does_not_block");

    // Two policy rejections share a fingerprint; both insert fine.
    for _ in 0..2 {
        let outcome = store
            .submit_with_admission(SubmitRequest {
                job_type: "BACKTEST".to_string(),
                params: json!({ "timeframe": "9h" }),
                tags: Vec::new(),
            })
            .expect("admission");
        assert_eq!(outcome.state, JobState::Rejected);
        let reason = outcome.reason.as_deref().expect("reason");
        assert!(
            reason.contains("policy preflight failed"),
            "a REJECTED twin must not shadow the policy verdict: {reason}"
        );
    }
}
