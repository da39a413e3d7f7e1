#![forbid(unsafe_code)]

use super::evidence::rfc3339_ms;
use super::jobs::{InsertJobTxArgs, insert_job_tx, normalize_job_type, normalize_tags};
use super::*;
use bt_core::state::JobState;
use rusqlite::{OptionalExtension, params};
use serde_json::Value as JsonValue;
use sha2::Digest as _;
use std::fmt::Write as _;

/// One versioned scheme for every content hash the platform emits
/// (admission fingerprints and evidence hashes alike).
pub const HASH_VERSION: &str = "sha256/v1";

const MAX_PARAMS_BYTES: usize = 64 * 1024;
const ALLOWED_TIMEFRAMES: &[&str] = &["1m", "5m", "15m", "30m", "1h", "4h", "1d"];

/// Deterministic fingerprint of a params payload: recursively key-sorted,
/// compactly encoded JSON hashed with SHA-256.
pub fn fingerprint_params(params: &JsonValue) -> Result<String, StoreError> {
    let canonical = canonical_params_json(params)?;
    Ok(fingerprint_canonical(&canonical))
}

pub(in crate::store) fn canonical_params_json(value: &JsonValue) -> Result<String, StoreError> {
    Ok(serde_json::to_string(&canonical_value(value))?)
}

fn canonical_value(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                if let Some(child) = map.get(key) {
                    sorted.insert(key.clone(), canonical_value(child));
                }
            }
            JsonValue::Object(sorted)
        }
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(canonical_value).collect()),
        other => other.clone(),
    }
}

pub(in crate::store) fn fingerprint_canonical(canonical: &str) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest {
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}

#[derive(Clone, Debug)]
struct PolicyCheck {
    rule: &'static str,
    passed: bool,
    detail: String,
}

fn policy_preflight(params: &JsonValue, canonical: &str) -> Vec<PolicyCheck> {
    let mut checks = Vec::new();

    let is_object = params.is_object();
    checks.push(PolicyCheck {
        rule: "params_is_object",
        passed: is_object,
        detail: if is_object {
            "params is a JSON object".to_string()
        } else {
            "params must be a JSON object".to_string()
        },
    });

    let within_limit = canonical.len() <= MAX_PARAMS_BYTES;
    checks.push(PolicyCheck {
        rule: "params_size_within_limit",
        passed: within_limit,
        detail: format!(
            "{} bytes (limit {})",
            canonical.len(),
            MAX_PARAMS_BYTES
        ),
    });

    let timeframe = params.get("timeframe");
    let (tf_passed, tf_detail) = match timeframe {
        None => (true, "timeframe not present".to_string()),
        Some(JsonValue::String(tf)) if ALLOWED_TIMEFRAMES.contains(&tf.as_str()) => {
            (true, format!("timeframe {tf} allowed"))
        }
        Some(JsonValue::String(tf)) => (
            false,
            format!(
                "timeframe {tf} is not one of {}",
                ALLOWED_TIMEFRAMES.join("|")
            ),
        ),
        Some(_) => (false, "timeframe must be a string".to_string()),
    };
    checks.push(PolicyCheck {
        rule: "timeframe_allowed",
        passed: tf_passed,
        detail: tf_detail,
    });

    let start = params.get("start_date");
    let end = params.get("end_date");
    let (range_passed, range_detail) = match (start, end) {
        (None, None) => (true, "date range not present".to_string()),
        (Some(JsonValue::String(start)), Some(JsonValue::String(end))) => {
            if start < end {
                (true, format!("{start} < {end}"))
            } else {
                (false, format!("start_date {start} is not before end_date {end}"))
            }
        }
        (Some(_), None) | (None, Some(_)) => (
            false,
            "start_date and end_date must be provided together".to_string(),
        ),
        _ => (false, "start_date and end_date must be strings".to_string()),
    };
    checks.push(PolicyCheck {
        rule: "date_range_valid",
        passed: range_passed,
        detail: range_detail,
    });

    checks
}

fn preflight_json(checks: &[PolicyCheck]) -> JsonValue {
    JsonValue::Array(
        checks
            .iter()
            .map(|check| {
                serde_json::json!({
                    "rule": check.rule,
                    "status": if check.passed { "pass" } else { "fail" },
                    "detail": check.detail,
                })
            })
            .collect(),
    )
}

impl SqliteStore {
    /// Gatekeeper for every external submission. Fingerprints the normalized
    /// params, runs the policy preflight, rejects duplicates, and inserts the
    /// job as QUEUED or REJECTED. The evidence bundle (manifest +
    /// policy_check + inputs_fingerprint) is fully written before the insert
    /// commits; an evidence failure aborts the whole admission.
    pub fn submit_with_admission(
        &mut self,
        request: SubmitRequest,
    ) -> Result<AdmissionOutcome, StoreError> {
        let job_type = normalize_job_type(&request.job_type)?;
        let tags = normalize_tags(request.tags)?;
        let canonical = canonical_params_json(&request.params)?;
        let fingerprint = fingerprint_canonical(&canonical);
        let checks = policy_preflight(&request.params, &canonical);
        let failed: Vec<&'static str> = checks
            .iter()
            .filter(|check| !check.passed)
            .map(|check| check.rule)
            .collect();

        let evidence = EvidenceWriter::new(self.storage_dir.join("evidence"));
        let now_ms = now_ms();
        let tx = self.conn.transaction()?;

        let reason = if failed.is_empty() {
            let duplicate: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM jobs WHERE fingerprint=?1 AND state <> 'REJECTED' LIMIT 1",
                    params![fingerprint.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            duplicate.map(|_| "duplicate fingerprint".to_string())
        } else {
            Some(format!("policy preflight failed: {}", failed.join(", ")))
        };

        let (state, verdict) = match reason {
            None => (JobState::Queued, AdmissionVerdict::Admit),
            Some(_) => (JobState::Rejected, AdmissionVerdict::Reject),
        };

        let job_id = insert_job_tx(
            &tx,
            now_ms,
            InsertJobTxArgs {
                job_type,
                params_json: canonical,
                fingerprint: fingerprint.clone(),
                state,
                tags,
            },
        )?;

        let manifest = serde_json::json!({
            "job_id": job_id,
            "state": state.as_str(),
            "fingerprint": fingerprint,
            "created_at": rfc3339_ms(now_ms),
            "created_at_ms": now_ms,
        });
        let policy_check = serde_json::json!({
            "preflight": preflight_json(&checks),
            "overall_status": verdict.as_str(),
            "final_reason": reason.as_deref(),
        });
        let inputs_fingerprint = serde_json::json!({
            "params_hash": fingerprint,
            "hash_version": HASH_VERSION,
        });

        let written = evidence
            .write_json(&job_id, "manifest.json", &manifest)
            .and_then(|_| evidence.write_json(&job_id, "policy_check.json", &policy_check))
            .and_then(|_| {
                evidence.write_json(&job_id, "inputs_fingerprint.json", &inputs_fingerprint)
            });
        if let Err(err) = written {
            // The insert has not committed; drop the partial bundle so a
            // retried submission starts clean.
            evidence.discard_bundle(&job_id);
            return Err(err);
        }

        tx.commit()?;

        Ok(AdmissionOutcome {
            evidence_dir: evidence.bundle_dir(&job_id),
            job_id,
            state,
            fingerprint,
            verdict,
            reason,
        })
    }
}
