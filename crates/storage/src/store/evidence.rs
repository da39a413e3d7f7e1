#![forbid(unsafe_code)]

use super::StoreError;
use serde_json::Value as JsonValue;
use sha2::Digest as _;
use std::fmt::Write as _;
use std::io::Read as _;
use std::path::{Path, PathBuf};

/// Append-only audit artifact writer shared by the admission controller and
/// the worker execution unit. Every file is written atomically (temp file +
/// rename) and is write-once: rewriting identical content is a no-op that
/// leaves the file untouched, rewriting different content is refused.
#[derive(Clone, Debug)]
pub struct EvidenceWriter {
    root: PathBuf,
}

impl EvidenceWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bundle_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }

    pub fn write_json(
        &self,
        job_id: &str,
        name: &str,
        value: &JsonValue,
    ) -> Result<PathBuf, StoreError> {
        validate_artifact_name(name)?;
        let mut bytes = serde_json::to_vec_pretty(value)?;
        bytes.push(b'\n');

        let path = self.bundle_dir(job_id).join(name);
        self.write_once(&path, &bytes)?;
        Ok(path)
    }

    fn write_once(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        if path.exists() {
            let existing = std::fs::read(path)?;
            if existing == bytes {
                return Ok(());
            }
            return Err(StoreError::EvidenceConflict {
                path: path.to_path_buf(),
            });
        }

        let Some(parent) = path.parent() else {
            return Err(StoreError::InvalidInput("evidence path has no parent"));
        };
        std::fs::create_dir_all(parent)?;

        // Temp-then-rename keeps readers from ever observing a torn file.
        let tmp = parent.join(format!(
            ".{}.tmp-{}",
            path.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "artifact".to_string()),
            std::process::id()
        ));
        std::fs::write(&tmp, bytes)?;
        match std::fs::rename(&tmp, path) {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = std::fs::remove_file(&tmp);
                Err(StoreError::Io(err))
            }
        }
    }

    pub fn content_hash(&self, job_id: &str, name: &str) -> Result<Option<String>, StoreError> {
        validate_artifact_name(name)?;
        let path = self.bundle_dir(job_id).join(name);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(sha256_file_hex(&path)?))
    }

    /// Best-effort removal of an incomplete bundle (failed admission only;
    /// committed bundles are never deleted).
    pub fn discard_bundle(&self, job_id: &str) {
        let _ = std::fs::remove_dir_all(self.bundle_dir(job_id));
    }
}

fn validate_artifact_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() {
        return Err(StoreError::InvalidInput("artifact name must not be empty"));
    }
    if name.contains('/') || name.contains('\\') || name.starts_with('.') {
        return Err(StoreError::InvalidInput(
            "artifact name must be a bare file name",
        ));
    }
    Ok(())
}

fn sha256_file_hex(path: &Path) -> Result<String, std::io::Error> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    let mut hasher = sha2::Sha256::new();

    let mut buf = [0u8; 16 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest {
        let _ = write!(&mut out, "{b:02x}");
    }
    Ok(out)
}

pub fn rfc3339_ms(ms: i64) -> String {
    use time::OffsetDateTime;
    use time::format_description::well_known::Rfc3339;

    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_else(|| ms.to_string())
}
