#![forbid(unsafe_code)]

use bt_core::state::JobState;

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    Json(serde_json::Error),
    InvalidInput(&'static str),
    UnknownJob {
        job_id: String,
    },
    TerminalTransition {
        job_id: String,
        state: JobState,
    },
    IllegalTransition {
        job_id: String,
        from: JobState,
        to: JobState,
    },
    NotRunning {
        job_id: String,
        state: JobState,
    },
    EvidenceConflict {
        path: std::path::PathBuf,
    },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::Json(err) => write!(f, "json: {err}"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::UnknownJob { job_id } => write!(f, "unknown job (job={job_id})"),
            Self::TerminalTransition { job_id, state } => write!(
                f,
                "Cannot transition from terminal status (job={job_id}, state={state})"
            ),
            Self::IllegalTransition { job_id, from, to } => {
                write!(f, "illegal transition (job={job_id}, {from} -> {to})")
            }
            Self::NotRunning { job_id, state } => {
                write!(f, "job is not running (job={job_id}, state={state})")
            }
            Self::EvidenceConflict { path } => write!(
                f,
                "evidence conflict: refusing to overwrite {} with different content",
                path.display()
            ),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
