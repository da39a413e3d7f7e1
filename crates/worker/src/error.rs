#![forbid(unsafe_code)]

use bt_core::state::JobState;

/// Infrastructure-level worker failures. Handler failures are not errors at
/// this level; they map to terminal job states inside `run_claimed_job`.
#[derive(Debug)]
pub enum WorkerError {
    Store(bt_storage::StoreError),
    UnknownJob {
        job_id: String,
    },
    /// The job never became RUNNING under this worker's id within the
    /// startup window.
    StartupTimeout {
        job_id: String,
    },
    /// The job is owned by a different worker (or reached a state this
    /// worker must not touch).
    NotOurs {
        job_id: String,
        state: JobState,
        owner: Option<String>,
    },
}

impl std::fmt::Display for WorkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "store: {err}"),
            Self::UnknownJob { job_id } => write!(f, "unknown job (job={job_id})"),
            Self::StartupTimeout { job_id } => {
                write!(f, "job never became RUNNING for this worker (job={job_id})")
            }
            Self::NotOurs {
                job_id,
                state,
                owner,
            } => write!(
                f,
                "job is not ours to run (job={job_id}, state={state}, owner={})",
                owner.as_deref().unwrap_or("-")
            ),
        }
    }
}

impl std::error::Error for WorkerError {}

impl From<bt_storage::StoreError> for WorkerError {
    fn from(value: bt_storage::StoreError) -> Self {
        Self::Store(value)
    }
}
