#![forbid(unsafe_code)]

pub mod ids {
    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    pub struct JobId(String);

    impl JobId {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, JobIdError> {
            let value = value.into();
            validate_job_id(&value)?;
            Ok(Self(value))
        }
    }

    impl std::fmt::Display for JobId {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum JobIdError {
        Empty,
        MissingPrefix,
        TooShort,
        InvalidDigit { ch: char, index: usize },
    }

    fn validate_job_id(value: &str) -> Result<(), JobIdError> {
        if value.is_empty() {
            return Err(JobIdError::Empty);
        }
        let Some(digits) = value.strip_prefix("JOB-") else {
            return Err(JobIdError::MissingPrefix);
        };
        if digits.len() < 4 {
            return Err(JobIdError::TooShort);
        }
        for (index, ch) in digits.chars().enumerate() {
            if !ch.is_ascii_digit() {
                return Err(JobIdError::InvalidDigit { ch, index });
            }
        }
        Ok(())
    }

    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    pub struct WorkerId(String);

    impl WorkerId {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, WorkerIdError> {
            let value = value.into();
            validate_worker_id(&value)?;
            Ok(Self(value))
        }
    }

    impl std::fmt::Display for WorkerId {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum WorkerIdError {
        Empty,
        TooLong,
        InvalidChar { ch: char, index: usize },
    }

    fn validate_worker_id(value: &str) -> Result<(), WorkerIdError> {
        if value.is_empty() {
            return Err(WorkerIdError::Empty);
        }
        if value.len() > 128 {
            return Err(WorkerIdError::TooLong);
        }
        for (index, ch) in value.chars().enumerate() {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-' | ':') {
                continue;
            }
            return Err(WorkerIdError::InvalidChar { ch, index });
        }
        Ok(())
    }
}

pub mod state {
    /// Job lifecycle states. QUEUED and RUNNING are the only live states;
    /// everything else is terminal and permanent.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub enum JobState {
        Queued,
        Running,
        Succeeded,
        Failed,
        Aborted,
        Orphaned,
        Rejected,
        Killed,
    }

    impl JobState {
        pub fn as_str(self) -> &'static str {
            match self {
                JobState::Queued => "QUEUED",
                JobState::Running => "RUNNING",
                JobState::Succeeded => "SUCCEEDED",
                JobState::Failed => "FAILED",
                JobState::Aborted => "ABORTED",
                JobState::Orphaned => "ORPHANED",
                JobState::Rejected => "REJECTED",
                JobState::Killed => "KILLED",
            }
        }

        pub fn parse(value: &str) -> Option<Self> {
            match value {
                "QUEUED" => Some(JobState::Queued),
                "RUNNING" => Some(JobState::Running),
                "SUCCEEDED" => Some(JobState::Succeeded),
                "FAILED" => Some(JobState::Failed),
                "ABORTED" => Some(JobState::Aborted),
                "ORPHANED" => Some(JobState::Orphaned),
                "REJECTED" => Some(JobState::Rejected),
                "KILLED" => Some(JobState::Killed),
                _ => None,
            }
        }

        pub fn is_terminal(self) -> bool {
            !matches!(self, JobState::Queued | JobState::Running)
        }

        /// The full edge set of the lifecycle. Any transition not listed here
        /// is illegal and must be refused by the store.
        pub fn can_transition_to(self, next: JobState) -> bool {
            matches!(
                (self, next),
                (JobState::Queued, JobState::Running)
                    | (JobState::Queued, JobState::Killed)
                    | (JobState::Running, JobState::Succeeded)
                    | (JobState::Running, JobState::Failed)
                    | (JobState::Running, JobState::Aborted)
                    | (JobState::Running, JobState::Orphaned)
            )
        }
    }

    impl std::fmt::Display for JobState {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.as_str())
        }
    }
}

pub mod errors {
    /// Job-level failure taxonomy. Each kind maps to exactly one terminal
    /// handling path in the worker or supervisor; none of them is fatal
    /// beyond the job it belongs to.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum ErrorKind {
        Validation,
        UnknownHandler,
        Execution,
        HeartbeatTimeout,
        AbortRequested,
    }

    impl ErrorKind {
        pub fn as_str(self) -> &'static str {
            match self {
                ErrorKind::Validation => "ValidationError",
                ErrorKind::UnknownHandler => "UnknownHandler",
                ErrorKind::Execution => "ExecutionError",
                ErrorKind::HeartbeatTimeout => "HeartbeatTimeout",
                ErrorKind::AbortRequested => "AbortRequested",
            }
        }

        pub fn parse(value: &str) -> Option<Self> {
            match value {
                "ValidationError" => Some(ErrorKind::Validation),
                "UnknownHandler" => Some(ErrorKind::UnknownHandler),
                "ExecutionError" => Some(ErrorKind::Execution),
                "HeartbeatTimeout" => Some(ErrorKind::HeartbeatTimeout),
                "AbortRequested" => Some(ErrorKind::AbortRequested),
                _ => None,
            }
        }
    }

    impl std::fmt::Display for ErrorKind {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.as_str())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::errors::ErrorKind;
    use super::ids::{JobId, JobIdError, WorkerId};
    use super::state::JobState;

    #[test]
    fn job_id_accepts_counter_format() {
        let id = JobId::try_new("JOB-0001").expect("valid id");
        assert_eq!(id.as_str(), "JOB-0001");
    }

    #[test]
    fn job_id_rejects_bad_shapes() {
        assert_eq!(JobId::try_new(""), Err(JobIdError::Empty));
        assert_eq!(JobId::try_new("JOB0001"), Err(JobIdError::MissingPrefix));
        assert_eq!(JobId::try_new("JOB-01"), Err(JobIdError::TooShort));
        assert!(matches!(
            JobId::try_new("JOB-00a1"),
            Err(JobIdError::InvalidDigit { ch: 'a', .. })
        ));
    }

    #[test]
    fn worker_id_allows_pid_suffix() {
        let id = WorkerId::try_new("bt_worker:4242").expect("valid id");
        assert_eq!(id.as_str(), "bt_worker:4242");
        assert!(WorkerId::try_new("has space").is_err());
    }

    #[test]
    fn state_roundtrip() {
        for state in [
            JobState::Queued,
            JobState::Running,
            JobState::Succeeded,
            JobState::Failed,
            JobState::Aborted,
            JobState::Orphaned,
            JobState::Rejected,
            JobState::Killed,
        ] {
            assert_eq!(JobState::parse(state.as_str()), Some(state));
        }
        assert_eq!(JobState::parse("DONE"), None);
    }

    #[test]
    fn terminal_set_is_everything_but_queued_and_running() {
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Running.is_terminal());
        for state in [
            JobState::Succeeded,
            JobState::Failed,
            JobState::Aborted,
            JobState::Orphaned,
            JobState::Rejected,
            JobState::Killed,
        ] {
            assert!(state.is_terminal(), "{state} should be terminal");
        }
    }

    #[test]
    fn only_declared_edges_are_legal() {
        assert!(JobState::Queued.can_transition_to(JobState::Running));
        assert!(JobState::Queued.can_transition_to(JobState::Killed));
        assert!(JobState::Running.can_transition_to(JobState::Succeeded));
        assert!(JobState::Running.can_transition_to(JobState::Failed));
        assert!(JobState::Running.can_transition_to(JobState::Aborted));
        assert!(JobState::Running.can_transition_to(JobState::Orphaned));

        assert!(!JobState::Queued.can_transition_to(JobState::Succeeded));
        assert!(!JobState::Running.can_transition_to(JobState::Killed));
        assert!(!JobState::Running.can_transition_to(JobState::Queued));
        assert!(!JobState::Rejected.can_transition_to(JobState::Queued));
        for terminal in [
            JobState::Succeeded,
            JobState::Failed,
            JobState::Aborted,
            JobState::Orphaned,
            JobState::Rejected,
            JobState::Killed,
        ] {
            for next in [JobState::Queued, JobState::Running, JobState::Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn error_kind_roundtrip() {
        for kind in [
            ErrorKind::Validation,
            ErrorKind::UnknownHandler,
            ErrorKind::Execution,
            ErrorKind::HeartbeatTimeout,
            ErrorKind::AbortRequested,
        ] {
            assert_eq!(ErrorKind::parse(kind.as_str()), Some(kind));
        }
    }
}
