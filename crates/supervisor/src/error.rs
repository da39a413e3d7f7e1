#![forbid(unsafe_code)]

#[derive(Debug)]
pub enum SupervisorError {
    Io(std::io::Error),
    Store(bt_storage::StoreError),
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Store(err) => write!(f, "store: {err}"),
        }
    }
}

impl std::error::Error for SupervisorError {}

impl From<std::io::Error> for SupervisorError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<bt_storage::StoreError> for SupervisorError {
    fn from(value: bt_storage::StoreError) -> Self {
        Self::Store(value)
    }
}
