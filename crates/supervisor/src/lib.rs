#![forbid(unsafe_code)]

mod error;
pub mod liveness;
pub mod pidfile;
mod reap;
mod scheduler;

pub use error::SupervisorError;
pub use liveness::{ProcessTable, SystemProcesses, WORKER_CMD_NAME, kill_with_grace};
pub use reap::{ReapAction, ReapReport, ReaperConfig, run_reaper};
pub use scheduler::{Supervisor, SupervisorConfig, TickReport};
