#![forbid(unsafe_code)]

mod context;
mod error;
mod execute;
pub mod handlers;
mod registry;

pub use context::JobContext;
pub use error::WorkerError;
pub use execute::{RunOptions, run_claimed_job};
pub use handlers::builtin_registry;
pub use registry::{HandlerError, HandlerOutcome, HandlerRegistry, JobHandler};
