#![forbid(unsafe_code)]

use crate::context::JobContext;
use bt_core::errors::ErrorKind;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// What a handler hands back on success: a result payload, or the admission
/// that it observed an abort request and unwound cooperatively.
#[derive(Clone, Debug)]
pub enum HandlerOutcome {
    Completed(JsonValue),
    Aborted,
}

/// Typed handler failure. The worker maps the kind onto a terminal job state
/// instead of letting errors propagate unchecked.
#[derive(Clone, Debug)]
pub struct HandlerError {
    pub kind: ErrorKind,
    pub message: String,
    pub detail: Option<JsonValue>,
}

impl HandlerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Validation,
            message: message.into(),
            detail: None,
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Execution,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: JsonValue) -> Self {
        self.detail = Some(detail);
        self
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for HandlerError {}

/// The execute/validate contract every job type implements. Handlers are
/// expected to poll `ctx.is_abort_requested()` at safe checkpoints and return
/// `HandlerOutcome::Aborted` when it fires; abort is cooperative, never
/// preemptive.
pub trait JobHandler {
    fn job_type(&self) -> &str;

    fn validate_params(&self, params: &JsonValue) -> Result<(), HandlerError>;

    fn execute(
        &self,
        params: &JsonValue,
        ctx: &mut JobContext<'_>,
    ) -> Result<HandlerOutcome, HandlerError>;
}

/// Maps a job-type string to its handler. Constructed once at process start
/// and passed by reference into the worker; new job types register here
/// without touching the scheduler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Box<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers under the handler's own job type; a later registration for
    /// the same type replaces the earlier one.
    pub fn register(&mut self, handler: Box<dyn JobHandler>) {
        self.handlers
            .insert(handler.job_type().to_string(), handler);
    }

    pub fn resolve(&self, job_type: &str) -> Option<&dyn JobHandler> {
        self.handlers.get(job_type).map(Box::as_ref)
    }

    pub fn job_types(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}
