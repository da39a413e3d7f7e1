#![forbid(unsafe_code)]

use crate::context::JobContext;
use crate::registry::{HandlerError, HandlerOutcome, JobHandler};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::time::{Duration, Instant};

const SLEEP_SLICE: Duration = Duration::from_millis(50);
const MAX_SLEEP_SEC: f64 = 3600.0;

#[derive(Debug, Deserialize)]
struct PingParams {
    sleep_sec: f64,
}

fn parse_params(params: &JsonValue) -> Result<PingParams, HandlerError> {
    let parsed: PingParams = serde_json::from_value(params.clone())
        .map_err(|err| HandlerError::validation(format!("params do not match PING: {err}")))?;
    if !parsed.sleep_sec.is_finite() || parsed.sleep_sec < 0.0 {
        return Err(HandlerError::validation(
            "sleep_sec must be a non-negative number",
        ));
    }
    if parsed.sleep_sec > MAX_SLEEP_SEC {
        return Err(HandlerError::validation(format!(
            "sleep_sec must be at most {MAX_SLEEP_SEC}"
        )));
    }
    Ok(parsed)
}

/// Smoke-test job: sleeps in small slices, heartbeats progress, polls the
/// abort flag at every slice, and returns the elapsed wall time.
pub struct PingHandler;

impl JobHandler for PingHandler {
    fn job_type(&self) -> &str {
        "PING"
    }

    fn validate_params(&self, params: &JsonValue) -> Result<(), HandlerError> {
        parse_params(params).map(|_| ())
    }

    fn execute(
        &self,
        params: &JsonValue,
        ctx: &mut JobContext<'_>,
    ) -> Result<HandlerOutcome, HandlerError> {
        let parsed = parse_params(params)?;
        let total = Duration::from_secs_f64(parsed.sleep_sec);
        let started = Instant::now();

        heartbeat(ctx, 0.0)?;
        while started.elapsed() < total {
            if ctx.is_abort_requested() {
                return Ok(HandlerOutcome::Aborted);
            }
            let remaining = total.checked_sub(started.elapsed()).unwrap_or_default();
            std::thread::sleep(remaining.min(SLEEP_SLICE));
            let progress =
                (started.elapsed().as_secs_f64() / parsed.sleep_sec.max(f64::EPSILON)).min(1.0);
            heartbeat(ctx, progress)?;
        }

        Ok(HandlerOutcome::Completed(json!({
            "elapsed": started.elapsed().as_secs_f64(),
        })))
    }
}

fn heartbeat(ctx: &mut JobContext<'_>, progress: f64) -> Result<(), HandlerError> {
    ctx.update_heartbeat(progress, "sleeping")
        .map_err(|err| HandlerError::execution(format!("heartbeat failed: {err}")))
}
