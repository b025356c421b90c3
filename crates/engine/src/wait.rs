//! Bounded poll-for-condition engine.
//!
//! Each invocation is its own small state machine: it polls until the
//! condition matches, the deadline lapses, the token fires, or a read
//! fails with something other than not-found. Invocations are fully
//! independent of one another.

use std::time::{Duration, Instant};

use belay_core::{Error, ResourceRef, Result};
use belay_kubehub::ResourceClient;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_EXPECTED_STATUS: &str = "True";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Poll interval, overridable via `BELAY_WAIT_POLL_MS`.
pub fn default_poll_interval() -> Duration {
    let ms = std::env::var("BELAY_WAIT_POLL_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);
    Duration::from_millis(ms)
}

#[derive(Debug, Clone)]
pub struct WaitSpec {
    pub target: ResourceRef,
    pub condition: String,
    pub expected_status: String,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl WaitSpec {
    pub fn new(target: ResourceRef, condition: impl Into<String>) -> Self {
        Self {
            target,
            condition: condition.into(),
            expected_status: DEFAULT_EXPECTED_STATUS.to_string(),
            timeout: DEFAULT_TIMEOUT,
            poll_interval: default_poll_interval(),
        }
    }
}

/// Successful wait: how long the condition took to show up.
#[derive(Debug, Clone, Copy)]
pub struct WaitOutcome {
    pub elapsed: Duration,
}

/// Poll until the named condition reaches the expected status, the
/// timeout lapses, or the token is canceled.
///
/// Not-found reads keep polling: the target may not exist yet. The
/// condition is checked before the deadline, so a match on the final poll
/// still counts; the sleep is capped at the remaining time, so a timeout
/// overshoots by at most one poll interval.
pub async fn wait_for_condition(
    client: &dyn ResourceClient,
    spec: &WaitSpec,
    cancel: &CancellationToken,
) -> Result<WaitOutcome> {
    if spec.timeout.is_zero() {
        return Err(Error::InvalidArgument("timeout must be positive".into()));
    }
    let started = Instant::now();
    let deadline = started + spec.timeout;
    loop {
        if cancel.is_cancelled() {
            return Err(canceled(spec, started));
        }
        let read = client
            .get(&spec.target.kind, &spec.target.name, spec.target.namespace.as_deref())
            .await;
        match read {
            Ok(obj) => {
                if condition_matches(&obj, &spec.condition, &spec.expected_status) {
                    let elapsed = started.elapsed();
                    metrics::histogram!("wait_latency_ms", elapsed.as_secs_f64() * 1000.0);
                    return Ok(WaitOutcome { elapsed });
                }
            }
            Err(e) if e.is_not_found() => {
                debug!(target = %spec.target, "target not found yet; still polling");
            }
            Err(e) => return Err(e),
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(Error::TimedOut(format!(
                "condition {}={} not met on {} after {:.1}s",
                spec.condition,
                spec.expected_status,
                spec.target,
                started.elapsed().as_secs_f64(),
            )));
        }
        let sleep_for = spec.poll_interval.min(deadline - now);
        tokio::select! {
            _ = cancel.cancelled() => return Err(canceled(spec, started)),
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }
}

fn canceled(spec: &WaitSpec, started: Instant) -> Error {
    Error::Canceled(format!(
        "wait for {} on {} canceled after {:.1}s",
        spec.condition,
        spec.target,
        started.elapsed().as_secs_f64(),
    ))
}

/// Scan `.status.conditions` for an entry whose `type` and `status` match.
pub fn condition_matches(obj: &Value, condition: &str, expected_status: &str) -> bool {
    obj.get("status")
        .and_then(|s| s.get("conditions"))
        .and_then(|c| c.as_array())
        .map(|conds| {
            conds.iter().any(|c| {
                c.get("type").and_then(|t| t.as_str()) == Some(condition)
                    && c.get("status").and_then(|s| s.as_str()) == Some(expected_status)
            })
        })
        .unwrap_or(false)
}
