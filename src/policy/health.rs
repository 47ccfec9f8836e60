//! Caller-supplied health check run at a fixed cadence.
//!
//! The check is an opaque capability: it reports healthy/unhealthy and may
//! itself fail. Errors and panics raised by the check count as an unhealthy
//! result and are logged, never propagated.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::policy::{Policy, Raise, Tick};
use crate::process::{ChildHandle, KillEscalation};
use crate::supervisor::RunResult;
use crate::Result;

/// Error type a health check may fail with.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Periodic liveness probe for a supervised child.
pub trait HealthCheck {
    /// `Ok(true)` when healthy, `Ok(false)` when not.
    ///
    /// # Errors
    ///
    /// Any error is treated as an unhealthy result.
    fn check(&mut self) -> std::result::Result<bool, BoxError>;
}

impl<F, E> HealthCheck for F
where
    F: FnMut() -> std::result::Result<bool, E>,
    E: Into<BoxError>,
{
    fn check(&mut self) -> std::result::Result<bool, BoxError> {
        self().map_err(Into::into)
    }
}

/// Runs a [`HealthCheck`] every `cadence` and kills the child on the first
/// failure.
pub struct HealthCheckPolicy {
    check: Box<dyn HealthCheck>,
    cadence: Duration,
    raise_on_failure: bool,
    last_run: Option<Instant>,
    failed: bool,
    invocations: u32,
}

impl fmt::Debug for HealthCheckPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthCheckPolicy")
            .field("cadence", &self.cadence)
            .field("raise_on_failure", &self.raise_on_failure)
            .field("last_run", &self.last_run)
            .field("failed", &self.failed)
            .field("invocations", &self.invocations)
            .finish_non_exhaustive()
    }
}

impl HealthCheckPolicy {
    /// Probe with `check` roughly every `cadence`. The first tick always
    /// probes.
    #[must_use]
    pub fn new(check: impl HealthCheck + 'static, cadence: Duration) -> Self {
        Self {
            check: Box::new(check),
            cadence,
            raise_on_failure: false,
            last_run: None,
            failed: false,
            invocations: 0,
        }
    }

    /// Raise `ProcessError::CallbackFailed` after cleanup instead of only
    /// setting the flag.
    #[must_use]
    pub fn raise_on_failure(mut self, raise: bool) -> Self {
        self.raise_on_failure = raise;
        self
    }

    /// Sticky failure flag.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Number of times the check has been called.
    #[must_use]
    pub fn invocations(&self) -> u32 {
        self.invocations
    }

    fn probe(&mut self, pid: u32) -> bool {
        self.invocations += 1;
        let check = &mut self.check;
        match panic::catch_unwind(AssertUnwindSafe(|| check.check())) {
            Ok(Ok(healthy)) => {
                debug!(pid, healthy, invocation = self.invocations, "health check ran");
                healthy
            }
            Ok(Err(err)) => {
                warn!(pid, %err, "health check raised an error; treating as failure");
                false
            }
            Err(payload) => {
                warn!(
                    pid,
                    panic = panic_message(payload.as_ref()),
                    "health check panicked; treating as failure"
                );
                false
            }
        }
    }
}

impl Policy for HealthCheckPolicy {
    fn on_tick(
        &mut self,
        child: &mut ChildHandle,
        escalation: &KillEscalation,
        now: Instant,
    ) -> Result<Tick> {
        if self.failed {
            return Ok(Tick::Stop);
        }
        if let Some(last) = self.last_run {
            if now.saturating_duration_since(last) < self.cadence {
                return Ok(Tick::Continue);
            }
        }

        let pid = child.pid();
        if self.probe(pid) {
            self.last_run = Some(now);
            return Ok(Tick::Continue);
        }

        self.failed = true;
        warn!(pid, invocations = self.invocations, "health check failed; terminating child");
        let stage = escalation.kill(child)?;
        info!(pid, ?stage, "unhealthy child terminated");
        Ok(Tick::Stop)
    }

    fn annotate(&self, result: &mut RunResult) {
        result.health_check_failed |= self.failed;
    }

    fn raise(&self) -> Option<Raise> {
        (self.failed && self.raise_on_failure).then_some(Raise::CallbackFailed)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
