//! Wall-clock timeout.

use std::time::{Duration, Instant};

use nix::sys::signal::Signal;
use tracing::{info, warn};

use crate::policy::{Policy, Raise, Tick};
use crate::process::{ChildHandle, KillEscalation};
use crate::supervisor::RunResult;
use crate::Result;

/// Stops the loop once the child has run longer than a threshold, then
/// terminates it during cleanup.
///
/// The clock starts when the child is spawned, not when the policy is
/// built. A `None` or zero threshold disables the check.
#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    threshold: Option<Duration>,
    raise_on_timeout: bool,
    started: Option<Instant>,
    timed_out: bool,
}

impl TimeoutPolicy {
    /// Timeout after `threshold`, recorded as a flag only. Zero means no
    /// timeout.
    #[must_use]
    pub fn new(threshold: Option<Duration>) -> Self {
        Self {
            threshold: threshold.filter(|limit| !limit.is_zero()),
            raise_on_timeout: false,
            started: None,
            timed_out: false,
        }
    }

    /// Raise `ProcessError::TimedOut` after cleanup instead of only setting
    /// the flag.
    #[must_use]
    pub fn raise_on_timeout(mut self, raise: bool) -> Self {
        self.raise_on_timeout = raise;
        self
    }

    /// Effective threshold; `None` when disabled.
    #[must_use]
    pub fn threshold(&self) -> Option<Duration> {
        self.threshold
    }

    /// Sticky: once set it stays set for the rest of the run.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }
}

impl Policy for TimeoutPolicy {
    fn on_start(&mut self, started: Instant) {
        self.started = Some(started);
    }

    fn on_tick(
        &mut self,
        child: &mut ChildHandle,
        _escalation: &KillEscalation,
        now: Instant,
    ) -> Result<Tick> {
        let (Some(threshold), Some(started)) = (self.threshold, self.started) else {
            return Ok(Tick::Continue);
        };
        let elapsed = now.saturating_duration_since(started);
        if elapsed <= threshold {
            return Ok(Tick::Continue);
        }
        if !self.timed_out {
            warn!(
                pid = child.pid(),
                elapsed_ms = elapsed.as_millis(),
                timeout_ms = threshold.as_millis(),
                "child exceeded its timeout"
            );
            self.timed_out = true;
        }
        Ok(Tick::Stop)
    }

    fn post_run(&mut self, child: &mut ChildHandle, escalation: &KillEscalation) -> Result<()> {
        if !self.timed_out {
            return Ok(());
        }
        child.send_signal(Signal::SIGTERM)?;
        if !child.is_terminated()? {
            let stage = escalation.kill(child)?;
            info!(pid = child.pid(), ?stage, "timed-out child terminated");
        }
        Ok(())
    }

    fn annotate(&self, result: &mut RunResult) {
        result.timed_out |= self.timed_out;
    }

    fn raise(&self) -> Option<Raise> {
        (self.timed_out && self.raise_on_timeout).then_some(Raise::TimedOut)
    }
}
