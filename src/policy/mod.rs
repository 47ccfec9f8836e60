//! Periodic checks consulted by the supervision loop.
//!
//! A supervised run is assembled from a list of [`Policy`] objects. Each
//! one is told when the child starts, asked on every tick whether the loop
//! should continue, given a chance to clean up once the loop ends, and
//! finally records its outcome on the [`RunResult`].

pub mod health;
pub mod timeout;

use std::time::Instant;

pub use health::{BoxError, HealthCheck, HealthCheckPolicy};
pub use timeout::TimeoutPolicy;

use crate::process::{ChildHandle, KillEscalation};
use crate::supervisor::RunResult;
use crate::Result;

/// Verdict of one policy for one loop iteration.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Tick {
    /// Keep supervising.
    Continue,
    /// Leave the loop; the policy's `post_run` handles termination.
    Stop,
}

/// Condition a policy asks the supervisor to raise once cleanup is done.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Raise {
    /// Raise `ProcessError::TimedOut`.
    TimedOut,
    /// Raise `ProcessError::CallbackFailed`.
    CallbackFailed,
}

/// A periodic check plugged into the supervision loop.
pub trait Policy {
    /// Called once, right after the child was spawned.
    fn on_start(&mut self, _started: Instant) {}

    /// Called after every multiplex wait while the child is alive.
    ///
    /// # Errors
    ///
    /// Fatal failures only, e.g. `ProcessError::CannotKill` from a kill the
    /// policy triggered.
    fn on_tick(
        &mut self,
        child: &mut ChildHandle,
        escalation: &KillEscalation,
        now: Instant,
    ) -> Result<Tick>;

    /// Cleanup after the loop ended, before output is finalised.
    ///
    /// # Errors
    ///
    /// Fatal failures only.
    fn post_run(&mut self, _child: &mut ChildHandle, _escalation: &KillEscalation) -> Result<()> {
        Ok(())
    }

    /// Record this policy's flags on the finished result.
    fn annotate(&self, _result: &mut RunResult) {}

    /// Opt-in condition to raise after cleanup, if any.
    fn raise(&self) -> Option<Raise> {
        None
    }
}
