//! Escalating kill sequence.
//!
//! `Running → TermSent → KillRetry(n) → Dead`. Every liveness re-check goes
//! through [`ChildHandle::is_terminated`], so the exit status is cached as
//! soon as the kernel reports it.

use std::thread;
use std::time::Duration;

use nix::sys::signal::Signal;
use tracing::{debug, error, info, warn};

use crate::process::child::ChildHandle;
use crate::{ProcessError, Result};

/// Pause before the first liveness re-check.
pub const DEFAULT_TERM_PAUSE: Duration = Duration::from_millis(200);
/// Pause after every signal before re-checking.
pub const DEFAULT_KILL_PAUSE: Duration = Duration::from_millis(100);
/// Maximum number of SIGKILLs sent before giving up.
pub const DEFAULT_KILL_LIMIT: u32 = 20;

/// Stage of the kill escalation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TerminationState {
    /// No signal sent yet.
    Running,
    /// SIGTERM delivered.
    TermSent,
    /// The n-th SIGKILL delivered (1-based).
    KillRetry(u32),
    /// The child has terminated.
    Dead,
}

/// Tuning for the SIGTERM → repeated SIGKILL sequence.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct KillEscalation {
    /// Grace period before SIGTERM, giving a just-exiting child a chance.
    pub term_pause: Duration,
    /// Pause after each signal.
    pub kill_pause: Duration,
    /// SIGKILLs allowed before the child is declared unkillable.
    pub kill_limit: u32,
}

impl Default for KillEscalation {
    fn default() -> Self {
        Self {
            term_pause: DEFAULT_TERM_PAUSE,
            kill_pause: DEFAULT_KILL_PAUSE,
            kill_limit: DEFAULT_KILL_LIMIT,
        }
    }
}

impl KillEscalation {
    /// Terminate `child`, escalating until it is dead.
    ///
    /// Returns the last stage reached before the child was observed dead:
    /// `Running` if it went away on its own, `TermSent` if SIGTERM was
    /// enough, `KillRetry(n)` if it took `n` SIGKILLs. A signal reported as
    /// not delivered means the pid is already gone and ends the sequence.
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::CannotKill` if the child is still alive after
    /// `kill_limit` SIGKILLs, and propagates signal or wait failures.
    pub fn kill(&self, child: &mut ChildHandle) -> Result<TerminationState> {
        let pid = child.pid();
        let mut state = TerminationState::Running;

        if child.is_terminated()? {
            return Ok(finish(pid, state));
        }

        thread::sleep(self.term_pause);
        if child.is_terminated()? {
            return Ok(finish(pid, state));
        }

        if !child.send_signal(Signal::SIGTERM)? {
            return Ok(finish(pid, state));
        }
        state = TerminationState::TermSent;
        info!(pid, "sent SIGTERM");
        thread::sleep(self.kill_pause);
        if child.is_terminated()? {
            return Ok(finish(pid, state));
        }

        let mut attempt = 0;
        loop {
            if attempt >= self.kill_limit {
                error!(pid, attempts = attempt, "child not responding to SIGKILL");
                return Err(ProcessError::CannotKill(pid));
            }
            attempt += 1;
            if !child.send_signal(Signal::SIGKILL)? {
                return Ok(finish(pid, state));
            }
            state = TerminationState::KillRetry(attempt);
            warn!(pid, attempt, "sent SIGKILL");
            thread::sleep(self.kill_pause);
            if child.is_terminated()? {
                return Ok(finish(pid, state));
            }
        }
    }
}

fn finish(pid: u32, last: TerminationState) -> TerminationState {
    debug!(pid, from = ?last, to = ?TerminationState::Dead, "kill escalation complete");
    last
}
