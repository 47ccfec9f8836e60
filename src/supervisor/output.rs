//! Output accumulation and the final run report.

use std::borrow::Cow;
use std::time::Duration;

/// Growable byte buffer for one captured stream. `append` is the only way
/// to add to it.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OutputBuffer {
    bytes: Vec<u8>,
}

impl OutputBuffer {
    /// Empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk read from the child.
    pub fn append(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Bytes collected so far.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of bytes collected.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether nothing has been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Hand the collected bytes over.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Final state of a supervised run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    /// Pid the child ran as.
    pub pid: u32,
    /// Captured standard output; empty when not captured.
    pub stdout: Vec<u8>,
    /// Captured standard error; empty when not captured.
    pub stderr: Vec<u8>,
    /// Exit code, or the negated signal number when killed by a signal.
    /// `None` if the child was never reaped.
    pub exit_code: Option<i32>,
    /// The timeout tripped.
    pub timed_out: bool,
    /// The health check reported failure.
    pub health_check_failed: bool,
    /// Wall-clock time from spawn to the end of cleanup.
    pub elapsed: Duration,
}

impl RunResult {
    /// Standard output decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn stdout_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// Standard error decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn stderr_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }

    /// Signal that terminated the child, if it died from one.
    #[must_use]
    pub fn killed_by_signal(&self) -> Option<i32> {
        self.exit_code.filter(|code| *code < 0).map(|code| -code)
    }

    /// Exited on its own with code 0, with no timeout or health failure.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out && !self.health_check_failed
    }
}
