//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

use crate::supervisor::RunResult;

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, ProcessError>;

/// Failure modes of a supervised run.
///
/// `TimedOut` and `CallbackFailed` are only produced when the caller opted
/// in to raising them; otherwise the same conditions are recorded as flags
/// on [`RunResult`]. Both carry the finished result so captured output is
/// not lost.
#[derive(Debug)]
pub enum ProcessError {
    /// Unparseable command line or unusable executable.
    Spec(String),
    /// The OS refused to create the child process.
    Spawn(String),
    /// Signal delivery failed for a reason other than a vanished pid.
    Signal(String),
    /// The child survived every SIGKILL the escalation was allowed to send.
    CannotKill(u32),
    /// The child outlived its timeout.
    TimedOut(Box<RunResult>),
    /// The health check reported failure.
    CallbackFailed(Box<RunResult>),
    /// Pipe, poll or wait failure.
    Io(String),
    /// Configuration parsing, validation or misuse.
    Config(String),
}

impl Display for ProcessError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spec(msg) => write!(f, "spec: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Signal(msg) => write!(f, "signal: {msg}"),
            Self::CannotKill(pid) => {
                write!(f, "cannot kill: pid {pid} not responding to SIGKILL")
            }
            Self::TimedOut(result) => write!(f, "timed out: pid {}", result.pid),
            Self::CallbackFailed(result) => {
                write!(f, "callback failed: health check failed for pid {}", result.pid)
            }
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for ProcessError {}

impl ProcessError {
    /// The run result carried by an opt-in raise, if any.
    #[must_use]
    pub fn run_result(&self) -> Option<&RunResult> {
        match self {
            Self::TimedOut(result) | Self::CallbackFailed(result) => Some(result),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for ProcessError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for ProcessError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<nix::errno::Errno> for ProcessError {
    fn from(err: nix::errno::Errno) -> Self {
        Self::Io(err.desc().to_owned())
    }
}
