#![forbid(unsafe_code)]

//! Supervise a single child process: capture its output into memory,
//! enforce a wall-clock timeout or a periodic health check, and terminate
//! it with an escalating SIGTERM → SIGKILL sequence.

pub mod config;
pub mod errors;
pub mod policy;
pub mod process;
pub mod supervisor;

use std::collections::HashMap;
use std::time::Duration;

pub use config::SupervisorConfig;
pub use errors::{ProcessError, Result};
pub use process::{ChildHandle, KillEscalation, SpawnSpec, StdioModes, StreamMode};
pub use supervisor::{RunResult, Supervisor};

/// Run `command_line` with captured output and an optional timeout.
///
/// `env` overrides are merged into the host environment. Returns
/// `(stdout, stderr, exit_code)`; the exit code is `None` when the run
/// timed out.
///
/// # Errors
///
/// Returns the fatal errors of [`Supervisor::gather_output`]; a timeout is
/// not an error here.
pub fn run_with_timeout(
    command_line: &str,
    env: &HashMap<String, String>,
    timeout: Option<Duration>,
) -> Result<(Vec<u8>, Vec<u8>, Option<i32>)> {
    let spec = SpawnSpec::parse(command_line, env, true, false)?;
    let result = Supervisor::new(spec)
        .with_timeout(timeout, false)
        .gather_output(supervisor::DEFAULT_POLL_INTERVAL)?;
    let exit_code = if result.timed_out {
        None
    } else {
        result.exit_code
    };
    Ok((result.stdout, result.stderr, exit_code))
}
