//! Shared helpers for end-to-end supervision tests.
//!
//! Escalation pauses are shortened so the suite stays fast while still
//! exercising the full SIGTERM → SIGKILL sequence.

use std::time::Duration;

use childwatch::process::KillEscalation;
use childwatch::{SpawnSpec, Supervisor};

/// Poll interval used by most tests.
pub const POLL: Duration = Duration::from_millis(20);

/// Escalation with short pauses.
pub fn quick_escalation() -> KillEscalation {
    KillEscalation {
        term_pause: Duration::from_millis(50),
        kill_pause: Duration::from_millis(100),
        kill_limit: 5,
    }
}

/// Supervisor for `command_line` with captured output and quick escalation.
pub fn supervisor(command_line: &str) -> Supervisor {
    let spec = SpawnSpec::new(command_line).expect("command line parses");
    Supervisor::new(spec).escalation(quick_escalation())
}
