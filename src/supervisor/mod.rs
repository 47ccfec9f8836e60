//! The supervision loop and its output types.

pub mod output;
pub mod run_loop;

pub use output::{OutputBuffer, RunResult};
pub use run_loop::{Supervisor, DEFAULT_POLL_INTERVAL};
