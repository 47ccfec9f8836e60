//! Unit tests for `ProcessError` display format and accessors.

use std::time::Duration;

use childwatch::{ProcessError, RunResult};

fn result_for(pid: u32) -> RunResult {
    RunResult {
        pid,
        stdout: b"partial".to_vec(),
        stderr: Vec::new(),
        exit_code: Some(-15),
        timed_out: true,
        health_check_failed: false,
        elapsed: Duration::from_millis(250),
    }
}

#[test]
fn display_prefixes_name_the_category() {
    let cases = [
        (ProcessError::Spec("bad quote".into()), "spec: bad quote"),
        (ProcessError::Spawn("no such file".into()), "spawn: no such file"),
        (ProcessError::Signal("EPERM".into()), "signal: EPERM"),
        (ProcessError::Io("poll failed".into()), "io: poll failed"),
        (ProcessError::Config("bad value".into()), "config: bad value"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn cannot_kill_names_the_pid() {
    let err = ProcessError::CannotKill(4242);
    assert_eq!(err.to_string(), "cannot kill: pid 4242 not responding to SIGKILL");
}

#[test]
fn raised_conditions_carry_the_run_result() {
    let err = ProcessError::TimedOut(Box::new(result_for(7)));
    assert_eq!(err.to_string(), "timed out: pid 7");
    let carried = err.run_result().expect("timed out carries a result");
    assert_eq!(carried.stdout, b"partial");

    let err = ProcessError::CallbackFailed(Box::new(result_for(8)));
    assert!(err.to_string().starts_with("callback failed:"));
    assert_eq!(err.run_result().map(|r| r.pid), Some(8));
}

#[test]
fn fatal_errors_carry_no_result() {
    assert!(ProcessError::CannotKill(1).run_result().is_none());
    assert!(ProcessError::Spawn("x".into()).run_result().is_none());
}

#[test]
fn io_errors_convert() {
    let err: ProcessError = std::io::Error::other("pipe broke").into();
    assert!(matches!(err, ProcessError::Io(_)));
    assert_eq!(err.to_string(), "io: pipe broke");
}

#[test]
fn implements_std_error() {
    fn assert_error<E: std::error::Error>(_: &E) {}
    assert_error(&ProcessError::Config("x".into()));
}
