//! Unit tests for `SupervisorConfig` parsing, defaults and validation.

use std::time::Duration;

use childwatch::process::{StdioModes, StreamMode};
use childwatch::{ProcessError, SupervisorConfig};

fn sample_toml() -> &'static str {
    r#"
poll_interval_ms = 50
timeout_ms = 1500
raise_on_timeout = true
health_command = "test -e /tmp"
health_interval_ms = 250
raise_on_health_failure = true
strict = true
merge_env = false

[env]
FOO = "bar"

[stdio]
stdout = "capture"
stderr = "discard"
stdin = "inherit"

[escalation]
term_pause_ms = 10
kill_pause_ms = 20
kill_limit = 3
"#
}

#[test]
fn parses_full_config() {
    let config = SupervisorConfig::from_toml_str(sample_toml()).expect("config parses");

    assert_eq!(config.poll_interval(), Duration::from_millis(50));
    assert_eq!(config.timeout(), Some(Duration::from_millis(1500)));
    assert!(config.raise_on_timeout);
    assert_eq!(config.health_command.as_deref(), Some("test -e /tmp"));
    assert_eq!(config.health_interval(), Duration::from_millis(250));
    assert!(config.raise_on_health_failure);
    assert!(config.strict);
    assert!(!config.merge_env);
    assert_eq!(config.env.get("FOO").map(String::as_str), Some("bar"));
    assert_eq!(
        config.stdio,
        StdioModes {
            stdout: StreamMode::Capture,
            stderr: StreamMode::Discard,
            stdin: StreamMode::Inherit,
        }
    );

    let esc = config.escalation();
    assert_eq!(esc.term_pause, Duration::from_millis(10));
    assert_eq!(esc.kill_pause, Duration::from_millis(20));
    assert_eq!(esc.kill_limit, 3);
}

#[test]
fn empty_config_uses_defaults() {
    let config = SupervisorConfig::from_toml_str("").expect("empty config parses");
    assert_eq!(config, SupervisorConfig::default());
    assert_eq!(config.poll_interval(), Duration::from_millis(100));
    assert_eq!(config.timeout(), None);
    assert!(config.merge_env);
    assert_eq!(config.stdio, StdioModes::default());
    assert_eq!(config.escalation.kill_limit, 20);
}

#[test]
fn partial_tables_fill_in_defaults() {
    let config = SupervisorConfig::from_toml_str(
        r#"
[stdio]
stdout = "discard"

[escalation]
kill_limit = 1
"#,
    )
    .expect("config parses");
    assert_eq!(config.stdio.stdout, StreamMode::Discard);
    assert_eq!(config.stdio.stderr, StreamMode::Capture);
    assert_eq!(config.stdio.stdin, StreamMode::Unset);
    assert_eq!(config.escalation.kill_limit, 1);
    assert_eq!(config.escalation.term_pause_ms, 200);
}

#[test]
fn zero_poll_interval_is_rejected() {
    let err = SupervisorConfig::from_toml_str("poll_interval_ms = 0").expect_err("invalid");
    assert!(matches!(err, ProcessError::Config(_)));
    assert!(err.to_string().contains("poll_interval_ms"));
}

#[test]
fn zero_timeout_is_rejected() {
    let err = SupervisorConfig::from_toml_str("timeout_ms = 0").expect_err("invalid");
    assert!(err.to_string().contains("timeout_ms"));
}

#[test]
fn zero_health_interval_is_rejected_with_health_command() {
    let err = SupervisorConfig::from_toml_str(
        "health_command = \"true\"\nhealth_interval_ms = 0",
    )
    .expect_err("invalid");
    assert!(err.to_string().contains("health_interval_ms"));
}

#[test]
fn unknown_stream_mode_is_rejected() {
    let err = SupervisorConfig::from_toml_str("[stdio]\nstdout = \"tee\"").expect_err("invalid");
    assert!(err.to_string().starts_with("config: invalid config"));
}

#[test]
fn loads_from_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("childwatch.toml");
    std::fs::write(&path, sample_toml()).expect("write config");

    let config = SupervisorConfig::load_from_path(&path).expect("config loads");
    assert_eq!(config.timeout_ms, Some(1500));
}

#[test]
fn missing_file_is_config_error() {
    let err = SupervisorConfig::load_from_path("/nonexistent/childwatch.toml").expect_err("missing");
    assert!(err.to_string().starts_with("config: failed to read config"));
}
