//! Unit tests for command-line parsing, environment computation and
//! strict executable checks.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::PermissionsExt;

use serial_test::serial;

use childwatch::process::ChildEnv;
use childwatch::{ProcessError, SpawnSpec};

fn overrides(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}

// ─── Word splitting ────────────────────────────────────────────────────

#[test]
fn splits_on_whitespace() {
    let spec = SpawnSpec::new("sleep   5").expect("parses");
    assert_eq!(spec.args(), ["sleep", "5"]);
    assert_eq!(spec.executable().to_str(), Some("sleep"));
}

#[test]
fn honours_quotes_and_escapes() {
    let spec = SpawnSpec::new(r#"echo 'hello world' "a b" c\ d"#).expect("parses");
    assert_eq!(spec.args(), ["echo", "hello world", "a b", "c d"]);
}

#[test]
fn unbalanced_quote_is_spec_error() {
    let err = SpawnSpec::new("echo 'oops").expect_err("must fail");
    assert!(matches!(err, ProcessError::Spec(_)), "got {err:?}");
}

#[test]
fn empty_command_line_is_spec_error() {
    let err = SpawnSpec::new("   ").expect_err("must fail");
    assert!(matches!(err, ProcessError::Spec(_)), "got {err:?}");
}

#[test]
fn display_is_original_command_line() {
    let spec = SpawnSpec::new("echo  'a  b'").expect("parses");
    assert_eq!(spec.to_string(), "echo  'a  b'");
    assert_eq!(spec.command_line(), "echo  'a  b'");
}

// ─── Environment ───────────────────────────────────────────────────────

#[test]
fn empty_overrides_inherit_host_environment() {
    let spec = SpawnSpec::parse("true", &HashMap::new(), false, false).expect("parses");
    assert_eq!(spec.env(), &ChildEnv::Inherit);
}

#[test]
fn replace_mode_uses_exactly_the_overrides() {
    let spec =
        SpawnSpec::parse("true", &overrides(&[("FOO", "bar")]), false, false).expect("parses");
    let ChildEnv::Explicit(vars) = spec.env() else {
        panic!("expected explicit environment");
    };
    assert_eq!(vars.len(), 1);
    assert_eq!(vars.get(&OsString::from("FOO")), Some(&OsString::from("bar")));
}

#[test]
#[serial]
fn merge_mode_overlays_host_environment() {
    std::env::set_var("CHILDWATCH_SPEC_HOST", "host");
    std::env::set_var("CHILDWATCH_SPEC_SHADOWED", "old");

    let spec = SpawnSpec::parse(
        "true",
        &overrides(&[("CHILDWATCH_SPEC_SHADOWED", "new"), ("FOO", "bar")]),
        true,
        false,
    )
    .expect("parses");

    std::env::remove_var("CHILDWATCH_SPEC_HOST");
    std::env::remove_var("CHILDWATCH_SPEC_SHADOWED");

    let ChildEnv::Explicit(vars) = spec.env() else {
        panic!("expected explicit environment");
    };
    assert_eq!(
        vars.get(&OsString::from("CHILDWATCH_SPEC_HOST")),
        Some(&OsString::from("host"))
    );
    assert_eq!(
        vars.get(&OsString::from("CHILDWATCH_SPEC_SHADOWED")),
        Some(&OsString::from("new")),
        "overrides win over host values"
    );
    assert_eq!(vars.get(&OsString::from("FOO")), Some(&OsString::from("bar")));
}

// ─── Strict checks ─────────────────────────────────────────────────────

#[test]
fn strict_accepts_existing_executable() {
    assert!(SpawnSpec::parse("/bin/sh -c true", &HashMap::new(), true, true).is_ok());
}

#[test]
fn strict_resolves_bare_names_on_path() {
    assert!(SpawnSpec::parse("sh -c true", &HashMap::new(), true, true).is_ok());
}

#[test]
fn strict_rejects_missing_executable() {
    let err = SpawnSpec::parse("/nonexistent/childwatch-prog", &HashMap::new(), true, true)
        .expect_err("must fail");
    assert!(err.to_string().contains("cannot find executable"), "got {err}");
}

#[test]
fn strict_rejects_non_executable_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = dir.path().join("not-executable.sh");
    fs::write(&script, "#!/bin/sh\necho hi\n").expect("write script");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o644)).expect("chmod");

    let err = SpawnSpec::parse(
        &script.to_string_lossy(),
        &HashMap::new(),
        true,
        true,
    )
    .expect_err("must fail");
    assert!(err.to_string().contains("permission denied"), "got {err}");
}

/// Directory holding a non-executable file named `name`.
fn shadow_dir(name: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join(name);
    fs::write(&file, "#!/bin/sh\nexit 1\n").expect("write file");
    fs::set_permissions(&file, fs::Permissions::from_mode(0o644)).expect("chmod");
    dir
}

#[test]
fn strict_skips_non_executable_match_earlier_on_path() {
    let dir = shadow_dir("sh");
    let path = format!("{}:/usr/bin:/bin", dir.path().display());
    let spec = SpawnSpec::parse("sh -c true", &overrides(&[("PATH", path.as_str())]), false, true)
        .expect("a later PATH entry is executable");

    let resolved = spec.resolve_executable().expect("resolves");
    assert!(!resolved.starts_with(dir.path()), "picked {}", resolved.display());
}

#[test]
fn strict_reports_permission_denied_when_no_match_is_executable() {
    let dir = shadow_dir("childwatch-only-here");
    let path = dir.path().display().to_string();
    let err = SpawnSpec::parse("childwatch-only-here", &overrides(&[("PATH", path.as_str())]), false, true)
        .expect_err("nothing executable on PATH");
    assert!(err.to_string().contains("permission denied"), "got {err}");
}

#[test]
fn non_strict_skips_executable_checks() {
    assert!(SpawnSpec::parse("/nonexistent/childwatch-prog", &HashMap::new(), true, false).is_ok());
}
