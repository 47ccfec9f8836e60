//! Immutable description of the program to supervise.
//!
//! A [`SpawnSpec`] is parsed once from a shell-style command line and is
//! read-only afterwards. It carries the argument vector, the executable
//! and the environment the child will see.

use std::collections::HashMap;
use std::env;
use std::ffi::{OsStr, OsString};
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::process::Command;

use nix::unistd::{access, AccessFlags};
use tracing::debug;

use crate::{ProcessError, Result};

/// Environment handed to the child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildEnv {
    /// Pass the host environment through untouched.
    Inherit,
    /// Run with exactly these variables. Built either from the host
    /// environment overlaid with overrides, or from the overrides alone.
    Explicit(HashMap<OsString, OsString>),
}

/// Argument vector, executable and environment for one supervised run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnSpec {
    command_line: String,
    args: Vec<String>,
    executable: PathBuf,
    env: ChildEnv,
}

impl SpawnSpec {
    /// Parse a command line that inherits the host environment, without
    /// strict executable checks.
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::Spec` if the command line cannot be split or
    /// contains no words.
    pub fn new(command_line: &str) -> Result<Self> {
        Self::parse(command_line, &HashMap::new(), true, false)
    }

    /// Split `command_line` into words and compute the child environment.
    ///
    /// * empty `env_overrides` → the host environment is inherited as is;
    /// * non-empty and `merge_with_host_env` → host environment with the
    ///   overrides laid on top;
    /// * non-empty and not merging → exactly the overrides.
    ///
    /// With `strict`, the executable must exist and be executable now.
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::Spec` on unbalanced quoting, an empty command
    /// line, or (strict only) a missing or non-executable program.
    pub fn parse(
        command_line: &str,
        env_overrides: &HashMap<String, String>,
        merge_with_host_env: bool,
        strict: bool,
    ) -> Result<Self> {
        let args = shlex::split(command_line)
            .ok_or_else(|| ProcessError::Spec(format!("cannot parse command line: {command_line}")))?;
        let Some(program) = args.first() else {
            return Err(ProcessError::Spec("command line is empty".into()));
        };
        let executable = PathBuf::from(program);

        let env = if env_overrides.is_empty() {
            ChildEnv::Inherit
        } else {
            let mut vars: HashMap<OsString, OsString> = if merge_with_host_env {
                env::vars_os().collect()
            } else {
                HashMap::new()
            };
            for (key, value) in env_overrides {
                vars.insert(OsString::from(key), OsString::from(value));
            }
            ChildEnv::Explicit(vars)
        };

        let spec = Self {
            command_line: command_line.to_owned(),
            args,
            executable,
            env,
        };

        if strict {
            spec.check_executable()?;
        }

        debug!(command = %spec, args = spec.args.len(), "spawn spec parsed");
        Ok(spec)
    }

    /// Full argument vector; the first element is the program.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Program as written on the command line.
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Environment the child will run with.
    #[must_use]
    pub fn env(&self) -> &ChildEnv {
        &self.env
    }

    /// Original, unsplit command line.
    #[must_use]
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Build the `std::process::Command` for this spec. Stdio is left for
    /// the caller to configure.
    #[must_use]
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.args(&self.args[1..]);
        if let ChildEnv::Explicit(vars) = &self.env {
            cmd.env_clear();
            cmd.envs(vars);
        }
        cmd
    }

    /// Locate the program the OS would run. Bare names are looked up on the
    /// child's `PATH` (the host's when the child has none), preferring the
    /// first executable match; paths are taken as given.
    #[must_use]
    pub fn resolve_executable(&self) -> Option<PathBuf> {
        if self.executable.components().count() > 1 || self.executable.is_absolute() {
            return self.executable.exists().then(|| self.executable.clone());
        }
        let search_path = match &self.env {
            ChildEnv::Inherit => env::var_os("PATH"),
            ChildEnv::Explicit(vars) => vars
                .get(OsStr::new("PATH"))
                .cloned()
                .or_else(|| env::var_os("PATH")),
        }?;
        // Like execvp(3): skip non-executable matches, but report the first
        // one if nothing on PATH can be run.
        let candidates: Vec<PathBuf> = env::split_paths(&search_path)
            .map(|dir| dir.join(&self.executable))
            .filter(|candidate| candidate.is_file())
            .collect();
        candidates
            .iter()
            .find(|candidate| is_executable(candidate))
            .or_else(|| candidates.first())
            .cloned()
    }

    fn check_executable(&self) -> Result<()> {
        let Some(path) = self.resolve_executable() else {
            return Err(ProcessError::Spec(format!(
                "cannot find executable {}",
                self.executable.display()
            )));
        };
        if path.is_dir() || !is_executable(&path) {
            return Err(ProcessError::Spec(format!(
                "permission denied to exec {}",
                path.display()
            )));
        }
        Ok(())
    }
}

fn is_executable(path: &Path) -> bool {
    access(path, AccessFlags::X_OK).is_ok()
}

impl Display for SpawnSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.command_line)
    }
}
