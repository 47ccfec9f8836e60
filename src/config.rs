//! Supervisor configuration parsing and validation.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::process::{KillEscalation, StdioModes};
use crate::{ProcessError, Result};

/// Kill escalation tuning, in milliseconds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EscalationConfig {
    /// Grace period before SIGTERM.
    #[serde(default = "default_term_pause_ms")]
    pub term_pause_ms: u64,
    /// Pause after each signal.
    #[serde(default = "default_kill_pause_ms")]
    pub kill_pause_ms: u64,
    /// SIGKILLs allowed before giving up.
    #[serde(default = "default_kill_limit")]
    pub kill_limit: u32,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            term_pause_ms: default_term_pause_ms(),
            kill_pause_ms: default_kill_pause_ms(),
            kill_limit: default_kill_limit(),
        }
    }
}

impl EscalationConfig {
    /// Runtime form of this configuration.
    #[must_use]
    pub fn to_escalation(&self) -> KillEscalation {
        KillEscalation {
            term_pause: Duration::from_millis(self.term_pause_ms),
            kill_pause: Duration::from_millis(self.kill_pause_ms),
            kill_limit: self.kill_limit,
        }
    }
}

fn default_term_pause_ms() -> u64 {
    200
}

fn default_kill_pause_ms() -> u64 {
    100
}

fn default_kill_limit() -> u32 {
    20
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_health_interval_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

/// Supervisor configuration parsed from a TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SupervisorConfig {
    /// Upper bound on each multiplex wait.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Wall-clock timeout; absent means unbounded.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Raise instead of only flagging a timeout.
    #[serde(default)]
    pub raise_on_timeout: bool,
    /// Health check command, run at `health_interval_ms`; healthy while it
    /// exits 0.
    #[serde(default)]
    pub health_command: Option<String>,
    /// Cadence of the health check.
    #[serde(default = "default_health_interval_ms")]
    pub health_interval_ms: u64,
    /// Raise instead of only flagging a health check failure.
    #[serde(default)]
    pub raise_on_health_failure: bool,
    /// Require the executable to exist and be executable before spawning.
    #[serde(default)]
    pub strict: bool,
    /// Overlay `env` on the host environment instead of replacing it.
    #[serde(default = "default_true")]
    pub merge_env: bool,
    /// Environment overrides for the child.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Stream modes for the child.
    #[serde(default)]
    pub stdio: StdioModes,
    /// Kill escalation tuning.
    #[serde(default)]
    pub escalation: EscalationConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: None,
            raise_on_timeout: false,
            health_command: None,
            health_interval_ms: default_health_interval_ms(),
            raise_on_health_failure: false,
            strict: false,
            merge_env: true,
            env: HashMap::new(),
            stdio: StdioModes::default(),
            escalation: EscalationConfig::default(),
        }
    }
}

impl SupervisorConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| ProcessError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::Config` describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(ProcessError::Config(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }

        if self.timeout_ms == Some(0) {
            return Err(ProcessError::Config(
                "timeout_ms must be greater than zero when set".into(),
            ));
        }

        if self.health_command.is_some() && self.health_interval_ms == 0 {
            return Err(ProcessError::Config(
                "health_interval_ms must be greater than zero".into(),
            ));
        }

        Ok(())
    }

    /// Multiplex wait bound.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Wall-clock timeout, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Health check cadence.
    #[must_use]
    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    /// Kill escalation tuning.
    #[must_use]
    pub fn escalation(&self) -> KillEscalation {
        self.escalation.to_escalation()
    }
}
