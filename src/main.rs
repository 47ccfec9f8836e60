#![forbid(unsafe_code)]

//! `childwatch`: run a command under supervision.
//!
//! Captures the child's output, enforces an optional timeout and health
//! check, and relays the result with a `timeout(1)`-style exit status.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{ExitCode, Stdio};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use childwatch::{ProcessError, Result, RunResult, SpawnSpec, StreamMode, Supervisor, SupervisorConfig};

/// Exit status when the child timed out.
const EXIT_TIMED_OUT: u8 = 124;
/// Exit status for supervisor failures and failed health checks.
const EXIT_SUPERVISOR_ERROR: u8 = 125;

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum ReportFormat {
    /// Relay the child's stdout/stderr.
    Text,
    /// Print a JSON summary of the run.
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "childwatch", about = "Run a command under supervision", version, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Timeout in seconds (fractions allowed).
    #[arg(long)]
    timeout: Option<f64>,

    /// Upper bound on each multiplex wait, in milliseconds.
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Environment override for the child (repeatable).
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    env: Vec<(String, String)>,

    /// Run with only the `--env` variables instead of merging them into
    /// the current environment.
    #[arg(long)]
    replace_env: bool,

    /// Fail before spawning if the executable is missing or not executable.
    #[arg(long)]
    strict: bool,

    /// Treat a timeout as an error.
    #[arg(long)]
    raise_on_timeout: bool,

    /// Health check command; the child is killed once it exits non-zero.
    #[arg(long)]
    health_cmd: Option<String>,

    /// Health check cadence in milliseconds.
    #[arg(long)]
    health_interval_ms: Option<u64>,

    /// Child stdout mode.
    #[arg(long, value_enum)]
    stdout: Option<StreamMode>,

    /// Child stderr mode.
    #[arg(long, value_enum)]
    stderr: Option<StreamMode>,

    /// Child stdin mode.
    #[arg(long, value_enum)]
    stdin: Option<StreamMode>,

    /// How to report the finished run.
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    report: ReportFormat,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Command line to run. A single argument is split shell-style.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("{err}");
        return ExitCode::from(EXIT_SUPERVISOR_ERROR);
    }

    match run(&args) {
        Ok(code) => code,
        Err(err) => {
            error!(%err, "supervision failed");
            ExitCode::from(EXIT_SUPERVISOR_ERROR)
        }
    }
}

fn run(args: &Cli) -> Result<ExitCode> {
    let mut config = match &args.config {
        Some(path) => SupervisorConfig::load_from_path(path)?,
        None => SupervisorConfig::default(),
    };
    apply_overrides(&mut config, args)?;
    config.validate()?;

    let line = command_line(&args.command)?;
    let spec = SpawnSpec::parse(&line, &config.env, config.merge_env, config.strict)?;
    let mut supervisor = Supervisor::new(spec)
        .stdio(config.stdio)
        .escalation(config.escalation())
        .with_timeout(config.timeout(), config.raise_on_timeout);
    info!(command = %supervisor.spec(), timeout_ms = ?config.timeout_ms, "starting supervised run");

    if let Some(health_cmd) = &config.health_command {
        let health_spec = SpawnSpec::new(health_cmd)?;
        supervisor = supervisor.with_health_check(
            move || -> io::Result<bool> {
                let status = health_spec
                    .command()
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()?;
                Ok(status.success())
            },
            config.health_interval(),
            config.raise_on_health_failure,
        );
    }

    let outcome = if config.stdio.captures_output() {
        supervisor.gather_output(config.poll_interval())
    } else {
        supervisor.run(config.poll_interval())
    };

    let result = match outcome {
        Ok(result) => result,
        Err(ProcessError::TimedOut(result) | ProcessError::CallbackFailed(result)) => {
            error!(pid = result.pid, "run ended with a raised condition");
            *result
        }
        Err(err) => return Err(err),
    };

    report(&result, args.report)?;
    Ok(ExitCode::from(exit_status(&result)))
}

fn apply_overrides(config: &mut SupervisorConfig, args: &Cli) -> Result<()> {
    if let Some(secs) = args.timeout {
        let timeout = Duration::try_from_secs_f64(secs)
            .map_err(|err| ProcessError::Config(format!("invalid --timeout {secs}: {err}")))?;
        config.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1));
    }
    if let Some(ms) = args.poll_interval_ms {
        config.poll_interval_ms = ms;
    }
    if let Some(ms) = args.health_interval_ms {
        config.health_interval_ms = ms;
    }
    if args.health_cmd.is_some() {
        config.health_command.clone_from(&args.health_cmd);
    }
    config.env.extend(args.env.iter().cloned());
    if args.replace_env {
        config.merge_env = false;
    }
    config.strict |= args.strict;
    config.raise_on_timeout |= args.raise_on_timeout;
    if let Some(mode) = args.stdout {
        config.stdio.stdout = mode;
    }
    if let Some(mode) = args.stderr {
        config.stdio.stderr = mode;
    }
    if let Some(mode) = args.stdin {
        config.stdio.stdin = mode;
    }
    Ok(())
}

fn command_line(words: &[String]) -> Result<String> {
    match words {
        [single] => Ok(single.clone()),
        _ => shlex::try_join(words.iter().map(String::as_str))
            .map_err(|err| ProcessError::Spec(format!("cannot quote command: {err}"))),
    }
}

fn parse_env_pair(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))
}

fn report(result: &RunResult, format: ReportFormat) -> Result<()> {
    match format {
        ReportFormat::Text => {
            io::stdout().write_all(&result.stdout)?;
            io::stdout().flush()?;
            io::stderr().write_all(&result.stderr)?;
        }
        ReportFormat::Json => {
            let summary = serde_json::json!({
                "pid": result.pid,
                "stdout": result.stdout_lossy(),
                "stderr": result.stderr_lossy(),
                "exit_code": result.exit_code,
                "timed_out": result.timed_out,
                "health_check_failed": result.health_check_failed,
                "elapsed_ms": u64::try_from(result.elapsed.as_millis()).unwrap_or(u64::MAX),
            });
            let text = serde_json::to_string_pretty(&summary)
                .map_err(|err| ProcessError::Io(format!("failed to encode report: {err}")))?;
            println!("{text}");
        }
    }
    Ok(())
}

fn exit_status(result: &RunResult) -> u8 {
    if result.timed_out {
        return EXIT_TIMED_OUT;
    }
    if result.health_check_failed {
        return EXIT_SUPERVISOR_ERROR;
    }
    match result.exit_code {
        Some(code) if code >= 0 => u8::try_from(code).unwrap_or(u8::MAX),
        Some(code) => u8::try_from(128 - code).unwrap_or(u8::MAX),
        None => EXIT_SUPERVISOR_ERROR,
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| ProcessError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| ProcessError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
