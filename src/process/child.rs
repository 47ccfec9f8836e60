//! Handle over a running child process.
//!
//! Owns the `std::process::Child`, its captured pipes and the cached exit
//! status. Captured stdout/stderr pipes are switched to `O_NONBLOCK` right
//! after spawn so a single thread can multiplex over both without ever
//! blocking on one of them.

use std::io::{self, Read};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use clap::ValueEnum;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::process::spawn_spec::SpawnSpec;
use crate::{ProcessError, Result};

/// Upper bound on bytes taken from one pipe per [`ChildHandle::read_available`]
/// call, so a chatty child cannot starve the periodic checks.
const MAX_READ_PER_CALL: usize = 256 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// How long `Drop` waits for a SIGKILLed child to be reaped.
const DROP_REAP_TIMEOUT: Duration = Duration::from_millis(500);
const DROP_REAP_STEP: Duration = Duration::from_millis(10);

/// How one of the child's standard streams is wired.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    /// Connected to `/dev/null`.
    Discard,
    /// Shared with the supervising process.
    Inherit,
    /// Redirected into a pipe owned by the supervisor.
    Capture,
    /// Left to the platform default (inherited on Unix).
    Unset,
}

impl StreamMode {
    fn to_stdio(self) -> Option<Stdio> {
        match self {
            Self::Discard => Some(Stdio::null()),
            Self::Inherit => Some(Stdio::inherit()),
            Self::Capture => Some(Stdio::piped()),
            Self::Unset => None,
        }
    }
}

/// Stream modes for stdout, stderr and stdin.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct StdioModes {
    /// Child standard output.
    pub stdout: StreamMode,
    /// Child standard error.
    pub stderr: StreamMode,
    /// Child standard input.
    pub stdin: StreamMode,
}

impl Default for StdioModes {
    /// Capture both output streams; leave stdin alone.
    fn default() -> Self {
        Self {
            stdout: StreamMode::Capture,
            stderr: StreamMode::Capture,
            stdin: StreamMode::Unset,
        }
    }
}

impl StdioModes {
    /// Whether either output stream is captured into a pipe.
    #[must_use]
    pub fn captures_output(&self) -> bool {
        self.stdout == StreamMode::Capture || self.stderr == StreamMode::Capture
    }
}

/// Output stream of the child that the supervisor can read.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Stream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// A started child process.
///
/// A handle only exists once the process has been spawned, so the pid and
/// pipes are always valid. Pipes close exactly once: on EOF, on
/// [`drain_remaining`](Self::drain_remaining), or when the handle drops.
#[derive(Debug)]
pub struct ChildHandle {
    child: Child,
    pid: u32,
    os_pid: Pid,
    stdio: StdioModes,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    stdin: Option<ChildStdin>,
    exit_status: Option<ExitStatus>,
}

impl ChildHandle {
    /// Spawn the program described by `spec` with the given stream modes.
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::Spawn` if the OS cannot create the process, or
    /// `ProcessError::Io` if a captured pipe cannot be made non-blocking
    /// (the child is killed in that case).
    pub fn start(spec: &SpawnSpec, stdio: StdioModes) -> Result<Self> {
        let mut cmd = spec.command();
        if let Some(cfg) = stdio.stdout.to_stdio() {
            cmd.stdout(cfg);
        }
        if let Some(cfg) = stdio.stderr.to_stdio() {
            cmd.stderr(cfg);
        }
        if let Some(cfg) = stdio.stdin.to_stdio() {
            cmd.stdin(cfg);
        }

        let mut child = cmd
            .spawn()
            .map_err(|err| ProcessError::Spawn(format!("failed to spawn {spec}: {err}")))?;

        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdin = child.stdin.take();
        let os_pid = match i32::try_from(pid) {
            Ok(raw) => Pid::from_raw(raw),
            Err(_) => {
                child.kill().ok();
                child.wait().ok();
                return Err(ProcessError::Spawn(format!("pid {pid} out of range")));
            }
        };

        // Built before the pipes are touched so a failure below still kills
        // the child through Drop.
        let handle = Self {
            child,
            pid,
            os_pid,
            stdio,
            stdout,
            stderr,
            stdin,
            exit_status: None,
        };

        if let Some(pipe) = &handle.stdout {
            set_nonblocking(pipe)?;
        }
        if let Some(pipe) = &handle.stderr {
            set_nonblocking(pipe)?;
        }

        info!(pid, command = %spec, "child process spawned");
        Ok(handle)
    }

    /// OS process id.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Stream modes the child was started with.
    #[must_use]
    pub fn stdio(&self) -> StdioModes {
        self.stdio
    }

    /// Non-blocking exit check. Once the status is known it is cached and
    /// the OS is never asked again.
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::Io` if the wait call itself fails.
    pub fn poll_exit_status(&mut self) -> Result<Option<ExitStatus>> {
        if let Some(status) = self.exit_status {
            return Ok(Some(status));
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!(pid = self.pid, %status, "child exit observed");
                self.exit_status = Some(status);
                Ok(Some(status))
            }
            Ok(None) => Ok(None),
            Err(err) => Err(ProcessError::Io(format!(
                "failed to poll pid {}: {err}",
                self.pid
            ))),
        }
    }

    /// Exit code once the child has terminated; see [`exit_code`].
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::Io` if the wait call itself fails.
    pub fn poll_exit_code(&mut self) -> Result<Option<i32>> {
        Ok(self.poll_exit_status()?.and_then(exit_code))
    }

    /// Whether the child has terminated (and been reaped).
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::Io` if the wait call itself fails.
    pub fn is_terminated(&mut self) -> Result<bool> {
        Ok(self.poll_exit_status()?.is_some())
    }

    /// Deliver `signal` to the child.
    ///
    /// Returns `Ok(false)` when the process is already gone: either its exit
    /// status has been collected (the pid may since have been reused) or the
    /// kernel reports `ESRCH`.
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::Signal` for any other `kill(2)` failure.
    pub fn send_signal(&mut self, signal: Signal) -> Result<bool> {
        if self.exit_status.is_some() {
            debug!(pid = self.pid, %signal, "child already reaped; signal not sent");
            return Ok(false);
        }
        signal_pid(self.os_pid, signal)
    }

    /// Read whatever is currently buffered in the kernel for `stream`.
    ///
    /// Returns an empty vector when nothing is ready or the stream is not
    /// captured. Reaching EOF closes the pipe.
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::Io` on a read failure other than
    /// `WouldBlock`/`Interrupted`.
    pub fn read_available(&mut self, stream: Stream) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let Some(pipe) = self.pipe_mut(stream) else {
            return Ok(out);
        };
        let eof = read_nonblocking(pipe, &mut out, Some(MAX_READ_PER_CALL))
            .map_err(|err| ProcessError::Io(format!("failed to read {stream:?}: {err}")))?;
        if eof {
            debug!(pid = self.pid, ?stream, "pipe reached EOF");
            self.close(stream);
        }
        Ok(out)
    }

    /// Collect the bytes still sitting in the pipe after the child exited,
    /// then close it.
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::Io` on a read failure.
    pub fn drain_remaining(&mut self, stream: Stream) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let Some(pipe) = self.pipe_mut(stream) else {
            return Ok(out);
        };
        let result = read_nonblocking(pipe, &mut out, None);
        self.close(stream);
        result.map_err(|err| ProcessError::Io(format!("failed to drain {stream:?}: {err}")))?;
        Ok(out)
    }

    /// Whether `stream` is captured and its pipe still open.
    #[must_use]
    pub fn is_open(&self, stream: Stream) -> bool {
        match stream {
            Stream::Stdout => self.stdout.is_some(),
            Stream::Stderr => self.stderr.is_some(),
        }
    }

    /// Borrowed descriptor of an open captured stream, for multiplexing.
    #[must_use]
    pub fn pipe_fd(&self, stream: Stream) -> Option<BorrowedFd<'_>> {
        match stream {
            Stream::Stdout => self.stdout.as_ref().map(AsFd::as_fd),
            Stream::Stderr => self.stderr.as_ref().map(AsFd::as_fd),
        }
    }

    fn pipe_mut(&mut self, stream: Stream) -> Option<&mut dyn Read> {
        match stream {
            Stream::Stdout => self.stdout.as_mut().map(|pipe| pipe as &mut dyn Read),
            Stream::Stderr => self.stderr.as_mut().map(|pipe| pipe as &mut dyn Read),
        }
    }

    fn close(&mut self, stream: Stream) {
        match stream {
            Stream::Stdout => drop(self.stdout.take()),
            Stream::Stderr => drop(self.stderr.take()),
        }
    }
}

impl Drop for ChildHandle {
    fn drop(&mut self) {
        // Kill a running child and reap it if it dies promptly.
        drop(self.stdin.take());
        if self.exit_status.is_none() && matches!(self.child.try_wait(), Ok(None)) {
            warn!(pid = self.pid, "child still running when its handle dropped; killing");
            self.child.kill().ok();
            // Bounded reap: a child stuck in uninterruptible sleep must not
            // hang the caller.
            let deadline = Instant::now() + DROP_REAP_TIMEOUT;
            while matches!(self.child.try_wait(), Ok(None)) {
                if Instant::now() >= deadline {
                    warn!(pid = self.pid, "child survived SIGKILL; leaving it unreaped");
                    break;
                }
                thread::sleep(DROP_REAP_STEP);
            }
        }
    }
}

/// Send `signal` to `pid`. `ESRCH` means the process is gone and is
/// reported as `Ok(false)`.
fn signal_pid(pid: Pid, signal: Signal) -> Result<bool> {
    match kill(pid, signal) {
        Ok(()) => {
            debug!(%pid, %signal, "signal delivered");
            Ok(true)
        }
        Err(Errno::ESRCH) => {
            debug!(%pid, %signal, "no such process; signal not delivered");
            Ok(false)
        }
        Err(err) => Err(ProcessError::Signal(format!(
            "failed to send {signal} to pid {pid}: {err}"
        ))),
    }
}

/// Conventional integer form of an exit status: the exit code, or the
/// negated signal number when the child was killed by a signal.
#[must_use]
pub fn exit_code(status: ExitStatus) -> Option<i32> {
    status.code().or_else(|| status.signal().map(|sig| -sig))
}

fn set_nonblocking<F: AsRawFd>(pipe: &F) -> Result<()> {
    let fd = pipe.as_raw_fd();
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// Read until the pipe would block, hits EOF, or `limit` bytes were taken.
/// Returns `true` on EOF.
fn read_nonblocking(reader: &mut dyn Read, out: &mut Vec<u8>, limit: Option<usize>) -> io::Result<bool> {
    let mut chunk = [0_u8; READ_CHUNK];
    let start = out.len();
    loop {
        if limit.is_some_and(|max| out.len() - start >= max) {
            return Ok(false);
        }
        match reader.read(&mut chunk) {
            Ok(0) => return Ok(true),
            Ok(n) => out.extend_from_slice(&chunk[..n]),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
}
