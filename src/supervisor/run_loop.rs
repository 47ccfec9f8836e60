//! Cooperative polling loop driving one supervised child.
//!
//! The loop blocks only inside `poll(2)` (bounded by the poll interval) or
//! the fixed pauses of the kill escalation. It installs no signal handlers
//! and arms no interval timers, so it can run on any thread of a larger
//! host process.

use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, info, info_span};

use crate::policy::{HealthCheck, HealthCheckPolicy, Policy, Raise, Tick, TimeoutPolicy};
use crate::process::{ChildHandle, KillEscalation, SpawnSpec, StdioModes, Stream};
use crate::supervisor::output::{OutputBuffer, RunResult};
use crate::{ProcessError, Result};

/// Default multiplex wait for [`Supervisor::gather_output`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

const STREAMS: [Stream; 2] = [Stream::Stdout, Stream::Stderr];

/// Supervises a single run of a [`SpawnSpec`].
///
/// Behaviour is assembled from [`Policy`] objects; with no policies the
/// supervisor simply waits for the child to exit. A supervisor is consumed
/// by the run it drives.
pub struct Supervisor {
    spec: SpawnSpec,
    stdio: StdioModes,
    escalation: KillEscalation,
    policies: Vec<Box<dyn Policy>>,
}

impl Supervisor {
    /// Supervise `spec` with captured stdout/stderr, default escalation and
    /// no policies.
    #[must_use]
    pub fn new(spec: SpawnSpec) -> Self {
        Self {
            spec,
            stdio: StdioModes::default(),
            escalation: KillEscalation::default(),
            policies: Vec::new(),
        }
    }

    /// Stream modes for the child.
    #[must_use]
    pub fn stdio(mut self, stdio: StdioModes) -> Self {
        self.stdio = stdio;
        self
    }

    /// Kill escalation tuning.
    #[must_use]
    pub fn escalation(mut self, escalation: KillEscalation) -> Self {
        self.escalation = escalation;
        self
    }

    /// Add a policy. Policies are consulted in insertion order.
    #[must_use]
    pub fn policy(mut self, policy: impl Policy + 'static) -> Self {
        self.policies.push(Box::new(policy));
        self
    }

    /// Add a [`TimeoutPolicy`]. `None` leaves the run unbounded.
    #[must_use]
    pub fn with_timeout(self, timeout: Option<Duration>, raise_on_timeout: bool) -> Self {
        self.policy(TimeoutPolicy::new(timeout).raise_on_timeout(raise_on_timeout))
    }

    /// Add a [`HealthCheckPolicy`].
    #[must_use]
    pub fn with_health_check(
        self,
        check: impl HealthCheck + 'static,
        cadence: Duration,
        raise_on_failure: bool,
    ) -> Self {
        self.policy(HealthCheckPolicy::new(check, cadence).raise_on_failure(raise_on_failure))
    }

    /// The program this supervisor will run.
    #[must_use]
    pub fn spec(&self) -> &SpawnSpec {
        &self.spec
    }

    /// Start the child and collect its captured output until it exits or a
    /// policy stops the run.
    ///
    /// # Errors
    ///
    /// Fatal conditions (`Spawn`, `Signal`, `CannotKill`, `Io`) are returned
    /// as soon as they happen. `TimedOut` and `CallbackFailed` are returned
    /// only when opted in, after cleanup, and carry the full result.
    pub fn gather_output(mut self, poll_interval: Duration) -> Result<RunResult> {
        let mut child = ChildHandle::start(&self.spec, self.stdio)?;
        let started = Instant::now();
        let span = info_span!("supervise", pid = child.pid(), command = %self.spec);
        let _guard = span.enter();
        self.notify_start(started);

        let mut stdout = OutputBuffer::new();
        let mut stderr = OutputBuffer::new();

        loop {
            for stream in wait_readable(&child, poll_interval)? {
                let chunk = child.read_available(stream)?;
                match stream {
                    Stream::Stdout => stdout.append(&chunk),
                    Stream::Stderr => stderr.append(&chunk),
                }
            }

            if child.is_terminated()? {
                stdout.append(&child.drain_remaining(Stream::Stdout)?);
                stderr.append(&child.drain_remaining(Stream::Stderr)?);
                break;
            }

            if self.tick(&mut child)? == Tick::Stop {
                break;
            }
        }

        self.finish(child, started, stdout, stderr)
    }

    /// Start the child and wait for it without collecting output.
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::Config` before spawning if stdout or stderr is
    /// captured, since nothing would drain the pipe and the child could
    /// block on it. Otherwise as [`gather_output`](Self::gather_output).
    pub fn run(mut self, poll_interval: Duration) -> Result<RunResult> {
        if self.stdio.captures_output() {
            return Err(ProcessError::Config(
                "run() does not drain output; use gather_output() when capturing stdout or stderr"
                    .into(),
            ));
        }

        let mut child = ChildHandle::start(&self.spec, self.stdio)?;
        let started = Instant::now();
        let span = info_span!("supervise", pid = child.pid(), command = %self.spec);
        let _guard = span.enter();
        self.notify_start(started);

        loop {
            thread::sleep(poll_interval);
            if child.is_terminated()? {
                break;
            }
            if self.tick(&mut child)? == Tick::Stop {
                break;
            }
        }

        self.finish(child, started, OutputBuffer::new(), OutputBuffer::new())
    }

    fn notify_start(&mut self, started: Instant) {
        for policy in &mut self.policies {
            policy.on_start(started);
        }
    }

    /// Every policy runs on every tick; any one of them can stop the loop.
    fn tick(&mut self, child: &mut ChildHandle) -> Result<Tick> {
        let now = Instant::now();
        let mut verdict = Tick::Continue;
        for policy in &mut self.policies {
            if policy.on_tick(child, &self.escalation, now)? == Tick::Stop {
                verdict = Tick::Stop;
            }
        }
        Ok(verdict)
    }

    fn finish(
        mut self,
        mut child: ChildHandle,
        started: Instant,
        mut stdout: OutputBuffer,
        mut stderr: OutputBuffer,
    ) -> Result<RunResult> {
        for policy in &mut self.policies {
            policy.post_run(&mut child, &self.escalation)?;
        }

        // A policy may have stopped the loop before exit was observed.
        stdout.append(&child.drain_remaining(Stream::Stdout)?);
        stderr.append(&child.drain_remaining(Stream::Stderr)?);

        let mut result = RunResult {
            pid: child.pid(),
            stdout: stdout.into_bytes(),
            stderr: stderr.into_bytes(),
            exit_code: child.poll_exit_code()?,
            timed_out: false,
            health_check_failed: false,
            elapsed: started.elapsed(),
        };
        for policy in &self.policies {
            policy.annotate(&mut result);
        }

        info!(
            exit_code = ?result.exit_code,
            timed_out = result.timed_out,
            health_check_failed = result.health_check_failed,
            stdout_bytes = result.stdout.len(),
            stderr_bytes = result.stderr.len(),
            elapsed_ms = result.elapsed.as_millis(),
            "supervised run finished"
        );

        match self.policies.iter().find_map(|policy| policy.raise()) {
            Some(Raise::TimedOut) => Err(ProcessError::TimedOut(Box::new(result))),
            Some(Raise::CallbackFailed) => Err(ProcessError::CallbackFailed(Box::new(result))),
            None => Ok(result),
        }
    }
}

/// Wait up to `timeout` for any open captured pipe to become readable and
/// return the ready streams. `EINTR` restarts the wait.
fn wait_readable(child: &ChildHandle, timeout: Duration) -> Result<Vec<Stream>> {
    let open: Vec<(Stream, _)> = STREAMS
        .iter()
        .filter_map(|&stream| child.pipe_fd(stream).map(|fd| (stream, fd)))
        .collect();

    if open.is_empty() {
        thread::sleep(timeout);
        return Ok(Vec::new());
    }

    let poll_timeout = PollTimeout::try_from(timeout).unwrap_or(PollTimeout::MAX);
    let mut fds: Vec<PollFd<'_>> = open
        .iter()
        .map(|(_, fd)| PollFd::new(*fd, PollFlags::POLLIN))
        .collect();
    let ready_count = retry_interrupted(|| poll(&mut fds, poll_timeout))
        .map_err(|err| ProcessError::Io(format!("poll failed: {err}")))?;
    if ready_count == 0 {
        return Ok(Vec::new());
    }

    let ready = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
    Ok(open
        .iter()
        .zip(&fds)
        .filter(|(_, fd)| fd.revents().is_some_and(|events| events.intersects(ready)))
        .map(|((stream, _), _)| *stream)
        .collect())
}

/// Run `op` until it finishes with anything other than `EINTR`.
fn retry_interrupted<T>(mut op: impl FnMut() -> nix::Result<T>) -> nix::Result<T> {
    loop {
        match op() {
            Err(Errno::EINTR) => debug!("interrupted; retrying"),
            other => return other,
        }
    }
}
