//! Unit tests for `HealthCheckPolicy`: cadence, sticky failure, and
//! tolerance of misbehaving checks.

use std::cell::Cell;
use std::io;
use std::rc::Rc;
use std::time::{Duration, Instant};

use childwatch::policy::{HealthCheckPolicy, Policy, Raise, Tick};
use childwatch::process::KillEscalation;

use super::test_helpers::spawn;

fn fast() -> KillEscalation {
    KillEscalation {
        term_pause: Duration::from_millis(20),
        kill_pause: Duration::from_millis(100),
        kill_limit: 5,
    }
}

/// A check that records how often it ran and answers `healthy`.
fn counting_check(healthy: bool) -> (Rc<Cell<u32>>, impl FnMut() -> io::Result<bool>) {
    let calls = Rc::new(Cell::new(0));
    let seen = Rc::clone(&calls);
    let check = move || {
        seen.set(seen.get() + 1);
        Ok(healthy)
    };
    (calls, check)
}

#[test]
fn first_tick_always_runs_the_check() {
    let mut child = spawn("sleep 5");
    let (calls, check) = counting_check(true);
    let mut policy = HealthCheckPolicy::new(check, Duration::from_secs(60));

    let tick = policy
        .on_tick(&mut child, &fast(), Instant::now())
        .expect("tick");
    assert_eq!(tick, Tick::Continue);
    assert_eq!(calls.get(), 1);
    assert_eq!(policy.invocations(), 1);
}

#[test]
fn checks_respect_the_cadence() {
    let mut child = spawn("sleep 5");
    let esc = fast();
    let (calls, check) = counting_check(true);
    let mut policy = HealthCheckPolicy::new(check, Duration::from_secs(1));
    let t0 = Instant::now();

    policy.on_tick(&mut child, &esc, t0).expect("tick");
    policy
        .on_tick(&mut child, &esc, t0 + Duration::from_millis(300))
        .expect("tick");
    assert_eq!(calls.get(), 1, "cadence not yet elapsed");

    policy
        .on_tick(&mut child, &esc, t0 + Duration::from_millis(1100))
        .expect("tick");
    assert_eq!(calls.get(), 2);
}

#[test]
fn failure_kills_child_and_is_sticky() {
    let mut child = spawn("sleep 5");
    let esc = fast();
    let (calls, check) = counting_check(false);
    let mut policy = HealthCheckPolicy::new(check, Duration::ZERO);
    let t0 = Instant::now();

    let tick = policy.on_tick(&mut child, &esc, t0).expect("tick");
    assert_eq!(tick, Tick::Stop);
    assert!(policy.failed());
    assert!(child.is_terminated().expect("poll"), "child killed on failure");

    let again = policy
        .on_tick(&mut child, &esc, t0 + Duration::from_secs(5))
        .expect("tick");
    assert_eq!(again, Tick::Stop);
    assert_eq!(calls.get(), 1, "failed check is never invoked again");
    assert!(policy.failed());
}

#[test]
fn check_error_counts_as_failure() {
    let mut child = spawn("sleep 5");
    let check = || -> io::Result<bool> { Err(io::Error::other("check exploded")) };
    let mut policy = HealthCheckPolicy::new(check, Duration::ZERO);

    let tick = policy
        .on_tick(&mut child, &fast(), Instant::now())
        .expect("errors are not propagated");
    assert_eq!(tick, Tick::Stop);
    assert!(policy.failed());
}

#[test]
fn check_panic_counts_as_failure() {
    let mut child = spawn("sleep 5");
    let check = || -> io::Result<bool> { panic!("check panicked") };
    let mut policy = HealthCheckPolicy::new(check, Duration::ZERO);

    let tick = policy
        .on_tick(&mut child, &fast(), Instant::now())
        .expect("panics are not propagated");
    assert_eq!(tick, Tick::Stop);
    assert!(policy.failed());
    assert!(child.is_terminated().expect("poll"));
}

#[test]
fn raise_requires_opt_in() {
    let mut child = spawn("sleep 5");
    let (_, check) = counting_check(false);
    let mut policy = HealthCheckPolicy::new(check, Duration::ZERO).raise_on_failure(true);
    assert_eq!(policy.raise(), None);

    policy
        .on_tick(&mut child, &fast(), Instant::now())
        .expect("tick");
    assert_eq!(policy.raise(), Some(Raise::CallbackFailed));
}
