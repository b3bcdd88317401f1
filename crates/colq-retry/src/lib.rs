// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use colq_error::{AttemptFailure, Error, RequestBehaviour, RequestContext};
use tokio::time::Instant;
use tracing::debug;

// ---------------------------------------------------------------------------
// Deadline
// ---------------------------------------------------------------------------

/// The absolute instant by which the entire logical query (all attempts,
/// backoffs, and streaming) must complete. Computed once per query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// A deadline `budget` from now.
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    /// A deadline at an absolute instant.
    #[must_use]
    pub fn at(at: Instant) -> Self {
        Self { at }
    }

    /// The underlying instant, for `timeout_at`-style APIs.
    #[must_use]
    pub fn instant(&self) -> Instant {
        self.at
    }

    /// Time left before the deadline, saturating at zero.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed.
    #[must_use]
    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Base of the exponential backoff curve, in milliseconds.
pub const BACKOFF_BASE_MS: u64 = 100;
/// Ceiling of the exponential backoff curve, in milliseconds.
pub const BACKOFF_CAP_MS: u64 = 60_000;

fn backoff_delay(attempts_so_far: u32) -> Duration {
    let exponent = attempts_so_far.min(31);
    let cap = (BACKOFF_BASE_MS * 2u64.saturating_pow(exponent)).min(BACKOFF_CAP_MS);
    Duration::from_millis((fastrand::f64() * cap as f64) as u64)
}

// ---------------------------------------------------------------------------
// run_with_retry
// ---------------------------------------------------------------------------

fn lock(ctx: &Mutex<RequestContext>) -> std::sync::MutexGuard<'_, RequestContext> {
    ctx.lock().expect("request context lock poisoned")
}

fn timed_out(ctx: &Mutex<RequestContext>, last_error: Option<Error>) -> Error {
    let mut guard = lock(ctx);
    if let Some(e) = last_error {
        guard.set_previous_attempt_error(e.to_string());
    }
    Error::Timeout(guard.attach_error_context("analytics query timed out"))
}

/// Run `attempt` until it succeeds, the classifier fails it, the retry cap
/// is exhausted, or the deadline passes.
///
/// Each invocation is raced against the remaining deadline so that no
/// single attempt can outrun the caller's budget. After a retriable
/// failure the driver sleeps `jitter · min(100 · 2^n, 60_000)` milliseconds
/// where `n` is the number of attempts so far; a sleep that would cross the
/// deadline is shortened to the remaining budget, after which the timeout
/// is raised. The classified error of each retried attempt is preserved
/// verbatim in the context's `previous_attempt_errors`.
///
/// # Errors
///
/// The classifier's fail-branch error (decorated with the request context),
/// the final retried error once attempts are exhausted, or a timeout.
/// [`Error::Aborted`] passes through undecorated.
pub async fn run_with_retry<T, F, Fut, C>(
    mut attempt: F,
    mut classify: C,
    deadline: Deadline,
    ctx: &Mutex<RequestContext>,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AttemptFailure>>,
    C: FnMut(AttemptFailure, &mut RequestContext) -> RequestBehaviour,
{
    let max_retry_attempts = lock(ctx).max_retry_attempts;
    let mut last_error: Option<Error> = None;

    for _ in 0..=max_retry_attempts {
        if deadline.expired() {
            return Err(timed_out(ctx, last_error));
        }
        lock(ctx).increment_attempt();

        match tokio::time::timeout_at(deadline.instant(), attempt()).await {
            Err(_) => return Err(timed_out(ctx, last_error)),
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(failure)) => {
                let behaviour = {
                    let mut guard = lock(ctx);
                    classify(failure, &mut *guard)
                };
                if !behaviour.retry {
                    let guard = lock(ctx);
                    return Err(behaviour.error.with_context(&guard));
                }
                lock(ctx).set_previous_attempt_error(behaviour.error.to_string());
                last_error = Some(behaviour.error);
            }
        }

        let attempts_so_far = lock(ctx).num_attempts;
        let delay = backoff_delay(attempts_so_far);
        let remaining = deadline.remaining();
        if delay > remaining {
            tokio::time::sleep(remaining).await;
            return Err(timed_out(ctx, last_error));
        }
        debug!(
            attempts = attempts_so_far,
            delay_ms = delay.as_millis() as u64,
            "backing off before retry"
        );
        tokio::time::sleep(delay).await;
    }

    let guard = lock(ctx);
    match last_error {
        Some(error) => Err(error.with_context(&guard)),
        None => Err(Error::Analytics(
            guard.attach_error_context("retry attempts exhausted"),
        )),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
