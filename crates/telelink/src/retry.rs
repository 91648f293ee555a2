//! # Retry Policy
//!
//! Bounded attempts with a pluggable backoff, shared by the lifecycle stages
//! and the send engine. Attempts are numbered from 1; the wait after attempt
//! `n` is `backoff.delay(n)`. Nothing sleeps after the final attempt.

use std::time::Duration;

use tracing::debug;

/// Wait between consecutive attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// No wait.
    None,
    /// The same wait every time.
    Fixed(Duration),
    /// `base × n` after attempt `n`.
    Linear(Duration),
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(d) => d,
            Backoff::Linear(base) => base.saturating_mul(attempt),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

/// All attempts failed; carries the last error.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last: E,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// `max_attempts` tries with `base × n` between them.
    pub fn linear(max_attempts: u32, base: Duration) -> Self {
        Self::new(max_attempts, Backoff::Linear(base))
    }

    /// Run `op` until it succeeds or the budget is spent.
    ///
    /// `op` receives the 1-based attempt number. On success returns the value
    /// and the attempt it took.
    pub fn run<T, E, F>(&self, what: &str, mut op: F) -> Result<(T, u32), Exhausted<E>>
    where
        F: FnMut(u32) -> Result<T, E>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(v) => return Ok((v, attempt)),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(Exhausted { attempts: attempt, last: e })
                }
                Err(e) => {
                    let delay = self.backoff.delay(attempt);
                    debug!(
                        what,
                        attempt,
                        max = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "attempt failed, retrying"
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}
