//! Bounded polling and retry with backoff
//!
//! Every wait in benchctl (node health after a join, object deletion, pod
//! scheduling, job completion) and every retry of a transient orchestrator
//! failure goes through [`poll_until`] or [`retry_transient`], parameterized
//! by a [`PollPolicy`].

use crate::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Interval, growth, and bounds for a polling loop
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    /// Delay after the first unsuccessful attempt
    pub interval: Duration,

    /// Upper bound for the delay between attempts
    pub max_interval: Duration,

    /// Growth factor applied to the delay after each attempt
    pub multiplier: f64,

    /// Maximum number of attempts, including the first
    pub max_attempts: Option<u32>,

    /// Absolute deadline; the final sleep is clamped so it never overshoots
    pub deadline: Option<Instant>,

    /// Randomize each delay by +/-20%
    pub jitter: bool,
}

impl PollPolicy {
    /// Poll at a fixed interval with no bound
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            max_interval: interval,
            multiplier: 1.0,
            max_attempts: None,
            deadline: None,
            jitter: false,
        }
    }

    /// Exponential backoff from `initial` up to `max`
    pub fn backoff(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            interval: initial,
            max_interval: max,
            multiplier: multiplier.max(1.0),
            max_attempts: None,
            deadline: None,
            jitter: false,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait after the given (1-based) attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let base = self.interval.as_secs_f64() * self.multiplier.powi(exponent);
        let mut secs = base.min(self.max_interval.as_secs_f64());
        if self.jitter {
            secs *= rand::thread_rng().gen_range(0.8..=1.2);
        }
        Duration::from_secs_f64(secs)
    }

    fn attempts_left(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }

    /// Remaining time before the deadline, `None` when unbounded
    fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

/// Outcome of a single probe
#[derive(Debug)]
pub enum Probe<T, E> {
    /// The awaited condition holds
    Ready(T),
    /// Not yet; try again after the next delay
    Pending,
    /// Stop polling immediately with this error
    Abort(E),
}

/// Why a poll loop ended without a ready value
#[derive(Debug, thiserror::Error)]
pub enum PollError<E> {
    #[error("gave up after {attempts} attempts ({elapsed:?})")]
    Exhausted { attempts: u32, elapsed: Duration },

    #[error("deadline exceeded after {attempts} attempts ({elapsed:?})")]
    DeadlineExceeded { attempts: u32, elapsed: Duration },

    #[error("aborted: {0}")]
    Aborted(E),
}

impl<E> PollError<E> {
    pub fn is_deadline(&self) -> bool {
        matches!(self, PollError::DeadlineExceeded { .. })
    }
}

/// Probe until ready, aborted, out of attempts, or past the deadline.
///
/// The probe receives the 1-based attempt number.
pub async fn poll_until<T, E, F, Fut>(
    policy: &PollPolicy,
    mut probe: F,
) -> std::result::Result<T, PollError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Probe<T, E>>,
{
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match probe(attempt).await {
            Probe::Ready(value) => return Ok(value),
            Probe::Abort(error) => return Err(PollError::Aborted(error)),
            Probe::Pending => {}
        }

        if !policy.attempts_left(attempt) {
            return Err(PollError::Exhausted {
                attempts: attempt,
                elapsed: started.elapsed(),
            });
        }

        let mut delay = policy.delay_for(attempt);
        if let Some(remaining) = policy.remaining() {
            if remaining.is_zero() {
                return Err(PollError::DeadlineExceeded {
                    attempts: attempt,
                    elapsed: started.elapsed(),
                });
            }
            delay = delay.min(remaining);
        }

        debug!(attempt, delay_ms = delay.as_millis() as u64, "condition pending, waiting");
        sleep(delay).await;
    }
}

/// Run `op`, retrying with backoff while it fails with a transient error.
///
/// Non-retryable errors are returned immediately. When attempts or the
/// deadline run out, the last transient error is returned.
pub async fn retry_transient<T, F, Fut>(policy: &PollPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;
        let error: Error = match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && policy.attempts_left(attempt) => e,
            Err(e) => return Err(e),
        };

        let mut delay = policy.delay_for(attempt);
        if let Some(remaining) = policy.remaining() {
            if remaining.is_zero() {
                return Err(error);
            }
            delay = delay.min(remaining);
        }

        warn!(
            operation = what,
            attempt,
            error = %error,
            delay_ms = delay.as_millis() as u64,
            "transient failure, retrying"
        );
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_delays() {
        let policy = PollPolicy::backoff(Duration::from_secs(1), Duration::from_secs(5), 2.0);
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for(40), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = PollPolicy::fixed(Duration::from_secs(10)).with_jitter(true);
        for attempt in 1..20 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= Duration::from_secs(8) && delay <= Duration::from_secs(12));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_ready() {
        let policy = PollPolicy::fixed(Duration::from_secs(1)).with_max_attempts(10);
        let result: std::result::Result<u32, PollError<()>> = poll_until(&policy, |attempt| async move {
            if attempt == 3 {
                Probe::Ready(attempt)
            } else {
                Probe::Pending
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_exhausted() {
        let policy = PollPolicy::fixed(Duration::from_secs(1)).with_max_attempts(4);
        let result: std::result::Result<(), PollError<()>> =
            poll_until(&policy, |_| async { Probe::Pending }).await;
        match result {
            Err(PollError::Exhausted { attempts, .. }) => assert_eq!(attempts, 4),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_abort_is_immediate() {
        let policy = PollPolicy::fixed(Duration::from_secs(60));
        let started = Instant::now();
        let result: std::result::Result<(), PollError<&str>> =
            poll_until(&policy, |_| async { Probe::Abort("unschedulable") }).await;
        assert!(matches!(result, Err(PollError::Aborted("unschedulable"))));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_does_not_overshoot() {
        let timeout = Duration::from_secs(10);
        let interval = Duration::from_secs(3);
        let policy = PollPolicy::fixed(interval).with_timeout(timeout);
        let started = Instant::now();

        let result: std::result::Result<(), PollError<()>> =
            poll_until(&policy, |_| async { Probe::Pending }).await;

        assert!(result.unwrap_err().is_deadline());
        let elapsed = started.elapsed();
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + interval);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_transient_recovers() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = PollPolicy::backoff(Duration::from_millis(100), Duration::from_secs(1), 2.0)
            .with_max_attempts(5);

        let value = retry_transient(&policy, "probe", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::unreachable("connection refused"))
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_transient_stops_on_fatal() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = PollPolicy::fixed(Duration::from_millis(100)).with_max_attempts(5);

        let result: Result<()> = retry_transient(&policy, "join", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::credential_expired("token expired"))
        })
        .await;

        assert!(matches!(result, Err(Error::CredentialExpired(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_transient_exhausts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = PollPolicy::fixed(Duration::from_millis(100)).with_max_attempts(3);

        let result: Result<()> = retry_transient(&policy, "probe", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::unreachable("down"))
        })
        .await;

        assert!(matches!(result, Err(Error::Unreachable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
