//! Retrying unreliable remote calls, built on [`keen_retry`].
//!
//! Callers write an attempt function returning a [`RetryResult`], using the
//! macros below to decide which failures are worth another try, and hand it to
//! [`RetryPolicy::run`].

use std::time::Duration;

use keen_retry::{ResolvedResult, RetryResult};
use rand::Rng as _;

use crate::prelude::*;

/// On error, return a [`RetryResult::Transient`] value.
macro_rules! try_transient {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(error) => {
                debug!("Potentially transient error: {:?}", error);
                return ::keen_retry::RetryResult::Transient {
                    input: (),
                    error: From::from(error),
                };
            }
        }
    };
}

/// On error, return a [`RetryResult::Fatal`] value.
macro_rules! try_fatal {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(error) => {
                return ::keen_retry::RetryResult::Fatal {
                    input: (),
                    error: From::from(error),
                };
            }
        }
    };
}

// Here's a trick to export a macro within a crate as if it were a normal
// symbol.
pub(crate) use {try_fatal, try_transient};

/// The result of a single attempt.
pub type AttemptResult<T> = RetryResult<(), (), T, anyhow::Error>;

/// Build an [`RetryResult::Ok`] value.
pub(crate) fn retry_result_ok<T, E>(output: T) -> RetryResult<(), (), T, E> {
    RetryResult::Ok {
        reported_input: (),
        output,
    }
}

/// How often, and how patiently, to retry a call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u8,

    /// Delay before the first retry, in milliseconds.
    pub initial_backoff_millis: u32,

    /// Longest delay between retries, in milliseconds.
    pub max_backoff_millis: u32,

    /// Random variation applied to each delay, between 0.0 and 1.0.
    pub jitter_ratio: f32,
}

impl Default for RetryPolicy {
    /// Three attempts, backing off exponentially from 2s up to 10s.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_millis: 2_000,
            max_backoff_millis: 10_000,
            jitter_ratio: 0.1,
        }
    }
}

impl RetryPolicy {
    /// A policy that never waits long. Handy for tests.
    #[cfg(test)]
    pub fn fast(max_attempts: u8) -> Self {
        Self {
            max_attempts,
            initial_backoff_millis: 1,
            max_backoff_millis: 5,
            jitter_ratio: 0.0,
        }
    }

    /// How many times we retry after the first attempt.
    pub fn re_attempts(&self) -> u8 {
        self.max_attempts.saturating_sub(1)
    }

    /// The nominal wait before each retry. Doubles from
    /// `initial_backoff_millis`, never exceeding `max_backoff_millis`.
    pub fn backoff_schedule(&self) -> Vec<Duration> {
        let max = u64::from(self.max_backoff_millis.max(self.initial_backoff_millis));
        (0..u32::from(self.re_attempts()))
            .map(|retry| {
                let factor = 2u64.checked_pow(retry).unwrap_or(u64::MAX);
                let millis = u64::from(self.initial_backoff_millis).saturating_mul(factor);
                Duration::from_millis(millis.min(max))
            })
            .collect()
    }

    /// The actual waits: the schedule with jitter applied, then clamped so no
    /// wait exceeds `max_backoff_millis`.
    pub fn jittered_delays(&self, rng: &mut impl rand::Rng) -> Vec<Duration> {
        let max = Duration::from_millis(u64::from(
            self.max_backoff_millis.max(self.initial_backoff_millis),
        ));
        let ratio = f64::from(self.jitter_ratio.clamp(0.0, 1.0));
        self.backoff_schedule()
            .into_iter()
            .map(|delay| {
                let scale = if ratio > 0.0 {
                    1.0 + rng.random_range(-ratio..=ratio)
                } else {
                    1.0
                };
                delay.mul_f64(scale).min(max)
            })
            .collect()
    }

    /// Run `attempt` until it succeeds, fails fatally, or we run out of
    /// attempts. `operation` is used for logging.
    pub async fn run<T, F, Fut>(&self, operation: &str, attempt: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = AttemptResult<T>>,
    {
        let first = attempt().await;
        if self.re_attempts() == 0 {
            return match first {
                RetryResult::Ok { output, .. } => Ok(output),
                RetryResult::Transient { error, .. } | RetryResult::Fatal { error, .. } => {
                    Err(error)
                }
            };
        }

        let delays = self.jittered_delays(&mut rand::rng());
        trace!(?delays, attempts = self.max_attempts, "Retry policy");

        let result = first
            .retry_with_async(|_| attempt())
            .with_delays(delays.into_iter())
            .await
            .inspect_recovered(|_, _, retry_errors_list| {
                warn!(
                    "{operation} succeeded after retrying {} times (failed attempts: [{}])",
                    retry_errors_list.len(),
                    keen_retry::loggable_retry_errors(retry_errors_list)
                )
            })
            .inspect_given_up(|_, retry_errors_list, fatal_error| {
                error!(
                    "{operation} FAILED after exhausting all {} retrying attempts with error {fatal_error:?}",
                    retry_errors_list.len(),
                )
            });

        match result {
            ResolvedResult::Ok { output, .. } | ResolvedResult::Recovered { output, .. } => {
                Ok(output)
            }
            ResolvedResult::Fatal { error, .. } => Err(error),
            ResolvedResult::GivenUp { fatal_error, .. }
            | ResolvedResult::Unrecoverable { fatal_error, .. } => Err(fatal_error),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// An attempt function that fails transiently `failures` times.
    async fn flaky(calls: &AtomicUsize, failures: usize) -> AttemptResult<usize> {
        let call = calls.fetch_add(1, Ordering::SeqCst);
        try_transient!(if call < failures {
            Err(anyhow!("flaky failure {call}"))
        } else {
            Ok(())
        });
        retry_result_ok(call)
    }

    #[test]
    fn default_policy_matches_documented_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.re_attempts(), 2);
        assert_eq!(
            policy.backoff_schedule(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = RetryPolicy {
            max_attempts: 6,
            ..RetryPolicy::default()
        };
        let secs = policy
            .backoff_schedule()
            .iter()
            .map(Duration::as_secs)
            .collect::<Vec<_>>();
        assert_eq!(secs, vec![2, 4, 8, 10, 10]);
    }

    #[test]
    fn jitter_stays_near_schedule_and_under_cap() {
        let policy = RetryPolicy {
            max_attempts: 6,
            ..RetryPolicy::default()
        };
        let schedule = policy.backoff_schedule();
        let mut rng = rand::rng();
        for _ in 0..200 {
            let delays = policy.jittered_delays(&mut rng);
            assert_eq!(delays.len(), schedule.len());
            for (delay, nominal) in delays.iter().zip(&schedule) {
                assert!(*delay <= Duration::from_secs(10), "{delay:?} over cap");
                assert!(*delay >= nominal.mul_f64(0.9), "{delay:?} too short");
                assert!(*delay <= nominal.mul_f64(1.1), "{delay:?} too long");
            }
        }
    }

    #[test]
    fn no_jitter_means_exact_schedule() {
        let policy = RetryPolicy {
            jitter_ratio: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(
            policy.jittered_delays(&mut rand::rng()),
            policy.backoff_schedule()
        );
    }

    #[tokio::test]
    async fn recovers_from_transient_failures() {
        let calls = AtomicUsize::new(0);
        let output = RetryPolicy::fast(3)
            .run("flaky", || flaky(&calls, 2))
            .await
            .unwrap();
        assert_eq!(output, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let err = RetryPolicy::fast(3)
            .run("flaky", || flaky(&calls, 100))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("flaky failure"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let err = RetryPolicy::fast(3)
            .run("fatal", || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                try_fatal!(Err::<(), _>(anyhow!("bad credentials")));
                retry_result_ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "bad credentials");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn single_attempt_policy_does_not_retry() {
        let calls = AtomicUsize::new(0);
        assert!(
            RetryPolicy::fast(1)
                .run("once", || flaky(&calls, 1))
                .await
                .is_err()
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
