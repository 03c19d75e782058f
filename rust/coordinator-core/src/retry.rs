// rust/coordinator-core/src/retry.rs

//! Backoff pacing for listener binding and client-side polling.
//!
//! The coordinator never retries on behalf of a caller: a `wait` reply hands
//! the decision back to the client, which paces its re-polls with a
//! [`Backoff`].

use std::future::Future;
use std::time::Duration;

use crate::config::{ClientConfig, ServerConfig};

/// Exponential backoff between attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Total number of attempts, the first one included. `None` never
    /// gives up.
    pub max_attempts: Option<u32>,
    /// Pause after the first failed attempt.
    pub initial_delay: Duration,
    /// Ceiling for any single pause.
    pub max_delay: Duration,
    /// Growth factor applied per failed attempt.
    pub multiplier: f64,
    /// Stretch each pause by up to a quarter so that a whole group of
    /// clients does not re-poll in lockstep.
    pub jitter: bool,
}

impl Backoff {
    /// Pacing for re-polls after `wait`.
    pub fn for_polling(client: &ClientConfig) -> Self {
        Self {
            max_attempts: (client.max_polls > 0).then_some(client.max_polls),
            initial_delay: Duration::from_millis(client.poll_interval_ms),
            max_delay: Duration::from_millis(client.max_poll_interval_ms),
            multiplier: 1.5,
            jitter: true,
        }
    }

    /// Pacing for bind attempts at startup.
    pub fn for_binding(server: &ServerConfig) -> Self {
        Self {
            max_attempts: Some(server.bind_max_attempts.max(1)),
            initial_delay: Duration::from_millis(server.bind_retry_delay_ms),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: false,
        }
    }

    /// A single attempt.
    pub fn once() -> Self {
        Self {
            max_attempts: Some(1),
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Whether attempt number `attempt` (0-based) may be made.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }

    /// Pause to take after attempt `attempt` (0-based) failed.
    pub fn delay(&self, attempt: u32) -> Duration {
        let grown = self.initial_delay.as_secs_f64() * self.multiplier.powf(f64::from(attempt));
        let capped = grown.min(self.max_delay.as_secs_f64());
        let stretch = if self.jitter {
            1.0 + 0.25 * spread(attempt)
        } else {
            1.0
        };
        Duration::from_secs_f64(capped * stretch)
    }
}

/// Deterministic value in `[0, 1)` derived from `seed`.
fn spread(seed: u32) -> f64 {
    let mixed = seed.wrapping_add(1).wrapping_mul(0x9E37_79B9).rotate_left(13);
    f64::from(mixed >> 8) / f64::from(1u32 << 24)
}

/// Outcome of one attempt under [`with_backoff`].
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// Finished; stop with this value.
    Done(T),
    /// Not yet; try again if the policy allows.
    Again(E),
    /// Failed for good.
    Abort(E),
}

/// Run `attempt` until it is done, aborts, or `policy` runs out.
///
/// The closure receives the 0-based attempt number. When the policy runs
/// out, the error of the last attempt is returned.
pub async fn with_backoff<T, E, F, Fut>(policy: &Backoff, mut attempt: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    let mut n = 0;
    loop {
        let error = match attempt(n).await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Abort(error) => return Err(error),
            Attempt::Again(error) => error,
        };

        if !policy.allows(n + 1) {
            return Err(error);
        }
        tokio::time::sleep(policy.delay(n)).await;
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> Backoff {
        Backoff {
            max_attempts: Some(max_attempts),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_polling_defaults_never_give_up() {
        let policy = Backoff::for_polling(&ClientConfig::default());
        assert_eq!(policy.max_attempts, None);
        assert!(policy.allows(u32::MAX));
        assert!(policy.jitter);
    }

    #[test]
    fn test_polling_with_limit() {
        let client = ClientConfig {
            max_polls: 3,
            ..Default::default()
        };
        let policy = Backoff::for_polling(&client);
        assert!(policy.allows(2));
        assert!(!policy.allows(3));
    }

    #[test]
    fn test_binding_doubles() {
        let policy = Backoff::for_binding(&ServerConfig::default());
        assert_eq!(policy.max_attempts, Some(8));
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(8));
        assert_eq!(policy.delay(20), Duration::from_secs(60));
    }

    #[test]
    fn test_once() {
        let policy = Backoff::once();
        assert!(policy.allows(0));
        assert!(!policy.allows(1));
    }

    #[test]
    fn test_jitter_stretches_by_at_most_a_quarter() {
        let policy = Backoff {
            max_attempts: None,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_millis(200),
            multiplier: 1.5,
            jitter: true,
        };

        for attempt in 0..50 {
            let delay = policy.delay(attempt);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay < Duration::from_millis(250));
        }
    }

    #[tokio::test]
    async fn test_with_backoff_until_done() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = with_backoff(&fast(5), |n| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Attempt::Again("wait")
                } else {
                    Attempt::Done(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_backoff_abort_is_immediate() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = with_backoff(&fast(5), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Attempt::Abort("nack") }
        })
        .await;

        assert_eq!(result, Err("nack"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_backoff_returns_last_error() {
        let result: Result<(), u32> =
            with_backoff(&fast(3), |n| async move { Attempt::Again(n) }).await;
        assert_eq!(result, Err(2));
    }
}
