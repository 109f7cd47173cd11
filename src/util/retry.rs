//! Retry with exponential backoff and jitter.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How a failed attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retryable,
    Fatal,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound for the un-jittered delay.
    pub max_delay: Duration,
    /// Spread applied around each delay, in `0.0..=1.0`.
    pub jitter_fraction: f64,
    /// Wall-clock budget across all attempts and sleeps.
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_fraction: 0.25,
            max_elapsed: Duration::from_secs(120),
        }
    }
}

/// Attempt bookkeeping for one logical operation.
#[derive(Debug, Clone)]
pub struct RetryState {
    pub attempts: u32,
    pub last_error: Option<String>,
    started: Instant,
}

impl RetryState {
    pub fn new() -> Self {
        Self {
            attempts: 0,
            last_error: None,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}

/// Why [`RetryPolicy::execute`] gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The classifier marked the failure as not worth retrying.
    Fatal(E),
    /// Attempts or time budget ran out. `last_error` is `None` when no attempt
    /// completed with an error (zero attempts, or the last one overran the budget).
    Exhausted {
        attempts: u32,
        elapsed: Duration,
        last_error: Option<E>,
    },
    Cancelled,
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fatal(error) => write!(f, "{error}"),
            Self::Exhausted {
                attempts,
                elapsed,
                last_error: Some(error),
            } => write!(f, "gave up after {attempts} attempt(s) in {elapsed:?}: {error}"),
            Self::Exhausted {
                attempts, elapsed, ..
            } => write!(f, "gave up after {attempts} attempt(s) in {elapsed:?}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl<E> std::error::Error for RetryError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Fatal(error) => Some(error),
            Self::Exhausted {
                last_error: Some(error),
                ..
            } => Some(error),
            _ => None,
        }
    }
}

impl RetryPolicy {
    /// Policy for browser interactions: fewer, quicker attempts than network calls.
    pub fn for_ui() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            jitter_fraction: 0.25,
            max_elapsed: Duration::from_secs(60),
        }
    }

    /// Un-jittered delay after attempt `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(Duration::MAX)
            .min(self.max_delay)
    }

    /// Delay after attempt `attempt`, spread by `sample` in `[0, 1]` across
    /// `backoff_delay * (1 ± jitter_fraction)`.
    pub fn jittered_delay(&self, attempt: u32, sample: f64) -> Duration {
        let jitter = self.jitter_fraction.clamp(0.0, 1.0);
        let factor = 1.0 - jitter + 2.0 * jitter * sample.clamp(0.0, 1.0);
        let delay = self.backoff_delay(attempt);
        Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(delay)
    }

    /// Execute an async operation with retry.
    pub async fn execute<T, E, F, Fut, C>(
        &self,
        operation: F,
        classify: C,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> RetryDecision,
        E: fmt::Display,
    {
        let mut state = RetryState::new();
        self.run(&mut state, &CancellationToken::new(), operation, classify)
            .await
    }

    /// Like [`execute`](Self::execute) but stops as soon as `cancel` fires,
    /// including in the middle of a backoff sleep.
    pub async fn execute_with_cancel<T, E, F, Fut, C>(
        &self,
        cancel: &CancellationToken,
        operation: F,
        classify: C,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> RetryDecision,
        E: fmt::Display,
    {
        let mut state = RetryState::new();
        self.run(&mut state, cancel, operation, classify).await
    }

    /// Core retry loop. `state` is updated in place so callers can record the
    /// attempt count whatever the result.
    pub async fn run<T, E, F, Fut, C>(
        &self,
        state: &mut RetryState,
        cancel: &CancellationToken,
        mut operation: F,
        classify: C,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> RetryDecision,
        E: fmt::Display,
    {
        let mut last_error = None;

        while state.attempts < self.max_attempts {
            let remaining = match self.max_elapsed.checked_sub(state.elapsed()) {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => break,
            };

            state.attempts += 1;
            let attempt = state.attempts;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                outcome = tokio::time::timeout(remaining, operation()) => outcome,
            };

            let error = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(error)) => error,
                Err(_) => {
                    tracing::warn!(attempt, budget = ?self.max_elapsed, "Attempt overran retry budget");
                    state.last_error = Some(format!("attempt exceeded remaining budget of {remaining:?}"));
                    last_error = None;
                    break;
                }
            };

            if classify(&error) == RetryDecision::Fatal {
                state.last_error = Some(error.to_string());
                return Err(RetryError::Fatal(error));
            }
            state.last_error = Some(error.to_string());

            if attempt >= self.max_attempts {
                last_error = Some(error);
                break;
            }

            let delay = self.jittered_delay(attempt, jitter_sample());
            if state.elapsed() + delay >= self.max_elapsed {
                tracing::warn!(
                    attempt,
                    elapsed_ms = state.elapsed().as_millis() as u64,
                    error = %error,
                    "Retry budget exhausted"
                );
                last_error = Some(error);
                break;
            }

            tracing::warn!(
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after error"
            );
            last_error = Some(error);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        Err(RetryError::Exhausted {
            attempts: state.attempts,
            elapsed: state.elapsed(),
            last_error,
        })
    }
}

/// Simple pseudo-random sample in [0, 1) without pulling in rand crate.
fn jitter_sample() -> f64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    std::thread::current().id().hash(&mut hasher);

    let hash = hasher.finish();
    (hash % 10000) as f64 / 10000.0
}
