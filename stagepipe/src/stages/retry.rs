//! Retry decorator with attempt-indexed exponential backoff.

use super::{guard_panics, Stage, StageValue};
use crate::errors::{RetryError, StageFailure};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt, in milliseconds.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }
}

type ShouldRetry = Arc<dyn Fn(&StageFailure) -> bool + Send + Sync>;

/// Immutable retry policy shared by every execution of a [`RetryStage`].
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    should_retry: ShouldRetry,
}

impl RetryPolicy {
    /// Creates a policy retrying every failure.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            should_retry: Arc::new(|_| true),
        }
    }

    /// Creates a policy from its serializable form.
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.base_delay_ms))
    }

    /// Sets the predicate deciding whether a failure is worth another attempt.
    #[must_use]
    pub fn with_should_retry(
        mut self,
        predicate: impl Fn(&StageFailure) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry = Arc::new(predicate);
        self
    }

    /// Returns the maximum number of attempts.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the base delay.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Returns true if `failure` may be retried.
    pub fn should_retry(&self, failure: &StageFailure) -> bool {
        (self.should_retry)(failure)
    }

    /// Delay to wait after the failed attempt `attempt` (1-based):
    /// `base_delay * 2^(attempt - 1)`, saturating.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        2_u32
            .checked_pow(attempt.saturating_sub(1))
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .finish_non_exhaustive()
    }
}

/// Awaitable used between attempts.
#[async_trait]
pub trait Delay: Send + Sync {
    /// Waits for `duration`.
    async fn wait(&self, duration: Duration);
}

/// [`Delay`] backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDelay;

#[async_trait]
impl Delay for TokioDelay {
    async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Stage retrying an inner stage according to a [`RetryPolicy`].
///
/// The input is cloned for every attempt. A failure rejected by the policy
/// predicate is returned immediately; once attempts run out the last failure
/// is returned as-is. A panicking inner stage is not retried and surfaces as
/// a [`RetryError`] naming it. With zero attempts the inner stage never runs.
pub struct RetryStage<In, Out> {
    name: String,
    inner: Arc<dyn Stage<In, Out>>,
    policy: RetryPolicy,
    delay: Arc<dyn Delay>,
}

impl<In, Out> RetryStage<In, Out>
where
    In: StageValue,
    Out: StageValue,
{
    /// Wraps `inner` with `policy`, waiting on the tokio timer.
    pub fn new(inner: impl Stage<In, Out> + 'static, policy: RetryPolicy) -> Self {
        Self {
            name: "RetryStage".to_string(),
            inner: Arc::new(inner),
            policy,
            delay: Arc::new(TokioDelay),
        }
    }

    /// Replaces the awaitable used between attempts.
    #[must_use]
    pub fn with_delay(mut self, delay: impl Delay + 'static) -> Self {
        self.delay = Arc::new(delay);
        self
    }

    /// Sets the stage name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Returns the policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl<In: StageValue, Out: StageValue> fmt::Debug for RetryStage<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryStage")
            .field("name", &self.name)
            .field("inner", &self.inner.name())
            .field("policy", &self.policy)
            .finish()
    }
}

#[async_trait]
impl<In, Out> Stage<In, Out> for RetryStage<In, Out>
where
    In: StageValue,
    Out: StageValue,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: In) -> Result<Out, StageFailure> {
        let inner_name = self.inner.name();
        let max_attempts = self.policy.max_attempts;

        if max_attempts == 0 {
            return Err(RetryError::new("Immediate failure", inner_name).into());
        }

        let mut attempt = 1;
        loop {
            let failure = match guard_panics(self.inner.execute(input.clone())).await {
                Ok(output) => {
                    debug!(stage = %self.name, inner = %inner_name, attempt, "Attempt succeeded");
                    return Ok(output);
                }
                Err(failure) => failure,
            };

            if failure.is_unknown() {
                return Err(RetryError::new("Non-error thrown", inner_name).into());
            }

            if !self.policy.should_retry(&failure) {
                debug!(stage = %self.name, inner = %inner_name, attempt, error = %failure, "Failure is not retryable");
                return Err(failure);
            }

            if attempt >= max_attempts {
                warn!(stage = %self.name, inner = %inner_name, attempts = attempt, error = %failure, "Retry attempts exhausted");
                return Err(failure);
            }

            let delay = self.policy.delay_for_attempt(attempt);
            debug!(
                stage = %self.name,
                inner = %inner_name,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %failure,
                "Attempt failed, backing off"
            );
            self.delay.wait(delay).await;
            attempt += 1;
        }
    }
}
