use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{RelayError, Result};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_secs(1),
            jitter_step: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_jitter_step(mut self, jitter_step: Duration) -> Self {
        self.jitter_step = jitter_step;
        self
    }

    /// `base_delay * 2^attempt + jitter_step * attempt`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .saturating_mul(factor)
            .saturating_add(self.jitter_step.saturating_mul(attempt))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    pub attempt: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
}

impl RetryState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts: max_attempts.max(1),
            last_error: None,
        }
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt + 1 >= self.max_attempts
    }
}

#[derive(Clone)]
pub struct RetryController {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl Default for RetryController {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_sleeper(policy, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { policy, sleeper }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn execute<T, F, Fut>(
        &self,
        cancellation: &CancellationToken,
        mut attempt_fn: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut state = RetryState::new(self.policy.max_attempts);
        loop {
            if cancellation.is_cancelled() {
                return Err(RelayError::Cancelled);
            }
            let outcome = tokio::select! {
                biased;
                _ = cancellation.cancelled() => Err(RelayError::Cancelled),
                result = attempt_fn(state.attempt) => result,
            };
            let err = match outcome {
                Ok(value) => {
                    if state.attempt > 0 {
                        debug!(attempt = state.attempt + 1, "remote call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                warn!(attempt = state.attempt + 1, error = %err, "non-retryable failure");
                return Err(err);
            }
            if state.is_last_attempt() {
                warn!(
                    attempts = state.max_attempts,
                    error = %err,
                    "retry budget exhausted"
                );
                return Err(err);
            }

            let delay = self.policy.delay_for_attempt(state.attempt);
            warn!(
                attempt = state.attempt + 1,
                max_attempts = state.max_attempts,
                delay_ms = delay.as_millis() as u64,
                throttled = err.is_throttled(),
                error = %err,
                "remote call failed, backing off"
            );
            state.last_error = Some(err.to_string());
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => return Err(RelayError::Cancelled),
                _ = self.sleeper.sleep(delay) => {}
            }
            state.attempt += 1;
        }
    }
}
