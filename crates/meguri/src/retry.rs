//! Opt-in retry and timeout wrapper for steps that call flaky collaborators.

use async_trait::async_trait;
use meguri_core::{RetryPolicy, State, Step, StepConfig, StepError, Update};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

/// A step re-invoked according to a [`RetryPolicy`], with an optional
/// per-attempt timeout.
///
/// The engine never retries; registering a `Retrying` step is how a graph
/// opts in for a single step.
///
/// # Examples
///
/// ```
/// use meguri::prelude::*;
/// use std::time::Duration;
///
/// let search = from_fn(|_| Ok(Update::new()))
///     .with_retry(RetryPolicy::fixed(3, Duration::from_millis(100)))
///     .with_timeout(Duration::from_secs(5));
/// assert_eq!(search.config().retry_policy.max_retries(), 3);
/// ```
#[derive(Debug)]
pub struct Retrying<S> {
    inner: S,
    config: StepConfig,
}

impl<S: Step> Retrying<S> {
    /// Wraps a step with the given settings.
    pub fn new(inner: S, config: StepConfig) -> Self {
        Self { inner, config }
    }

    /// Replaces the retry policy.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry_policy = policy;
        self
    }

    /// Sets the per-attempt timeout.
    pub fn with_timeout(mut self, duration: Duration) -> Self {
        self.config.timeout = Some(duration);
        self
    }

    /// Returns the wrapper settings.
    pub fn config(&self) -> &StepConfig {
        &self.config
    }

    /// Returns the wrapped step.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn attempt(&self, state: &State) -> Result<Update, StepError> {
        match self.config.timeout {
            Some(limit) => match timeout(limit, self.inner.execute(state)).await {
                Ok(result) => result,
                Err(_) => Err(StepError::Timeout(limit)),
            },
            None => self.inner.execute(state).await,
        }
    }
}

#[async_trait]
impl<S: Step> Step for Retrying<S> {
    async fn execute(&self, state: &State) -> Result<Update, StepError> {
        let policy = &self.config.retry_policy;
        let max_retries = policy.max_retries();
        let mut attempt = 0;

        loop {
            match self.attempt(state).await {
                Ok(update) => return Ok(update),
                Err(e) if attempt >= max_retries => {
                    if max_retries > 0 {
                        warn!("{:?} failed after {} retries: {}", self.inner, attempt, e);
                    }
                    return Err(e);
                }
                Err(e) => {
                    info!(
                        "{:?} failed ({}), retrying ({}/{})",
                        self.inner,
                        e,
                        attempt + 1,
                        max_retries
                    );
                    if let Some(delay) = policy.delay_for_attempt(attempt) {
                        sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Adapters available on every step.
pub trait StepExt: Step + Sized {
    /// Wraps the step with a retry policy.
    fn with_retry(self, policy: RetryPolicy) -> Retrying<Self> {
        Retrying::new(self, StepConfig::default()).with_retry(policy)
    }

    /// Wraps the step with a per-attempt timeout.
    fn with_timeout(self, duration: Duration) -> Retrying<Self> {
        Retrying::new(self, StepConfig::default()).with_timeout(duration)
    }
}

impl<S: Step> StepExt for S {}
