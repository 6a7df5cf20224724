//! Step trait and related types.

use crate::error::StepError;
use crate::retry::RetryPolicy;
use crate::state::{State, Update};
use async_trait::async_trait;
use std::fmt::{self, Debug};
use std::future::Future;
use std::time::Duration;

name_type!(
    /// Type-safe step name wrapper.
    StepName
);

/// A processing step of a state graph.
///
/// A step reads the current [`State`] and returns a partial [`Update`]; it
/// never mutates the state it receives. Steps may call external services,
/// but only the returned update affects later steps.
///
/// # Examples
///
/// ```
/// use meguri_core::{State, Step, StepError, Update};
/// use async_trait::async_trait;
///
/// #[derive(Debug)]
/// struct Critic;
///
/// #[async_trait]
/// impl Step for Critic {
///     async fn execute(&self, state: &State) -> Result<Update, StepError> {
///         let score = state.get_as::<f64>("quality").unwrap_or_default();
///         Ok(Update::new().set("verdict", score > 0.8))
///     }
/// }
/// ```
#[async_trait]
pub trait Step: Send + Sync + Debug {
    /// Executes the step logic.
    ///
    /// # Returns
    ///
    /// - `Ok(update)` - Writes to merge into the state (possibly empty)
    /// - `Err(error)` - Step failed; the run halts
    async fn execute(&self, state: &State) -> Result<Update, StepError>;
}

/// Step backed by a synchronous closure. Created by [`from_fn`].
pub struct FnStep<F> {
    f: F,
}

impl<F> Debug for FnStep<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStep").finish_non_exhaustive()
    }
}

/// Wraps a closure `Fn(&State) -> Result<Update, StepError>` as a step.
///
/// ```
/// use meguri_core::{from_fn, Update};
///
/// let check = from_fn(|_state| Ok(Update::new()));
/// ```
pub fn from_fn<F>(f: F) -> FnStep<F>
where
    F: Fn(&State) -> Result<Update, StepError> + Send + Sync,
{
    FnStep { f }
}

#[async_trait]
impl<F> Step for FnStep<F>
where
    F: Fn(&State) -> Result<Update, StepError> + Send + Sync,
{
    async fn execute(&self, state: &State) -> Result<Update, StepError> {
        (self.f)(state)
    }
}

/// Step backed by an async closure. Created by [`from_async_fn`].
pub struct AsyncFnStep<F> {
    f: F,
}

impl<F> Debug for AsyncFnStep<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncFnStep").finish_non_exhaustive()
    }
}

/// Wraps an async closure as a step.
///
/// The closure receives its own copy of the state snapshot so the returned
/// future can be `'static`.
pub fn from_async_fn<F, Fut>(f: F) -> AsyncFnStep<F>
where
    F: Fn(State) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Update, StepError>> + Send + 'static,
{
    AsyncFnStep { f }
}

#[async_trait]
impl<F, Fut> Step for AsyncFnStep<F>
where
    F: Fn(State) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Update, StepError>> + Send + 'static,
{
    async fn execute(&self, state: &State) -> Result<Update, StepError> {
        (self.f)(state.clone()).await
    }
}

/// Configuration for wrapping a step with a timeout and retry policy.
///
/// The engine itself applies neither; see the retrying wrapper in the
/// `meguri` crate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepConfig {
    /// Maximum time allowed for a single attempt.
    pub timeout: Option<Duration>,
    /// Retry policy when an attempt fails.
    pub retry_policy: RetryPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_name() {
        let name = StepName::new("generate");
        assert_eq!(name.as_str(), "generate");

        let name: StepName = "generate".into();
        assert_eq!(name.to_string(), "generate");
    }

    #[test]
    fn test_fn_step() {
        let step = from_fn(|state: &State| {
            let n = state.get_as::<i64>("n").unwrap_or(0);
            Ok(Update::new().set("n", n + 1))
        });

        let update = tokio_test::block_on(step.execute(&State::default())).expect("step");
        assert_eq!(update, Update::new().set("n", 1));
    }

    #[test]
    fn test_async_fn_step() {
        let step = from_async_fn(|state: State| async move {
            if state.is_empty() {
                Err(StepError::failed("empty state"))
            } else {
                Ok(Update::new())
            }
        });

        let result = tokio_test::block_on(step.execute(&State::default()));
        assert!(matches!(result, Err(StepError::Failed(msg)) if msg == "empty state"));
    }

    #[test]
    fn test_step_config_default() {
        let config = StepConfig::default();
        assert_eq!(config.timeout, None);
        assert_eq!(config.retry_policy, RetryPolicy::None);
        assert_eq!(json!(StepName::new("x")), json!("x"));
    }
}
