//! Run loop: invoke step, merge update, resolve the next step, repeat.

use meguri_core::{ExecutionError, State, StepName};
use serde::Deserialize;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::graph::{CompiledGraph, Node, Target, Transition};

/// Settings for a single run.
///
/// The iteration cap is mandatory; there is no unbounded run.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Maximum number of times any single step may execute.
    pub max_iterations: usize,
    /// Checked between iterations; a cancelled run halts with an error status.
    #[serde(skip)]
    pub cancellation: Option<CancellationToken>,
}

impl RunConfig {
    /// Creates a config with the given iteration cap.
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations,
            cancellation: None,
        }
    }

    /// Attaches a cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// How a run ended.
#[derive(Debug)]
#[non_exhaustive]
pub enum RunStatus {
    /// A transition reached the terminal sentinel.
    Completed,
    /// The iteration cap stopped the run. Not a failure: the state is the
    /// best-effort partial result.
    MaxIterationsReached,
    /// The run halted on a step failure or contract violation.
    Error {
        /// The step that failed or whose output was rejected.
        step: StepName,
        /// Why the run halted.
        cause: ExecutionError,
    },
}

impl RunStatus {
    /// Returns `true` for [`RunStatus::Completed`].
    pub fn is_completed(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }

    /// Returns `true` for [`RunStatus::MaxIterationsReached`].
    pub fn is_max_iterations_reached(&self) -> bool {
        matches!(self, RunStatus::MaxIterationsReached)
    }

    /// Returns `true` for [`RunStatus::Error`].
    pub fn is_error(&self) -> bool {
        matches!(self, RunStatus::Error { .. })
    }

    /// Returns the failing step and cause, if the run errored.
    pub fn error(&self) -> Option<(&StepName, &ExecutionError)> {
        match self {
            RunStatus::Error { step, cause } => Some((step, cause)),
            _ => None,
        }
    }
}

/// Result of a run: final state, status and the trace of visited steps.
#[derive(Debug)]
pub struct RunOutcome {
    /// State after the last successful merge, or the caller's initial state
    /// unchanged if the schema rejected it.
    pub state: State,
    /// How the run ended.
    pub status: RunStatus,
    /// Steps in the order they were invoked, including a step that failed.
    pub trace: Vec<StepName>,
    /// Executions of the most-visited step.
    pub iterations: usize,
    /// Total step executions that completed and merged.
    pub steps_executed: usize,
}

impl RunOutcome {
    /// Returns how many times the named step appears in the trace.
    pub fn visits(&self, step: &str) -> usize {
        self.trace.iter().filter(|s| s.as_str() == step).count()
    }
}

/// Per-run bookkeeping, owned exclusively by one executor.
struct ExecutionContext {
    current: StepName,
    state: State,
    visits: HashMap<StepName, usize>,
    iterations: usize,
    steps_executed: usize,
    trace: Vec<StepName>,
}

impl ExecutionContext {
    fn new(entry: StepName, state: State) -> Self {
        Self {
            current: entry,
            state,
            visits: HashMap::new(),
            iterations: 0,
            steps_executed: 0,
            trace: Vec::new(),
        }
    }

    fn visits_of(&self, step: &StepName) -> usize {
        self.visits.get(step).copied().unwrap_or(0)
    }

    fn record_visit(&mut self) {
        let count = self.visits.entry(self.current.clone()).or_insert(0);
        *count += 1;
        self.iterations = self.iterations.max(*count);
        self.steps_executed += 1;
    }

    fn finish(self, status: RunStatus) -> RunOutcome {
        RunOutcome {
            state: self.state,
            status,
            trace: self.trace,
            iterations: self.iterations,
            steps_executed: self.steps_executed,
        }
    }

    fn fail(self, cause: ExecutionError) -> RunOutcome {
        let step = self.current.clone();
        self.finish(RunStatus::Error { step, cause })
    }
}

pub(crate) struct Executor<'g> {
    graph: &'g CompiledGraph,
    config: RunConfig,
}

impl<'g> Executor<'g> {
    pub(crate) fn new(graph: &'g CompiledGraph, config: RunConfig) -> Self {
        Self { graph, config }
    }

    pub(crate) async fn run(self, initial_state: State) -> RunOutcome {
        let span = info_span!(
            "graph_run",
            entry = %self.graph.entry(),
            max_iterations = self.config.max_iterations
        );
        self.run_loop(initial_state).instrument(span).await
    }

    async fn run_loop(self, initial_state: State) -> RunOutcome {
        let entry = self.graph.entry().clone();
        let state = match self.graph.schema().conform(&initial_state) {
            Ok(state) => state,
            Err(e) => {
                warn!("Initial state rejected: {}", e);
                return ExecutionContext::new(entry, initial_state).fail(e.into());
            }
        };
        let mut ctx = ExecutionContext::new(entry, state);

        if self.config.max_iterations == 0 {
            warn!("Iteration cap is 0, no step executed");
            return ctx.finish(RunStatus::MaxIterationsReached);
        }

        loop {
            if self.is_cancelled() {
                warn!("Run cancelled before step '{}'", ctx.current);
                return ctx.fail(ExecutionError::Cancelled);
            }

            // Compiled transitions only name declared steps.
            let Some(node) = self.graph.node(ctx.current.as_str()) else {
                let missing = ctx.current.clone();
                return ctx.fail(ExecutionError::StepNotFound(missing));
            };

            ctx.trace.push(ctx.current.clone());
            debug!("Executing step '{}'", ctx.current);

            let result = node.step.execute(&ctx.state).await;
            let update = match result {
                Ok(update) => update,
                Err(e) => {
                    warn!("Step '{}' failed: {}", ctx.current, e);
                    return ctx.fail(ExecutionError::StepFailed(e));
                }
            };

            let merged = match self.graph.schema().merge(&ctx.state, update) {
                Ok(state) => state,
                Err(e) => {
                    warn!("Update from step '{}' rejected: {}", ctx.current, e);
                    return ctx.fail(e.into());
                }
            };
            ctx.state = merged;
            ctx.record_visit();

            let next = match resolve(node, &ctx.state) {
                Ok(next) => next,
                Err(e) => {
                    warn!("Routing after step '{}' failed: {}", ctx.current, e);
                    return ctx.fail(e);
                }
            };
            debug!("Step '{}' -> {}", ctx.current, next);

            match next {
                Target::End => {
                    info!(
                        "Run completed after {} steps ({} iterations)",
                        ctx.steps_executed, ctx.iterations
                    );
                    return ctx.finish(RunStatus::Completed);
                }
                Target::Step(name) => {
                    if ctx.visits_of(&name) >= self.config.max_iterations {
                        warn!(
                            "Iteration cap {} reached before re-entering step '{}'",
                            self.config.max_iterations, name
                        );
                        return ctx.finish(RunStatus::MaxIterationsReached);
                    }
                    ctx.current = name;
                }
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.config
            .cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

fn resolve(node: &Node, state: &State) -> Result<Target, ExecutionError> {
    match &node.transition {
        Transition::Static(target) => Ok(target.clone()),
        Transition::Conditional { router, routes } => {
            let label = router.route(state);
            routes
                .get(&label)
                .cloned()
                .ok_or(ExecutionError::UnmappedLabel(label))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{StateGraph, END};
    use meguri_core::{from_fn, ChannelSchema, StepError, Update, ValueType};
    use serde_json::json;

    fn counter_schema() -> ChannelSchema {
        ChannelSchema::builder()
            .overwrite("count", ValueType::Integer)
            .append("log", ValueType::String)
            .build()
            .expect("valid schema")
    }

    fn increment() -> impl meguri_core::Step {
        from_fn(|state: &State| {
            let count = state.get_as::<i64>("count").unwrap_or(0);
            Ok(Update::new().set("count", count + 1))
        })
    }

    #[tokio::test]
    async fn test_linear_run_completes() {
        let graph = StateGraph::new(counter_schema())
            .add_step("a", increment())
            .add_step("b", increment())
            .add_edge("a", "b")
            .add_edge("b", END)
            .set_entry("a")
            .compile()
            .expect("valid graph");

        let outcome = graph.run(graph.schema().default_state(), 5).await;
        assert!(outcome.status.is_completed());
        assert_eq!(outcome.state.get("count"), Some(&json!(2)));
        assert_eq!(outcome.trace, vec![StepName::new("a"), StepName::new("b")]);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.steps_executed, 2);
    }

    #[tokio::test]
    async fn test_self_loop_stops_at_cap() {
        let graph = StateGraph::new(counter_schema())
            .add_step("spin", increment())
            .add_edge("spin", "spin")
            .set_entry("spin")
            .compile()
            .expect("valid graph");

        let outcome = graph.run(graph.schema().default_state(), 7).await;
        assert!(outcome.status.is_max_iterations_reached());
        assert_eq!(outcome.trace.len(), 7);
        assert_eq!(outcome.iterations, 7);
        assert_eq!(outcome.state.get("count"), Some(&json!(7)));
    }

    #[tokio::test]
    async fn test_zero_cap_runs_nothing() {
        let graph = StateGraph::new(counter_schema())
            .add_step("a", increment())
            .add_edge("a", END)
            .set_entry("a")
            .compile()
            .expect("valid graph");

        let outcome = graph.run(graph.schema().default_state(), 0).await;
        assert!(outcome.status.is_max_iterations_reached());
        assert!(outcome.trace.is_empty());
        assert_eq!(outcome.state.get("count"), Some(&json!(0)));
    }

    #[tokio::test]
    async fn test_step_failure_halts_with_step_name() {
        let graph = StateGraph::new(counter_schema())
            .add_step("a", increment())
            .add_step("boom", from_fn(|_| Err(StepError::failed("model offline"))))
            .add_edge("a", "boom")
            .add_edge("boom", END)
            .set_entry("a")
            .compile()
            .expect("valid graph");

        let outcome = graph.run(graph.schema().default_state(), 5).await;
        let (step, cause) = outcome.status.error().expect("error status");
        assert_eq!(step.as_str(), "boom");
        assert!(matches!(cause, ExecutionError::StepFailed(StepError::Failed(_))));
        assert_eq!(outcome.trace, vec![StepName::new("a"), StepName::new("boom")]);
        // State keeps the last successful merge.
        assert_eq!(outcome.state.get("count"), Some(&json!(1)));
        assert_eq!(outcome.steps_executed, 1);
    }

    #[tokio::test]
    async fn test_unknown_channel_is_contract_violation() {
        let graph = StateGraph::new(counter_schema())
            .add_step("rogue", from_fn(|_| Ok(Update::new().set("secret", 1))))
            .add_edge("rogue", END)
            .set_entry("rogue")
            .compile()
            .expect("valid graph");

        let outcome = graph.run(graph.schema().default_state(), 5).await;
        let (step, cause) = outcome.status.error().expect("error status");
        assert_eq!(step.as_str(), "rogue");
        assert!(matches!(cause, ExecutionError::Channel(_)));
    }

    #[tokio::test]
    async fn test_unmapped_label_halts() {
        let graph = StateGraph::new(counter_schema())
            .add_step("a", increment())
            .add_conditional_edge("a", |_: &State| "sideways", [("stop", END)])
            .set_entry("a")
            .compile()
            .expect("valid graph");

        let outcome = graph.run(graph.schema().default_state(), 5).await;
        let (step, cause) = outcome.status.error().expect("error status");
        assert_eq!(step.as_str(), "a");
        assert!(matches!(cause, ExecutionError::UnmappedLabel(l) if l.as_str() == "sideways"));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_step() {
        let graph = StateGraph::new(counter_schema())
            .add_step("a", increment())
            .add_edge("a", END)
            .set_entry("a")
            .compile()
            .expect("valid graph");

        let token = CancellationToken::new();
        token.cancel();
        let config = RunConfig::new(5).with_cancellation(token);

        let outcome = graph.run_with(graph.schema().default_state(), config).await;
        assert!(matches!(
            outcome.status,
            RunStatus::Error { cause: ExecutionError::Cancelled, .. }
        ));
        assert!(outcome.trace.is_empty());
    }

    #[test]
    fn test_run_config_deserialize() {
        let config: RunConfig =
            serde_json::from_value(json!({"max_iterations": 25})).expect("valid config");
        assert_eq!(config.max_iterations, 25);
        assert!(config.cancellation.is_none());
    }
}
