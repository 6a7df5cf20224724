//! Graph definition, validation and the compiled, run-ready graph.

use meguri_core::{ChannelSchema, Label, Router, SchemaError, State, Step, StepName};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use crate::executor::{Executor, RunConfig, RunOutcome};

/// Where a transition leads: another step or the end of the run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// Continue with the named step.
    Step(StepName),
    /// Terminal sentinel; the run completes.
    End,
}

/// The terminal sentinel.
pub const END: Target = Target::End;

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Step(name) => write!(f, "{}", name),
            Target::End => f.write_str("__end__"),
        }
    }
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        Target::Step(StepName::new(s))
    }
}

impl From<String> for Target {
    fn from(s: String) -> Self {
        Target::Step(StepName::from(s))
    }
}

impl From<StepName> for Target {
    fn from(name: StepName) -> Self {
        Target::Step(name)
    }
}

pub(crate) enum Transition {
    Static(Target),
    Conditional {
        router: Box<dyn Router>,
        routes: HashMap<Label, Target>,
    },
}

pub(crate) struct Node {
    pub(crate) step: Box<dyn Step>,
    pub(crate) transition: Transition,
}

struct ConditionalEdge {
    from: StepName,
    router: Box<dyn Router>,
    routes: Vec<(Label, Target)>,
}

/// Builder for a cyclic state graph.
///
/// Declarations are only checked by [`compile`](Self::compile), which reports
/// the first structural defect.
///
/// # Examples
///
/// ```
/// use meguri::prelude::*;
///
/// let schema = ChannelSchema::builder()
///     .overwrite("done", ValueType::Boolean)
///     .build()
///     .unwrap();
///
/// let graph = StateGraph::new(schema)
///     .add_step("work", from_fn(|_| Ok(Update::new().set("done", true))))
///     .add_edge("work", END)
///     .set_entry("work")
///     .compile()
///     .unwrap();
///
/// assert_eq!(graph.entry().as_str(), "work");
/// ```
pub struct StateGraph {
    schema: ChannelSchema,
    steps: Vec<(StepName, Box<dyn Step>)>,
    edges: Vec<(StepName, Target)>,
    conditional_edges: Vec<ConditionalEdge>,
    entries: Vec<StepName>,
}

impl fmt::Debug for StateGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateGraph")
            .field("steps", &self.steps.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("edges", &self.edges)
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

impl StateGraph {
    /// Creates an empty graph over the given channel schema.
    pub fn new(schema: ChannelSchema) -> Self {
        Self {
            schema,
            steps: Vec::new(),
            edges: Vec::new(),
            conditional_edges: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Adds a named step.
    pub fn add_step<S: Step + 'static>(mut self, name: impl Into<StepName>, step: S) -> Self {
        self.steps.push((name.into(), Box::new(step)));
        self
    }

    /// Adds an unconditional transition taken after `from` completes.
    pub fn add_edge(mut self, from: impl Into<StepName>, to: impl Into<Target>) -> Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    /// Adds a data-dependent transition from `from`.
    ///
    /// After `from` completes, `router` is called with the post-merge state
    /// and its label is looked up in `routes`.
    pub fn add_conditional_edge<R, L, T, I>(
        mut self,
        from: impl Into<StepName>,
        router: R,
        routes: I,
    ) -> Self
    where
        R: Router + 'static,
        L: Into<Label>,
        T: Into<Target>,
        I: IntoIterator<Item = (L, T)>,
    {
        self.conditional_edges.push(ConditionalEdge {
            from: from.into(),
            router: Box::new(router),
            routes: routes
                .into_iter()
                .map(|(label, target)| (label.into(), target.into()))
                .collect(),
        });
        self
    }

    /// Sets the entry step.
    pub fn set_entry(mut self, name: impl Into<StepName>) -> Self {
        self.entries.push(name.into());
        self
    }

    /// Validates the declarations and produces an immutable, run-ready graph.
    ///
    /// Reachability from the entry is not checked; unreachable steps are inert.
    pub fn compile(self) -> Result<CompiledGraph, SchemaError> {
        let entry = match self.entries.as_slice() {
            [] => return Err(SchemaError::NoEntry),
            [entry] => entry.clone(),
            [first, second, ..] => {
                return Err(SchemaError::MultipleEntries {
                    first: first.clone(),
                    second: second.clone(),
                })
            }
        };

        let mut declared = HashSet::with_capacity(self.steps.len());
        for (name, _) in &self.steps {
            if !declared.insert(name.clone()) {
                return Err(SchemaError::DuplicateStep(name.clone()));
            }
        }
        if !declared.contains(&entry) {
            return Err(SchemaError::EntryNotDeclared(entry));
        }

        let mut transitions: HashMap<StepName, Transition> = HashMap::new();

        for (from, to) in self.edges {
            if !declared.contains(&from) {
                return Err(SchemaError::UndeclaredSource(from));
            }
            if let Target::Step(name) = &to {
                if !declared.contains(name) {
                    return Err(SchemaError::DanglingEdge {
                        from,
                        to: name.clone(),
                    });
                }
            }
            if transitions.contains_key(&from) {
                return Err(SchemaError::DuplicateTransition(from));
            }
            transitions.insert(from, Transition::Static(to));
        }

        for edge in self.conditional_edges {
            let from = edge.from;
            if !declared.contains(&from) {
                return Err(SchemaError::UndeclaredSource(from));
            }
            match transitions.get(&from) {
                Some(Transition::Static(_)) => {
                    return Err(SchemaError::ConflictingTransitions(from))
                }
                Some(Transition::Conditional { .. }) => {
                    return Err(SchemaError::DuplicateTransition(from))
                }
                None => {}
            }
            if edge.routes.is_empty() {
                return Err(SchemaError::EmptyRoutes(from));
            }

            let mut routes = HashMap::with_capacity(edge.routes.len());
            for (label, target) in edge.routes {
                if let Target::Step(name) = &target {
                    if !declared.contains(name) {
                        return Err(SchemaError::DanglingRoute {
                            from,
                            label,
                            target: name.clone(),
                        });
                    }
                }
                if routes.contains_key(&label) {
                    return Err(SchemaError::DuplicateLabel { from, label });
                }
                routes.insert(label, target);
            }
            transitions.insert(
                from,
                Transition::Conditional {
                    router: edge.router,
                    routes,
                },
            );
        }

        let mut order = Vec::with_capacity(self.steps.len());
        let mut nodes = HashMap::with_capacity(self.steps.len());
        for (name, step) in self.steps {
            let transition = transitions
                .remove(&name)
                .ok_or_else(|| SchemaError::MissingTransition(name.clone()))?;
            order.push(name.clone());
            nodes.insert(name, Node { step, transition });
        }

        Ok(CompiledGraph {
            schema: self.schema,
            nodes,
            order,
            entry,
        })
    }
}

/// An immutable, validated graph.
///
/// A compiled graph can be shared (for example through an `Arc`) across any
/// number of concurrent runs; each run owns its own state.
pub struct CompiledGraph {
    schema: ChannelSchema,
    nodes: HashMap<StepName, Node>,
    order: Vec<StepName>,
    entry: StepName,
}

impl fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("steps", &self.order)
            .field("entry", &self.entry)
            .finish()
    }
}

impl CompiledGraph {
    /// Returns the entry step.
    pub fn entry(&self) -> &StepName {
        &self.entry
    }

    /// Returns the channel schema.
    pub fn schema(&self) -> &ChannelSchema {
        &self.schema
    }

    /// Returns step names in declaration order.
    pub fn step_names(&self) -> impl Iterator<Item = &StepName> {
        self.order.iter()
    }

    /// Returns `true` if a step with the given name exists.
    pub fn has_step(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Returns the number of steps.
    pub fn step_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    /// Runs the graph from its entry until it completes, fails, or any step
    /// is about to execute more than `max_iterations` times.
    pub async fn run(&self, initial_state: State, max_iterations: usize) -> RunOutcome {
        self.run_with(initial_state, RunConfig::new(max_iterations))
            .await
    }

    /// Runs the graph with explicit run settings.
    pub async fn run_with(&self, initial_state: State, config: RunConfig) -> RunOutcome {
        Executor::new(self, config).run(initial_state).await
    }

    /// Returns a serializable view of the graph's adjacency table.
    pub fn topology(&self) -> Topology {
        let channels = self
            .schema
            .channels()
            .map(|c| ChannelInfo {
                name: c.name().to_string(),
                value_type: c.value_type().to_string(),
                reducer: c.reducer().name(),
            })
            .collect();

        let transitions = self
            .order
            .iter()
            .filter_map(|name| {
                let node = self.nodes.get(name)?;
                let info = match &node.transition {
                    Transition::Static(to) => TransitionInfo::Static { to: to.clone() },
                    Transition::Conditional { routes, .. } => TransitionInfo::Conditional {
                        routes: routes
                            .iter()
                            .map(|(l, t)| (l.clone(), t.clone()))
                            .collect(),
                    },
                };
                Some((name.clone(), info))
            })
            .collect();

        Topology {
            entry: self.entry.clone(),
            steps: self.order.clone(),
            channels,
            transitions,
        }
    }
}

/// Serializable snapshot of a compiled graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Topology {
    /// The entry step.
    pub entry: StepName,
    /// Steps in declaration order.
    pub steps: Vec<StepName>,
    /// Declared channels.
    pub channels: Vec<ChannelInfo>,
    /// Outgoing transition of every step.
    pub transitions: BTreeMap<StepName, TransitionInfo>,
}

/// A channel as shown in a [`Topology`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelInfo {
    /// Channel name.
    pub name: String,
    /// Declared value type.
    pub value_type: String,
    /// Reducer policy name.
    pub reducer: &'static str,
}

/// A transition as shown in a [`Topology`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionInfo {
    /// Unconditional edge.
    Static {
        /// Where it leads.
        to: Target,
    },
    /// Routed edge.
    Conditional {
        /// Label to target mapping.
        routes: BTreeMap<Label, Target>,
    },
}
