//! Error types for graph construction and execution.

use crate::channel::ValueType;
use crate::route::Label;
use crate::state::ChannelName;
use crate::step::StepName;
use std::time::Duration;
use thiserror::Error;

/// Boxed error raised by an external collaborator inside a step body.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Structural defects detected while declaring channels or compiling a graph.
///
/// No graph that produced one of these is ever runnable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SchemaError {
    /// `set_entry` was never called.
    #[error("No entry step was set")]
    NoEntry,

    /// `set_entry` was called more than once.
    #[error("Entry step set more than once: '{first}' and '{second}'")]
    MultipleEntries {
        /// The first entry that was set.
        first: StepName,
        /// The conflicting entry.
        second: StepName,
    },

    /// The entry names a step that was never added.
    #[error("Entry step '{0}' is not declared")]
    EntryNotDeclared(StepName),

    /// Two steps share a name.
    #[error("Step '{0}' is declared more than once")]
    DuplicateStep(StepName),

    /// Two channels share a name.
    #[error("Channel '{0}' is declared more than once")]
    DuplicateChannel(ChannelName),

    /// A reducer cannot combine values of the channel's declared type.
    #[error("Reducer '{reducer}' cannot be used on channel '{channel}' of type {value_type}")]
    IncompatibleReducer {
        /// The channel being declared.
        channel: ChannelName,
        /// Name of the reducer policy.
        reducer: &'static str,
        /// The channel's declared value type.
        value_type: ValueType,
    },

    /// A channel's default value does not match its declared type.
    #[error("Default value of channel '{0}' does not match its declared type")]
    InvalidDefault(ChannelName),

    /// An edge leaves a step that was never added.
    #[error("Edge declared from undeclared step '{0}'")]
    UndeclaredSource(StepName),

    /// A static edge points at a step that was never added.
    #[error("Edge '{from}' -> '{to}' targets an undeclared step")]
    DanglingEdge {
        /// Source step of the edge.
        from: StepName,
        /// The missing target.
        to: StepName,
    },

    /// A conditional edge maps a label to a step that was never added.
    #[error("Route '{label}' from step '{from}' targets undeclared step '{target}'")]
    DanglingRoute {
        /// Source step of the conditional edge.
        from: StepName,
        /// The label whose target is missing.
        label: Label,
        /// The missing target.
        target: StepName,
    },

    /// A conditional edge declares the same label twice.
    #[error("Route '{label}' is declared more than once on step '{from}'")]
    DuplicateLabel {
        /// Source step of the conditional edge.
        from: StepName,
        /// The repeated label.
        label: Label,
    },

    /// A conditional edge has no labels at all.
    #[error("Conditional edge from step '{0}' has no routes")]
    EmptyRoutes(StepName),

    /// A step has both a static and a conditional edge.
    #[error("Step '{0}' has both a static and a conditional edge")]
    ConflictingTransitions(StepName),

    /// A step has two edges of the same kind.
    #[error("Step '{0}' has more than one outgoing edge")]
    DuplicateTransition(StepName),

    /// A step has no outgoing edge.
    #[error("Step '{0}' has no outgoing edge")]
    MissingTransition(StepName),
}

/// A write or initial value rejected by the channel schema.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ChannelError {
    /// The channel is not declared in the schema.
    #[error("Unknown channel: {0}")]
    UnknownChannel(ChannelName),

    /// The value does not match the channel's declared type.
    #[error("Channel '{channel}' expects {expected}, got {found}")]
    TypeMismatch {
        /// The channel being written.
        channel: ChannelName,
        /// The declared type (element type for append channels).
        expected: ValueType,
        /// Kind of the offending value.
        found: &'static str,
    },
}

/// Failure raised from inside a step body.
///
/// The engine never retries these; wrap the step in a retrying adapter if
/// the collaborator it calls is flaky.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StepError {
    /// The step reported a failure.
    #[error("{0}")]
    Failed(String),

    /// The step did not finish within its allotted time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// An external collaborator failed.
    #[error(transparent)]
    External(#[from] BoxError),
}

impl StepError {
    /// Creates a [`StepError::Failed`] from a message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Why a run halted with an error status.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ExecutionError {
    /// The step body returned an error.
    #[error("step failed: {0}")]
    StepFailed(#[source] StepError),

    /// The step's update (or the initial state) violated the channel schema.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// A routing function returned a label absent from its route map.
    #[error("routing returned unmapped label '{0}'")]
    UnmappedLabel(Label),

    /// A step name resolved at run time has no node in the compiled graph.
    ///
    /// `compile()` rejects dangling edges and routes, so a compiled graph
    /// never produces this; it reports a broken graph invariant instead of
    /// panicking.
    #[error("step not found: {0}")]
    StepNotFound(StepName),

    /// The caller cancelled the run between iterations.
    #[error("run cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_display() {
        let error = SchemaError::DanglingRoute {
            from: StepName::new("check"),
            label: Label::new("loop"),
            target: StepName::new("missing"),
        };
        assert_eq!(
            error.to_string(),
            "Route 'loop' from step 'check' targets undeclared step 'missing'"
        );
        assert_eq!(SchemaError::NoEntry.to_string(), "No entry step was set");
    }

    #[test]
    fn test_channel_error_display() {
        let error = ChannelError::TypeMismatch {
            channel: ChannelName::new("quality"),
            expected: ValueType::Number,
            found: "string",
        };
        assert_eq!(error.to_string(), "Channel 'quality' expects number, got string");
    }

    #[test]
    fn test_step_error_from_external() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "connection reset");
        let error = StepError::from(Box::new(io) as BoxError);
        assert!(matches!(error, StepError::External(_)));
        assert_eq!(error.to_string(), "connection reset");
    }

    #[test]
    fn test_execution_error_source_chain() {
        use std::error::Error as _;

        let error = ExecutionError::StepFailed(StepError::failed("model unavailable"));
        assert_eq!(error.to_string(), "step failed: model unavailable");
        assert_eq!(
            ExecutionError::StepNotFound(StepName::new("ghost")).to_string(),
            "step not found: ghost"
        );
        assert_eq!(
            error.source().map(|s| s.to_string()),
            Some("model unavailable".to_string())
        );
    }
}
