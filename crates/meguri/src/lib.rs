//! A small cyclic state-graph engine.
//!
//! Named steps read an immutable [`State`] and return partial [`Update`]s,
//! which are merged per channel by the schema's reducers. Static and
//! conditional edges pick the next step, and a mandatory iteration cap
//! bounds every run.
//!
//! # Example
//!
//! A generator/critic loop that stops once the draft is good enough:
//!
//! ```rust
//! use meguri::prelude::*;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let schema = ChannelSchema::builder()
//!     .append("messages", ValueType::String)
//!     .overwrite("quality", ValueType::Number)
//!     .overwrite("iterations", ValueType::Integer)
//!     .build()?;
//!
//! let graph = StateGraph::new(schema)
//!     .add_step("gen", from_fn(|state| {
//!         let n = state.get_as::<i64>("iterations").unwrap_or(0);
//!         Ok(Update::new()
//!             .set("messages", "draft")
//!             .set("quality", 0.9)
//!             .set("iterations", n + 1))
//!     }))
//!     .add_step("check", from_fn(|_| Ok(Update::new())))
//!     .add_edge("gen", "check")
//!     .add_conditional_edge(
//!         "check",
//!         |state: &State| {
//!             if state.get_as::<f64>("quality").unwrap_or(0.0) > 0.8 { "stop" } else { "loop" }
//!         },
//!         [("stop", END), ("loop", "gen".into())],
//!     )
//!     .set_entry("gen")
//!     .compile()?;
//!
//! let initial = graph.schema().default_state();
//! let outcome = graph.run(initial, 10).await;
//!
//! assert!(outcome.status.is_completed());
//! assert_eq!(outcome.state.get("messages"), Some(&json!(["draft"])));
//! assert_eq!(outcome.trace, vec![StepName::new("gen"), StepName::new("check")]);
//! # Ok(())
//! # }
//! ```

mod executor;
mod graph;
mod retry;

// Re-export core types
pub use meguri_core::*;

pub use executor::{RunConfig, RunOutcome, RunStatus};
pub use graph::{ChannelInfo, CompiledGraph, StateGraph, Target, Topology, TransitionInfo, END};
pub use retry::{Retrying, StepExt};
pub use tokio_util::sync::CancellationToken;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        from_async_fn, from_fn, Channel, ChannelError, ChannelSchema, CompiledGraph, ExecutionError,
        Label, Reducer, RetryPolicy, Retrying, Router, RunConfig, RunOutcome, RunStatus,
        SchemaError, State, StateGraph, Step, StepError, StepExt, StepName, Target, Update,
        ValueType, END,
    };
}
