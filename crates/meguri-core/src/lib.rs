//! Core traits and types for the meguri state-graph engine.
//!
//! This crate provides the runtime-free building blocks. Library authors
//! should depend on it to implement custom steps and routers.
//!
//! # Core Types
//!
//! - [`ChannelSchema`] - Declared state fields and their [`Reducer`] policies
//! - [`State`] / [`Update`] - Immutable snapshots and the partial writes steps return
//! - [`Step`] - The trait for processing steps, with [`from_fn`] / [`from_async_fn`] adapters
//! - [`Router`] - Chooses a [`Label`] for a conditional edge
//! - [`SchemaError`], [`ChannelError`], [`StepError`], [`ExecutionError`] - Error taxonomy
//!
//! # Optional
//!
//! - [`RetryPolicy`] / [`StepConfig`] - Settings for the retrying step wrapper

#[macro_use]
mod name;

mod channel;
mod error;
mod retry;
mod route;
mod state;
mod step;

pub use channel::{Channel, ChannelSchema, ChannelSchemaBuilder, Reducer, ValueType};
pub use error::{BoxError, ChannelError, ExecutionError, SchemaError, StepError};
pub use retry::{RetryPolicy, RetryPolicyError};
pub use route::{Label, Router};
pub use state::{ChannelName, State, Update};
pub use step::{from_async_fn, from_fn, AsyncFnStep, FnStep, Step, StepConfig, StepName};
