//! Bounded think/act agent loop over the switchboard tool namespace.
//!
//! The engine alternates model completions with tool execution until the
//! model answers without tool calls or the iteration budget runs out.
//! Progress is published through a watch channel; late subscribers see
//! the latest snapshot only.

pub mod dispatch;
pub mod engine;
pub mod error;
pub mod model;
pub mod progress;

pub use {
    dispatch::{DispatchableTool, ToolDispatcher, ToolOutcome},
    engine::{AgentEngine, EngineConfig, RunOutcome},
    error::{Error, Result},
    model::{ChatMessage, CompletionResponse, ModelClient, ToolCall},
    progress::{AgentStep, ProgressChannel, ProgressSnapshot, StepKind, StepStatus},
};
