//! Workflow execution runtime
//!
//! This crate turns persisted workflow state into an executable graph and
//! runs it: layered scheduling, active-path tracking for routers and
//! conditions, loop and parallel containers, and nested workflows guarded
//! against cycles.

pub mod executor;
pub mod expression;
pub mod handlers;
mod path;
mod registry;
pub mod resolver;
mod runtime;
mod serializer;
mod services;
mod stack;

pub use executor::{ExecutionRequest, Executor};
pub use path::PathTracker;
pub use registry::{BlockRegistry, BlockSpec, ParamDefinition, FUNCTION_EXECUTE_TOOL, HTTP_REQUEST_TOOL};
pub use runtime::{AgentRuntime, RuntimeConfig};
pub use serializer::{provider_for_model, Serializer};
pub use services::{
    ProviderClient, ProviderRequest, ProviderResponse, ProviderStream, Services, TokenUsage,
    ToolInvoker, ToolResponse, WorkflowLoader,
};
pub use stack::{ExecutionGuard, ExecutionStack};
