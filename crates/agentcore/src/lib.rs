//! Core abstractions for the agent workflow engine
//!
//! This crate provides the executable graph model, the static routing policy,
//! the per-run execution context and the error and event types every other
//! crate depends on. It performs no execution itself.

pub mod context;
mod error;
pub mod events;
mod block_type;
pub mod result;
pub mod routing;
pub mod state;
mod value;
pub mod workflow;

pub use block_type::BlockType;
pub use context::{BlockLog, BlockState, Decisions, ExecutionContext, ParallelScope};
pub use error::{BlockError, ConfigurationError, FlowError};
pub use events::*;
pub use result::{ExecutionMetadata, ExecutionResult};
pub use routing::BlockCategory;
pub use state::{BlockRecord, Edge, WorkflowRecord, WorkflowState};
pub use value::{ParamType, Value};
pub use workflow::{
    BlockConfig, BlockId, BlockMetadata, Connection, ErrorHandling, LoopDef, LoopType,
    ParallelDef, ParallelType, Position, SerializedBlock, SerializedWorkflow,
};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
