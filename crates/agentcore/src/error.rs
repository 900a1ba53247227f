use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Block {block_id} failed: {source}")]
    Block {
        block_id: String,
        #[source]
        source: BlockError,
    },

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while turning persisted state into an executable graph.
/// These abort the run before any block executes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("Unknown block type: {0}")]
    UnknownBlockType(String),

    #[error("Container {container} references missing block {node}")]
    DanglingContainerNode { container: String, node: String },

    #[error("Connection references missing block: {0}")]
    UnknownConnectionEndpoint(String),

    #[error("Workflow must contain exactly one enabled starter block")]
    MissingStarter,

    #[error("Workflow graph contains a cycle through block {0}")]
    CyclicGraph(String),

    #[error("Invalid workflow: {0}")]
    Invalid(String),
}

/// Errors raised by a single block. The executor records them against the
/// block and decides whether the run can continue.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BlockError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cyclic workflow dependency detected: {0}")]
    CyclicDependency(String),

    #[error("Maximum workflow nesting depth of {0} exceeded")]
    DepthExceeded(usize),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    ExecutionFailed(String),

    #[error("Provider request failed: {0}")]
    Provider(String),

    #[error("Tool {tool} failed: {message}")]
    Tool { tool: String, message: String },

    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Cancelled")]
    Cancelled,
}

impl BlockError {
    pub fn execution(message: impl Into<String>) -> Self {
        BlockError::ExecutionFailed(message.into())
    }

    pub fn invalid_type(
        field: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        BlockError::InvalidInputType {
            field: field.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}
