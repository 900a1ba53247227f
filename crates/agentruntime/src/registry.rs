use agentcore::routing::{get_category, BlockCategory};
use agentcore::{BlockType, ConfigurationError, ParamType};
use std::collections::HashMap;

/// Tool id the api block is bound to.
pub const HTTP_REQUEST_TOOL: &str = "http_request";
/// Tool id the function block is bound to.
pub const FUNCTION_EXECUTE_TOOL: &str = "function_execute";

/// Metadata about a block type: the tool it binds to and its typed params.
#[derive(Debug, Clone)]
pub struct BlockSpec {
    pub block_type: BlockType,
    pub description: String,
    pub category: BlockCategory,
    /// Fixed tool binding. Model-backed blocks pick a provider per block instead.
    pub tool: Option<String>,
    pub uses_provider: bool,
    pub inputs: Vec<ParamDefinition>,
    pub outputs: Vec<ParamDefinition>,
}

impl BlockSpec {
    pub fn new(block_type: BlockType, description: impl Into<String>) -> Self {
        Self {
            block_type,
            description: description.into(),
            category: get_category(block_type),
            tool: None,
            uses_provider: false,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    fn tool(mut self, tool: &str) -> Self {
        self.tool = Some(tool.to_string());
        self
    }

    fn provider(mut self) -> Self {
        self.uses_provider = true;
        self
    }

    fn input(mut self, name: &str, ty: ParamType, required: bool, description: &str) -> Self {
        self.inputs.push(ParamDefinition::new(name, ty, required, description));
        self
    }

    fn output(mut self, name: &str, ty: ParamType, description: &str) -> Self {
        self.outputs.push(ParamDefinition::new(name, ty, false, description));
        self
    }

    pub fn input_types(&self) -> HashMap<String, ParamType> {
        self.inputs.iter().map(|p| (p.name.clone(), p.ty)).collect()
    }

    pub fn output_types(&self) -> HashMap<String, ParamType> {
        self.outputs.iter().map(|p| (p.name.clone(), p.ty)).collect()
    }
}

#[derive(Debug, Clone)]
pub struct ParamDefinition {
    pub name: String,
    pub ty: ParamType,
    pub description: String,
    pub required: bool,
}

impl ParamDefinition {
    pub fn new(name: &str, ty: ParamType, required: bool, description: &str) -> Self {
        Self {
            name: name.to_string(),
            ty,
            description: description.to_string(),
            required,
        }
    }
}

/// Registry of available block types
pub struct BlockRegistry {
    specs: HashMap<String, BlockSpec>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self {
            specs: HashMap::new(),
        }
    }

    /// Registry holding every built-in block type.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for spec in builtin_specs() {
            registry.register(spec);
        }
        registry
    }

    pub fn register(&mut self, spec: BlockSpec) {
        let block_type = spec.block_type.as_str().to_string();
        tracing::debug!("Registering block type: {}", block_type);
        self.specs.insert(block_type, spec);
    }

    pub fn get(&self, block_type: &str) -> Result<&BlockSpec, ConfigurationError> {
        self.specs
            .get(block_type)
            .ok_or_else(|| ConfigurationError::UnknownBlockType(block_type.to_string()))
    }

    /// Registered block types, sorted by name.
    pub fn list_block_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.specs.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn specs(&self) -> impl Iterator<Item = &BlockSpec> {
        self.specs.values()
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

fn model_params(spec: BlockSpec) -> BlockSpec {
    spec.provider()
        .input("model", ParamType::String, true, "Model name")
        .input("provider", ParamType::String, false, "Provider id; inferred from the model when empty")
        .input("temperature", ParamType::Number, false, "Sampling temperature")
        .input("apiKey", ParamType::String, false, "Provider API key")
}

fn usage_outputs(spec: BlockSpec) -> BlockSpec {
    spec.output("model", ParamType::String, "Model that answered")
        .output("tokens", ParamType::Json, "Token usage")
        .output("cost", ParamType::Number, "Request cost")
}

fn builtin_specs() -> Vec<BlockSpec> {
    vec![
        BlockSpec::new(BlockType::Starter, "Entry point receiving the workflow input")
            .input("inputFormat", ParamType::Json, false, "Expected input fields")
            .output("input", ParamType::Json, "Workflow input"),
        usage_outputs(model_params(
            BlockSpec::new(BlockType::Agent, "Calls a language model")
                .input("systemPrompt", ParamType::String, false, "System prompt")
                .input("context", ParamType::String, false, "User message")
                .input("responseFormat", ParamType::Json, false, "JSON schema for structured output")
                .input("stream", ParamType::Boolean, false, "Stream content chunks"),
        ))
        .output("content", ParamType::String, "Model reply"),
        BlockSpec::new(BlockType::Api, "Performs an HTTP request")
            .tool(HTTP_REQUEST_TOOL)
            .input("url", ParamType::String, true, "Request URL")
            .input("method", ParamType::String, false, "HTTP method")
            .input("headers", ParamType::Json, false, "Request headers")
            .input("params", ParamType::Json, false, "Query parameters")
            .input("body", ParamType::Json, false, "Request body")
            .output("data", ParamType::Json, "Response body")
            .output("status", ParamType::Number, "HTTP status")
            .output("headers", ParamType::Json, "Response headers"),
        BlockSpec::new(BlockType::Function, "Runs code in the function sandbox")
            .tool(FUNCTION_EXECUTE_TOOL)
            .input("code", ParamType::String, true, "Function body")
            .input("timeout", ParamType::Number, false, "Timeout in milliseconds")
            .output("result", ParamType::Any, "Return value")
            .output("stdout", ParamType::String, "Captured output"),
        usage_outputs(model_params(
            BlockSpec::new(BlockType::Router, "Lets a model pick the next block")
                .input("prompt", ParamType::String, true, "Routing prompt"),
        ))
        .output("selectedPath", ParamType::Json, "Chosen target"),
        BlockSpec::new(BlockType::Condition, "Branches on the first matching expression")
            .input("conditions", ParamType::Json, true, "Ordered if/else-if/else entries")
            .output("conditionResult", ParamType::Boolean, "Whether a branch matched")
            .output("selectedPath", ParamType::Json, "Chosen target")
            .output("selectedConditionId", ParamType::String, "Matched condition id"),
        usage_outputs(model_params(
            BlockSpec::new(BlockType::Evaluator, "Scores content against metrics")
                .input("content", ParamType::String, true, "Content to score")
                .input("metrics", ParamType::Json, true, "Metric definitions"),
        ))
        .output("content", ParamType::String, "Scored content"),
        BlockSpec::new(BlockType::Workflow, "Runs another workflow")
            .input("workflowId", ParamType::String, true, "Child workflow id")
            .input("input", ParamType::Any, false, "Input passed to the child")
            .output("success", ParamType::Boolean, "Child outcome")
            .output("childWorkflowName", ParamType::String, "Child name")
            .output("result", ParamType::Any, "Child output")
            .output("error", ParamType::String, "Child error"),
        BlockSpec::new(BlockType::Response, "Shapes the final workflow response")
            .input("data", ParamType::Json, false, "Response payload")
            .input("status", ParamType::Number, false, "HTTP status")
            .input("headers", ParamType::Json, false, "Response headers")
            .output("data", ParamType::Json, "Response payload")
            .output("status", ParamType::Number, "HTTP status")
            .output("headers", ParamType::Json, "Response headers"),
        BlockSpec::new(BlockType::Loop, "Re-runs its body sub-graph")
            .output("results", ParamType::Json, "Per-iteration body outputs"),
        BlockSpec::new(BlockType::Parallel, "Runs its body sub-graph concurrently")
            .output("results", ParamType::Json, "Per-branch body outputs"),
    ]
}
