// crates/agentruntime/tests/common/mod.rs
//
// Scripted collaborators shared by the integration tests.
#![allow(dead_code)]

use agentcore::{
    BlockError, BlockType, EventBus, ExecutionResult, SerializedBlock, SerializedWorkflow,
    WorkflowRecord,
};
use agentruntime::{
    BlockRegistry, ExecutionRequest, ExecutionStack, Executor, ProviderClient, ProviderRequest,
    ProviderResponse, ProviderStream, RuntimeConfig, Services, ToolInvoker, ToolResponse,
    WorkflowLoader, FUNCTION_EXECUTE_TOOL,
};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value as Json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Answers with the reply of the first rule whose needle appears in the
/// system prompt or context.
pub struct MockProvider {
    rules: Vec<(String, String)>,
    default_reply: String,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            default_reply: "ok".to_string(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn on(mut self, needle: &str, reply: &str) -> Self {
        self.rules.push((needle.to_string(), reply.to_string()));
        self
    }

    pub fn replying(mut self, reply: &str) -> Self {
        self.default_reply = reply.to_string();
        self
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn reply_for(&self, request: &ProviderRequest) -> String {
        let haystack = format!(
            "{}\n{}",
            request.system_prompt.as_deref().unwrap_or_default(),
            request.context.as_deref().unwrap_or_default()
        );
        self.rules
            .iter()
            .find(|(needle, _)| haystack.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| self.default_reply.clone())
    }
}

#[async_trait]
impl ProviderClient for MockProvider {
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, BlockError> {
        let reply = self.reply_for(&request);
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);
        Ok(ProviderResponse::new(reply, model))
    }

    /// Streams the reply word by word.
    async fn stream(&self, request: ProviderRequest) -> Result<ProviderStream, BlockError> {
        let reply = self.reply_for(&request);
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);
        let chunks: Vec<Result<String, BlockError>> = reply
            .split_inclusive(' ')
            .map(|chunk| Ok(chunk.to_string()))
            .collect();
        Ok(ProviderStream {
            model,
            chunks: stream::iter(chunks).boxed(),
        })
    }
}

/// Records every invocation. Unscripted function calls echo their code back
/// as the result; unscripted http calls echo their params as data.
pub struct MockTools {
    responses: HashMap<String, ToolResponse>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, Json)>>,
}

impl MockTools {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(mut self, tool: &str, response: ToolResponse) -> Self {
        self.responses.insert(tool.to_string(), response);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<(String, Json)> {
        self.calls.lock().unwrap().clone()
    }

    /// Code strings sent to the function tool, in call order.
    pub fn function_codes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(tool, _)| tool == FUNCTION_EXECUTE_TOOL)
            .filter_map(|(_, params)| params["code"].as_str().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl ToolInvoker for MockTools {
    async fn invoke(&self, tool_id: &str, params: Json) -> Result<ToolResponse, BlockError> {
        self.calls
            .lock()
            .unwrap()
            .push((tool_id.to_string(), params.clone()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(response) = self.responses.get(tool_id) {
            return Ok(response.clone());
        }
        Ok(match tool_id {
            FUNCTION_EXECUTE_TOOL => ToolResponse::ok(json!({
                "result": params["code"],
                "stdout": "",
            })),
            _ => ToolResponse::ok(json!({ "data": params, "status": 200, "headers": {} })),
        })
    }
}

pub struct MockLoader {
    workflows: HashMap<String, WorkflowRecord>,
    unavailable: bool,
    loads: Mutex<Vec<String>>,
}

impl MockLoader {
    pub fn new() -> Self {
        Self {
            workflows: HashMap::new(),
            unavailable: false,
            loads: Mutex::new(Vec::new()),
        }
    }

    pub fn with_workflow(mut self, record: WorkflowRecord) -> Self {
        self.workflows.insert(record.id.clone(), record);
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn loads(&self) -> Vec<String> {
        self.loads.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkflowLoader for MockLoader {
    async fn load_workflow(&self, id: &str) -> Result<Option<WorkflowRecord>, BlockError> {
        self.loads.lock().unwrap().push(id.to_string());
        if self.unavailable {
            return Err(BlockError::execution("workflow store unavailable"));
        }
        Ok(self.workflows.get(id).cloned())
    }
}

/// Mocks plus the shared execution stack and event bus of one test.
pub struct Harness {
    pub provider: Arc<MockProvider>,
    pub tools: Arc<MockTools>,
    pub loader: Arc<MockLoader>,
    pub stack: Arc<ExecutionStack>,
    pub events: Arc<EventBus>,
    pub config: RuntimeConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            provider: Arc::new(MockProvider::new()),
            tools: Arc::new(MockTools::new()),
            loader: Arc::new(MockLoader::new()),
            stack: Arc::new(ExecutionStack::new()),
            events: Arc::new(EventBus::new(1000)),
            config: RuntimeConfig::default(),
        }
    }

    pub fn with_provider(mut self, provider: MockProvider) -> Self {
        self.provider = Arc::new(provider);
        self
    }

    pub fn with_tools(mut self, tools: MockTools) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    pub fn with_loader(mut self, loader: MockLoader) -> Self {
        self.loader = Arc::new(loader);
        self
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn services(&self) -> Services {
        Services::new(self.provider.clone(), self.tools.clone(), self.loader.clone())
            .with_execution_stack(self.stack.clone())
            .with_events(self.events.clone())
    }

    pub fn executor(&self, workflow: SerializedWorkflow) -> Executor {
        Executor::new(workflow, self.services(), self.config.clone())
    }

    pub async fn run(&self, workflow: SerializedWorkflow, input: Json) -> ExecutionResult {
        self.executor(workflow)
            .execute(ExecutionRequest::new("exec-1").with_input(input))
            .await
    }
}

/// Block of the given type with the registry's declared params and binding.
pub fn block(id: &str, block_type: BlockType) -> SerializedBlock {
    let mut block = SerializedBlock::new(id, block_type);
    if let Ok(spec) = BlockRegistry::standard().get(block_type.as_str()) {
        block.inputs = spec.input_types();
        block.outputs = spec.output_types();
        block.config.tool = if spec.uses_provider {
            Some("openai".to_string())
        } else {
            spec.tool.clone()
        };
    }
    block
}

pub fn starter() -> SerializedBlock {
    block("start", BlockType::Starter).with_name("Start")
}

pub fn function(id: &str, code: &str) -> SerializedBlock {
    block(id, BlockType::Function).with_param("code", code)
}

pub fn agent(id: &str, system_prompt: &str) -> SerializedBlock {
    block(id, BlockType::Agent)
        .with_param("model", "gpt-4o")
        .with_param("systemPrompt", system_prompt)
}

pub fn router(id: &str, prompt: &str) -> SerializedBlock {
    block(id, BlockType::Router)
        .with_param("model", "gpt-4o")
        .with_param("prompt", prompt)
}

pub fn condition(id: &str, conditions: Json) -> SerializedBlock {
    block(id, BlockType::Condition).with_param("conditions", conditions)
}

pub fn workflow_block(id: &str, child: &str) -> SerializedBlock {
    block(id, BlockType::Workflow).with_param("workflowId", child)
}

pub fn api(id: &str, url: &str) -> SerializedBlock {
    block(id, BlockType::Api).with_param("url", url)
}

/// Workflow holding just the starter block.
pub fn workflow() -> SerializedWorkflow {
    let mut wf = SerializedWorkflow::new();
    wf.add_block(starter());
    wf
}

pub fn log_output<'a>(result: &'a ExecutionResult, block_id: &str) -> Option<&'a Json> {
    result
        .logs
        .iter()
        .find(|log| log.block_id == block_id)
        .and_then(|log| log.output.as_ref())
}

pub fn executed_ids(result: &ExecutionResult) -> Vec<String> {
    result.logs.iter().map(|log| log.block_id.clone()).collect()
}
