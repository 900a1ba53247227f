//! Interfaces to the collaborators the engine treats as opaque async
//! capabilities: model providers, tools, and the workflow store.

use crate::registry::BlockRegistry;
use crate::stack::ExecutionStack;
use agentcore::{BlockError, EventBus, WorkflowRecord};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One completion request handed to a model provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRequest {
    pub provider_id: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

/// Provider completion. `content` may be anything, including malformed JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub content: String,
    pub model: String,
    #[serde(default)]
    pub tokens: TokenUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl ProviderResponse {
    pub fn new(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
            tokens: TokenUsage::default(),
            cost: None,
        }
    }
}

/// Streaming completion: content arrives as chunks.
pub struct ProviderStream {
    pub model: String,
    pub chunks: BoxStream<'static, Result<String, BlockError>>,
}

#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, BlockError>;

    /// Streaming variant. Providers without streaming answer with the whole
    /// completion as a single chunk.
    async fn stream(&self, request: ProviderRequest) -> Result<ProviderStream, BlockError> {
        let response = self.complete(request).await?;
        Ok(ProviderStream {
            model: response.model,
            chunks: stream::once(async move { Ok(response.content) }).boxed(),
        })
    }
}

/// Result of a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub success: bool,
    #[serde(default)]
    pub output: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResponse {
    pub fn ok(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(
        &self,
        tool_id: &str,
        params: serde_json::Value,
    ) -> Result<ToolResponse, BlockError>;
}

#[async_trait]
pub trait WorkflowLoader: Send + Sync {
    /// `Ok(None)` means the workflow does not exist; `Err` is a transport
    /// failure.
    async fn load_workflow(&self, id: &str) -> Result<Option<WorkflowRecord>, BlockError>;
}

/// Everything a run needs from the outside world. Cloned into nested
/// executors; the execution stack is shared by all of them.
#[derive(Clone)]
pub struct Services {
    pub registry: Arc<BlockRegistry>,
    pub provider: Arc<dyn ProviderClient>,
    pub tools: Arc<dyn ToolInvoker>,
    pub loader: Arc<dyn WorkflowLoader>,
    pub execution_stack: Arc<ExecutionStack>,
    pub events: Option<Arc<EventBus>>,
}

impl Services {
    pub fn new(
        provider: Arc<dyn ProviderClient>,
        tools: Arc<dyn ToolInvoker>,
        loader: Arc<dyn WorkflowLoader>,
    ) -> Self {
        Self {
            registry: Arc::new(BlockRegistry::standard()),
            provider,
            tools,
            loader,
            execution_stack: Arc::new(ExecutionStack::new()),
            events: None,
        }
    }

    pub fn with_registry(mut self, registry: Arc<BlockRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_execution_stack(mut self, stack: Arc<ExecutionStack>) -> Self {
        self.execution_stack = stack;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }
}
