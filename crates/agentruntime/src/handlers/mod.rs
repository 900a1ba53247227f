//! Block handlers.
//!
//! Dispatch is a closed enum over [`BlockType`]: every type has exactly one
//! handler and adding a type forces every match to be updated. Loop and
//! parallel blocks are containers; the executor orchestrates their bodies
//! and never routes them through [`BlockHandler::execute`].

mod agent;
mod api;
mod condition;
pub(crate) mod extraction;
mod evaluator;
mod function;
mod response;
mod router;
mod starter;
mod workflow;

use crate::resolver::{BlockInputs, InputResolver};
use crate::runtime::RuntimeConfig;
use crate::services::{ProviderRequest, ProviderResponse, Services};
use agentcore::{BlockError, BlockId, BlockType, EventEmitter, ExecutionContext, SerializedBlock, SerializedWorkflow};
use futures::stream::BoxStream;
use serde_json::{json, Value as Json};
use tokio_util::sync::CancellationToken;

pub use starter::starter_output;
pub use workflow::MAX_WORKFLOW_DEPTH;

/// Read-only view of the run handed to a handler.
pub struct HandlerContext<'a> {
    pub execution: &'a ExecutionContext,
    pub workflow: &'a SerializedWorkflow,
    pub resolver: &'a InputResolver<'a>,
    pub services: &'a Services,
    pub config: &'a RuntimeConfig,
    pub emitter: Option<EventEmitter>,
    pub cancellation: &'a CancellationToken,
}

impl HandlerContext<'_> {
    pub fn info(&self, message: impl Into<String>) {
        if let Some(emitter) = &self.emitter {
            emitter.info(message);
        }
    }
}

/// Branch picked by a router or condition. Written to the run's decision
/// maps before paths are updated.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Router(BlockId),
    Condition(String),
}

#[derive(Debug, Clone)]
pub struct BlockOutput {
    pub value: Json,
    pub decision: Option<Decision>,
    /// Failure reported as data. The block still succeeds for routing.
    pub reported_error: Option<String>,
}

impl BlockOutput {
    pub fn new(value: Json) -> Self {
        Self {
            value,
            decision: None,
            reported_error: None,
        }
    }

    pub fn with_decision(mut self, decision: Decision) -> Self {
        self.decision = Some(decision);
        self
    }

    pub fn reported_failure(value: Json, error: impl Into<String>) -> Self {
        Self {
            value,
            decision: None,
            reported_error: Some(error.into()),
        }
    }
}

/// Content still arriving from a provider. The executor drains it into
/// `output.content`, forwarding chunks as events.
pub struct StreamingExecution {
    pub stream: BoxStream<'static, Result<String, BlockError>>,
    pub output: Json,
}

pub enum BlockResult {
    Output(BlockOutput),
    Streaming(StreamingExecution),
}

impl From<BlockOutput> for BlockResult {
    fn from(output: BlockOutput) -> Self {
        BlockResult::Output(output)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockHandler {
    Starter,
    Agent,
    Api,
    Function,
    Router,
    Condition,
    Evaluator,
    Workflow,
    Response,
    Loop,
    Parallel,
}

impl BlockHandler {
    pub fn for_type(block_type: BlockType) -> Self {
        match block_type {
            BlockType::Starter => BlockHandler::Starter,
            BlockType::Agent => BlockHandler::Agent,
            BlockType::Api => BlockHandler::Api,
            BlockType::Function => BlockHandler::Function,
            BlockType::Router => BlockHandler::Router,
            BlockType::Condition => BlockHandler::Condition,
            BlockType::Evaluator => BlockHandler::Evaluator,
            BlockType::Workflow => BlockHandler::Workflow,
            BlockType::Response => BlockHandler::Response,
            BlockType::Loop => BlockHandler::Loop,
            BlockType::Parallel => BlockHandler::Parallel,
        }
    }

    pub fn can_handle(&self, block: &SerializedBlock) -> bool {
        Self::for_type(block.block_type()) == *self
    }

    pub async fn execute(
        &self,
        block: &SerializedBlock,
        inputs: BlockInputs,
        ctx: &HandlerContext<'_>,
    ) -> Result<BlockResult, BlockError> {
        if !self.can_handle(block) {
            return Err(BlockError::Configuration(format!(
                "{:?} handler cannot execute {} block {}",
                self,
                block.block_type(),
                block.id
            )));
        }
        match self {
            BlockHandler::Starter => starter::execute(block, inputs, ctx).await,
            BlockHandler::Agent => agent::execute(block, inputs, ctx).await,
            BlockHandler::Api => api::execute(block, inputs, ctx).await,
            BlockHandler::Function => function::execute(block, inputs, ctx).await,
            BlockHandler::Router => router::execute(block, inputs, ctx).await,
            BlockHandler::Condition => condition::execute(block, inputs, ctx).await,
            BlockHandler::Evaluator => evaluator::execute(block, inputs, ctx).await,
            BlockHandler::Workflow => workflow::execute(block, inputs, ctx).await,
            BlockHandler::Response => response::execute(block, inputs, ctx).await,
            BlockHandler::Loop | BlockHandler::Parallel => Err(BlockError::Configuration(format!(
                "container block {} is orchestrated by the executor",
                block.id
            ))),
        }
    }
}

/// Provider request carrying a model block's common params.
pub(crate) fn model_request(
    block: &SerializedBlock,
    inputs: &BlockInputs,
) -> Result<ProviderRequest, BlockError> {
    Ok(ProviderRequest {
        provider_id: block.config.tool.clone().unwrap_or_else(|| "openai".to_string()),
        model: inputs.require_str("model")?.to_string(),
        temperature: inputs.get_f64("temperature"),
        api_key: inputs.get_str("apiKey").map(str::to_string),
        ..ProviderRequest::default()
    })
}

/// `model`, `tokens` and `cost` fields shared by every model block output.
pub(crate) fn usage_output(response: &ProviderResponse) -> serde_json::Map<String, Json> {
    let mut map = serde_json::Map::new();
    map.insert("model".into(), json!(response.model));
    map.insert(
        "tokens".into(),
        json!({
            "prompt": response.tokens.prompt,
            "completion": response.tokens.completion,
            "total": response.tokens.total,
        }),
    );
    if let Some(cost) = response.cost {
        map.insert("cost".into(), json!(cost));
    }
    map
}

/// Target summary stored under `selectedPath` by decision blocks.
pub(crate) fn selected_path(target: &SerializedBlock) -> Json {
    json!({
        "blockId": target.id,
        "blockType": target.block_type(),
        "blockTitle": target.name(),
    })
}

/// Header tables arrive either as an object or as `[{key, value}]` rows.
pub(crate) fn normalize_headers(raw: Option<Json>) -> Json {
    match raw {
        Some(Json::Array(rows)) => {
            let mut map = serde_json::Map::new();
            for row in rows {
                let key = row
                    .get("key")
                    .or_else(|| row.get("cells").and_then(|c| c.get("Key")))
                    .and_then(Json::as_str);
                let value = row
                    .get("value")
                    .or_else(|| row.get("cells").and_then(|c| c.get("Value")))
                    .cloned()
                    .unwrap_or(Json::Null);
                if let Some(key) = key.filter(|k| !k.is_empty()) {
                    map.insert(key.to_string(), value);
                }
            }
            Json::Object(map)
        }
        Some(obj @ Json::Object(_)) => obj,
        _ => json!({}),
    }
}
