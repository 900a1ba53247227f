//! Standard collaborators
//!
//! Concrete implementations of the engine's outside-world interfaces: an
//! HTTP request tool, a remote function runner, workflow stores and a
//! placeholder provider for deployments without a model client.

mod function;
mod http;
mod provider;
mod store;

pub use function::RemoteFunctionRunner;
pub use http::HttpRequestTool;
pub use provider::UnconfiguredProvider;
pub use store::{FileWorkflowStore, InMemoryWorkflowStore};

use agentcore::BlockError;
use agentruntime::{ToolInvoker, ToolResponse, FUNCTION_EXECUTE_TOOL, HTTP_REQUEST_TOOL};
use async_trait::async_trait;

/// Environment variable naming the remote function runner endpoint.
pub const FUNCTION_URL_ENV: &str = "AGENTFLOW_FUNCTION_URL";

/// Routes the built-in tool ids to their implementations.
pub struct StandardTools {
    http: HttpRequestTool,
    functions: Option<RemoteFunctionRunner>,
}

impl StandardTools {
    pub fn new() -> Self {
        Self {
            http: HttpRequestTool::new(),
            functions: None,
        }
    }

    /// Picks up the function runner from `AGENTFLOW_FUNCTION_URL` when set.
    pub fn from_env() -> Self {
        match std::env::var(FUNCTION_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => {
                Self::new().with_function_runner(RemoteFunctionRunner::new(url.trim()))
            }
            _ => Self::new(),
        }
    }

    pub fn with_function_runner(mut self, runner: RemoteFunctionRunner) -> Self {
        self.functions = Some(runner);
        self
    }
}

impl Default for StandardTools {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolInvoker for StandardTools {
    async fn invoke(
        &self,
        tool_id: &str,
        params: serde_json::Value,
    ) -> Result<ToolResponse, BlockError> {
        match tool_id {
            HTTP_REQUEST_TOOL => self.http.call(&params).await,
            FUNCTION_EXECUTE_TOOL => match &self.functions {
                Some(runner) => runner.run(&params).await,
                None => Ok(ToolResponse::failed(format!(
                    "No function runner configured; set {} to enable function blocks",
                    FUNCTION_URL_ENV
                ))),
            },
            other => Err(BlockError::Tool {
                tool: other.to_string(),
                message: "unknown tool".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn function_without_runner_reports_failure() {
        let response = StandardTools::new()
            .invoke(FUNCTION_EXECUTE_TOOL, json!({"code": "return 1"}))
            .await
            .unwrap();
        assert!(!response.success);
        assert!(response.error.unwrap().contains(FUNCTION_URL_ENV));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let err = StandardTools::new()
            .invoke("slack_post", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Tool slack_post failed: unknown tool");
    }
}
