use agentcore::BlockError;
use agentruntime::{ToolResponse, FUNCTION_EXECUTE_TOOL};

/// Sends `function_execute` params to an external code runner.
///
/// The runner receives the params as a JSON POST body and must answer with a
/// `ToolResponse` (`{success, output: {result, stdout}, error?}`).
pub struct RemoteFunctionRunner {
    client: reqwest::Client,
    url: String,
}

impl RemoteFunctionRunner {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn run(&self, params: &serde_json::Value) -> Result<ToolResponse, BlockError> {
        tracing::debug!("Dispatching function to {}", self.url);

        let response = self
            .client
            .post(&self.url)
            .json(params)
            .send()
            .await
            .map_err(|e| tool_error(format!("function runner unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::warn!("Function runner returned {}: {}", status.as_u16(), text);
            return Ok(ToolResponse::failed(format!(
                "function runner returned status {}: {}",
                status.as_u16(),
                text
            )));
        }

        response
            .json::<ToolResponse>()
            .await
            .map_err(|e| tool_error(format!("invalid function runner response: {}", e)))
    }
}

fn tool_error(message: String) -> BlockError {
    BlockError::Tool {
        tool: FUNCTION_EXECUTE_TOOL.to_string(),
        message,
    }
}
