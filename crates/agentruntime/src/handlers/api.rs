use super::{normalize_headers, BlockOutput, BlockResult, HandlerContext};
use crate::registry::HTTP_REQUEST_TOOL;
use crate::resolver::BlockInputs;
use agentcore::{BlockError, SerializedBlock};
use serde_json::{json, Value as Json};

pub(super) async fn execute(
    block: &SerializedBlock,
    inputs: BlockInputs,
    ctx: &HandlerContext<'_>,
) -> Result<BlockResult, BlockError> {
    let url = inputs.require_str("url")?;
    let method = inputs.get_str("method").unwrap_or("GET").to_uppercase();
    let tool = block.config.tool.as_deref().unwrap_or(HTTP_REQUEST_TOOL);

    let params = json!({
        "url": url,
        "method": method,
        "headers": normalize_headers(inputs.get_json("headers")),
        "params": normalize_headers(inputs.get_json("params")),
        "body": inputs.get_json("body").unwrap_or(Json::Null),
    });
    tracing::debug!("Api {} {} {}", block.id, method, url);

    let response = ctx.services.tools.invoke(tool, params).await?;
    if !response.success {
        return Err(BlockError::Tool {
            tool: tool.to_string(),
            message: response
                .error
                .unwrap_or_else(|| format!("{} {} failed", method, url)),
        });
    }

    let output = &response.output;
    Ok(BlockOutput::new(json!({
        "data": output.get("data").cloned().unwrap_or(Json::Null),
        "status": output.get("status").cloned().unwrap_or(json!(200)),
        "headers": output.get("headers").cloned().unwrap_or_else(|| json!({})),
    }))
    .into())
}
