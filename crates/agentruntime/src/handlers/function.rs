use super::{BlockOutput, BlockResult, HandlerContext};
use crate::registry::FUNCTION_EXECUTE_TOOL;
use crate::resolver::BlockInputs;
use agentcore::{BlockError, SerializedBlock};
use serde_json::{json, Value as Json};

const DEFAULT_TIMEOUT_MS: f64 = 5000.0;

pub(super) async fn execute(
    block: &SerializedBlock,
    inputs: BlockInputs,
    ctx: &HandlerContext<'_>,
) -> Result<BlockResult, BlockError> {
    let code = inputs.require_str("code")?;
    let tool = block.config.tool.as_deref().unwrap_or(FUNCTION_EXECUTE_TOOL);
    let params = json!({
        "code": code,
        "timeout": inputs.get_f64("timeout").unwrap_or(DEFAULT_TIMEOUT_MS),
        "envVars": ctx.execution.environment_variables,
        "workflowVariables": ctx.execution.workflow_variables,
    });

    let response = ctx.services.tools.invoke(tool, params).await?;
    if !response.success {
        return Err(BlockError::Tool {
            tool: tool.to_string(),
            message: response.error.unwrap_or_else(|| "function execution failed".into()),
        });
    }

    let (result, stdout) = match response.output {
        Json::Object(mut map) if map.contains_key("result") => (
            map.remove("result").unwrap_or(Json::Null),
            map.remove("stdout").unwrap_or_else(|| json!("")),
        ),
        other => (other, json!("")),
    };
    Ok(BlockOutput::new(json!({ "result": result, "stdout": stdout })).into())
}
