use super::extraction::extract_json_object;
use super::{model_request, usage_output, BlockOutput, BlockResult, HandlerContext, StreamingExecution};
use crate::resolver::BlockInputs;
use agentcore::{BlockError, SerializedBlock};
use serde_json::{json, Value as Json};

pub(super) async fn execute(
    block: &SerializedBlock,
    inputs: BlockInputs,
    ctx: &HandlerContext<'_>,
) -> Result<BlockResult, BlockError> {
    let mut request = model_request(block, &inputs)?;
    request.system_prompt = inputs.get_str("systemPrompt").map(str::to_string);
    request.context = inputs
        .get_str("context")
        .or_else(|| inputs.get_str("userPrompt"))
        .map(str::to_string);
    request.response_format = inputs.get_json("responseFormat").filter(|f| f.is_object());

    if request.system_prompt.is_none() && request.context.is_none() {
        return Err(BlockError::MissingInput("systemPrompt or context".into()));
    }

    let streaming = inputs.get_bool("stream").unwrap_or(false);
    if streaming && request.response_format.is_none() {
        tracing::debug!("Agent {} streaming from {}", block.id, request.provider_id);
        let stream = ctx.services.provider.stream(request).await?;
        return Ok(BlockResult::Streaming(StreamingExecution {
            stream: stream.chunks,
            output: json!({ "model": stream.model }),
        }));
    }

    let structured = request.response_format.is_some();
    let response = ctx.services.provider.complete(request).await?;
    let mut output = usage_output(&response);

    if structured {
        match extract_json_object(&response.content) {
            Some(fields) => {
                for (key, value) in fields {
                    output.insert(key, value);
                }
                return Ok(BlockOutput::new(Json::Object(output)).into());
            }
            None => {
                tracing::warn!(
                    "Agent {} returned content that does not match its response format",
                    block.id
                );
            }
        }
    }

    output.insert("content".into(), Json::String(response.content));
    Ok(BlockOutput::new(Json::Object(output)).into())
}
