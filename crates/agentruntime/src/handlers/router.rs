use super::{model_request, selected_path, usage_output, BlockOutput, BlockResult, Decision, HandlerContext};
use crate::resolver::BlockInputs;
use agentcore::routing::{is_error_handle, is_internal_handle};
use agentcore::{BlockError, SerializedBlock};
use serde_json::{json, Value as Json};

pub(super) async fn execute(
    block: &SerializedBlock,
    inputs: BlockInputs,
    ctx: &HandlerContext<'_>,
) -> Result<BlockResult, BlockError> {
    let prompt = inputs.require_str("prompt")?;

    let targets: Vec<&SerializedBlock> = ctx
        .workflow
        .outgoing(&block.id)
        .filter(|c| !is_internal_handle(c.handle()) && !is_error_handle(c.handle()))
        .filter_map(|c| ctx.workflow.find_block(&c.target))
        .collect();
    if targets.is_empty() {
        return Err(BlockError::Configuration(format!(
            "Router {} has no outgoing connections",
            block.id
        )));
    }

    let mut request = model_request(block, &inputs)?;
    request.system_prompt = Some(routing_prompt(prompt, &targets));
    request.context = Some(prompt.to_string());
    request.temperature = Some(request.temperature.unwrap_or(0.0));

    let response = ctx.services.provider.complete(request).await?;
    let choice = response.content.trim().to_lowercase();
    let target = targets
        .iter()
        .find(|t| t.id.to_lowercase() == choice)
        .ok_or_else(|| BlockError::execution(format!("Invalid routing decision: {}", choice)))?;

    tracing::info!("Router {} selected {}", block.id, target.id);
    ctx.info(format!("Routing to {}", target.name()));

    let mut output = usage_output(&response);
    output.insert("content".into(), json!(prompt));
    output.insert("selectedPath".into(), selected_path(target));
    Ok(BlockOutput::new(Json::Object(output))
        .with_decision(Decision::Router(target.id.clone()))
        .into())
}

/// System prompt asking the model to answer with exactly one target id.
fn routing_prompt(prompt: &str, targets: &[&SerializedBlock]) -> String {
    let mut text = String::from(
        "You are an intelligent routing agent responsible for directing workflow requests to the \
         most appropriate block. Analyze the request and choose the single best destination.\n\n\
         Available target blocks:\n",
    );
    for target in targets {
        text.push_str(&format!(
            "- ID: {}\n  Type: {}\n  Title: {}\n",
            target.id,
            target.block_type(),
            target.name()
        ));
        if let Some(system_prompt) = target.param("systemPrompt").and_then(Json::as_str) {
            text.push_str(&format!("  System prompt: {}\n", system_prompt));
        }
    }
    text.push_str(&format!(
        "\nRouting request: {}\n\nRespond with ONLY the block ID of the chosen destination. \
         No explanation, punctuation or formatting.",
        prompt
    ));
    text
}
