use super::{BlockOutput, BlockResult, HandlerContext};
use crate::executor::{ExecutionRequest, Executor};
use crate::resolver::BlockInputs;
use crate::serializer::Serializer;
use agentcore::{BlockError, SerializedBlock};
use serde_json::{json, Value as Json};

/// Deepest allowed chain of nested workflow blocks.
pub const MAX_WORKFLOW_DEPTH: usize = 10;

/// Runs a child workflow to completion.
///
/// A child already running further up the call chain is a cycle. The shared
/// execution stack additionally rejects a key that is claimed concurrently.
/// Guard violations, a missing child and a failed child all come back as a
/// `{success: false, error}` output so the parent graph can branch on them.
/// Only a store transport failure fails the block itself.
pub(super) async fn execute(
    block: &SerializedBlock,
    inputs: BlockInputs,
    ctx: &HandlerContext<'_>,
) -> Result<BlockResult, BlockError> {
    let child_id = inputs.require_str("workflowId")?.to_string();

    let depth = ctx.execution.depth;
    if depth >= MAX_WORKFLOW_DEPTH {
        return Ok(failure(None, BlockError::DepthExceeded(MAX_WORKFLOW_DEPTH)));
    }

    let key = ctx.execution.child_execution_id(&child_id);
    if ctx.execution.is_on_call_chain(&child_id) {
        tracing::warn!(
            "Workflow block {}: {} is already running in chain {:?}",
            block.id,
            child_id,
            ctx.execution.call_chain()
        );
        return Ok(failure(None, BlockError::CyclicDependency(key)));
    }

    let _guard = match ctx.services.execution_stack.enter(key.clone()) {
        Ok(guard) => guard,
        Err(err) => {
            tracing::warn!("Workflow block {}: {}", block.id, err);
            return Ok(failure(None, err));
        }
    };

    let record = match ctx.services.loader.load_workflow(&child_id).await? {
        Some(record) => record,
        None => {
            return Ok(failure(
                None,
                BlockError::NotFound(format!("Child workflow {} not found", child_id)),
            ))
        }
    };

    let serialized = match Serializer::new(&ctx.services.registry).serialize_workflow(&record.state) {
        Ok(workflow) => workflow,
        Err(err) => {
            return Ok(failure(
                Some(&record.name),
                BlockError::Configuration(format!("Child workflow {}: {}", child_id, err)),
            ))
        }
    };

    tracing::info!(
        "Workflow block {} running child {} ({}) at depth {}",
        block.id,
        record.name,
        child_id,
        depth + 1
    );
    ctx.info(format!("Running workflow {}", record.name));

    let child = Executor::new(serialized, ctx.services.clone(), ctx.config.clone())
        .with_workflow_id(child_id)
        .with_cancellation(ctx.cancellation.child_token());
    let request = ExecutionRequest::new(key)
        .nested_under(ctx.execution)
        .with_input(inputs.get_json("input").unwrap_or_else(|| json!({})))
        .with_environment(ctx.execution.environment_variables.clone())
        .with_variables(ctx.execution.workflow_variables.clone());
    let result = child.execute_boxed(request).await;

    if result.success {
        Ok(BlockOutput::new(json!({
            "success": true,
            "childWorkflowName": record.name,
            "result": result.output,
        }))
        .into())
    } else {
        let error = result
            .error
            .unwrap_or_else(|| "Child workflow execution failed".to_string());
        Ok(BlockOutput::reported_failure(
            json!({
                "success": false,
                "childWorkflowName": record.name,
                "error": error,
            }),
            error,
        )
        .into())
    }
}

fn failure(child_name: Option<&str>, err: BlockError) -> BlockResult {
    let message = err.to_string();
    let mut value = json!({ "success": false, "error": message });
    if let (Some(name), Json::Object(map)) = (child_name, &mut value) {
        map.insert("childWorkflowName".into(), json!(name));
    }
    BlockOutput::reported_failure(value, message).into()
}
