use super::{BlockOutput, BlockResult, HandlerContext};
use crate::resolver::BlockInputs;
use agentcore::{BlockError, SerializedBlock};
use serde_json::{json, Value as Json};

/// Output of the starter block for a given workflow input: the input under
/// `input`, with object fields also spread at the top level.
pub fn starter_output(input: &Json) -> Json {
    let mut output = match input {
        Json::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    output.insert("input".into(), input.clone());
    Json::Object(output)
}

/// The executor seeds the starter's output itself; this path only runs if a
/// starter is scheduled like any other block.
pub(super) async fn execute(
    _block: &SerializedBlock,
    _inputs: BlockInputs,
    ctx: &HandlerContext<'_>,
) -> Result<BlockResult, BlockError> {
    let input = ctx
        .workflow
        .starter()
        .and_then(|s| ctx.execution.output(&s.id))
        .and_then(|o| o.get("input").cloned())
        .unwrap_or_else(|| json!({}));
    Ok(BlockOutput::new(starter_output(&input)).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spreads_object_input() {
        let out = starter_output(&json!({"topic": "rust"}));
        assert_eq!(out, json!({"topic": "rust", "input": {"topic": "rust"}}));
    }

    #[test]
    fn wraps_scalar_input() {
        assert_eq!(starter_output(&json!("hi")), json!({"input": "hi"}));
    }
}
