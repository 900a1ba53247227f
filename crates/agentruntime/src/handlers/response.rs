use super::{normalize_headers, BlockOutput, BlockResult, HandlerContext};
use crate::resolver::BlockInputs;
use agentcore::{BlockError, SerializedBlock};
use serde_json::{json, Value as Json};

pub(super) async fn execute(
    _block: &SerializedBlock,
    inputs: BlockInputs,
    _ctx: &HandlerContext<'_>,
) -> Result<BlockResult, BlockError> {
    let status = inputs.get_f64("status").map(|s| s as u16).unwrap_or(200);
    Ok(BlockOutput::new(json!({
        "data": inputs.get_json("data").unwrap_or_else(|| json!({})),
        "status": status,
        "headers": normalize_headers(inputs.get_json("headers")),
    }))
    .into())
}
