use super::{selected_path, BlockOutput, BlockResult, Decision, HandlerContext};
use crate::expression::evaluate_condition;
use crate::resolver::{BlockInputs, Origin};
use agentcore::routing::condition_handle;
use agentcore::{BlockError, SerializedBlock};
use serde::Deserialize;
use serde_json::{json, Value as Json};

/// One `if` / `else if` / `else` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ConditionEntry {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub value: String,
}

impl ConditionEntry {
    fn is_else(&self) -> bool {
        self.title.trim().eq_ignore_ascii_case("else")
    }
}

pub fn parse_conditions(raw: Option<&Json>) -> Result<Vec<ConditionEntry>, BlockError> {
    let parsed = match raw {
        Some(Json::String(text)) => serde_json::from_str(text),
        Some(value @ Json::Array(_)) => serde_json::from_value(value.clone()),
        _ => return Err(BlockError::MissingInput("conditions".into())),
    };
    parsed.map_err(|e| BlockError::Configuration(format!("Invalid conditions: {}", e)))
}

pub(super) async fn execute(
    block: &SerializedBlock,
    _inputs: BlockInputs,
    ctx: &HandlerContext<'_>,
) -> Result<BlockResult, BlockError> {
    let conditions = parse_conditions(block.param("conditions"))?;

    let mut selected = None;
    for entry in &conditions {
        if entry.is_else() {
            selected = Some(entry);
            break;
        }
        if entry.value.trim().is_empty() {
            continue;
        }
        let expression = ctx
            .resolver
            .resolve_expression(&entry.value, ctx.execution, Origin::Block(block))?;
        let matched = evaluate_condition(&expression).map_err(|e| {
            BlockError::execution(format!("Condition \"{}\": {}", entry.title, e))
        })?;
        tracing::debug!("Condition {} `{}` => {}", block.id, expression, matched);
        if matched {
            selected = Some(entry);
            break;
        }
    }

    let entry = selected.ok_or_else(|| {
        BlockError::execution(format!("No matching path found for condition block {}", block.name()))
    })?;
    let handle = condition_handle(&entry.id);
    let target = ctx
        .workflow
        .outgoing(&block.id)
        .find(|c| c.handle() == Some(handle.as_str()))
        .and_then(|c| ctx.workflow.find_block(&c.target))
        .ok_or_else(|| {
            BlockError::execution(format!("No connection found for condition \"{}\"", entry.title))
        })?;

    Ok(BlockOutput::new(json!({
        "conditionResult": true,
        "selectedPath": selected_path(target),
        "selectedConditionId": entry.id,
    }))
    .with_decision(Decision::Condition(entry.id.clone()))
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conditions_parse_from_text_or_array() {
        let text = json!(r#"[{"id":"a","title":"if","value":"1 == 1"},{"id":"b","title":"else","value":""}]"#);
        let entries = parse_conditions(Some(&text)).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[1].is_else());

        let array = json!([{"id": "a", "title": "if", "value": "true"}]);
        assert_eq!(parse_conditions(Some(&array)).unwrap()[0].id, "a");
        assert!(parse_conditions(None).is_err());
    }
}
