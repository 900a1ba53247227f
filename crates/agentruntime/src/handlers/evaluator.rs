use super::extraction::extract_json_object;
use super::{model_request, usage_output, BlockOutput, BlockResult, HandlerContext};
use crate::resolver::BlockInputs;
use agentcore::{BlockError, SerializedBlock};
use serde::Deserialize;
use serde_json::{json, Map, Value as Json};

/// Output fields written next to the scores.
const RESERVED_KEYS: [&str; 4] = ["content", "model", "tokens", "cost"];

#[derive(Debug, Clone, Deserialize)]
pub struct Metric {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub range: Option<MetricRange>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MetricRange {
    pub min: f64,
    pub max: f64,
}

impl Metric {
    fn key(&self) -> String {
        self.name.trim().to_lowercase()
    }
}

fn parse_metrics(raw: Option<Json>) -> Result<Vec<Metric>, BlockError> {
    let raw = raw.ok_or_else(|| BlockError::MissingInput("metrics".into()))?;
    let metrics: Vec<Metric> = serde_json::from_value(raw)
        .map_err(|e| BlockError::Configuration(format!("Invalid metrics: {}", e)))?;
    let metrics: Vec<Metric> = metrics.into_iter().filter(|m| !m.name.trim().is_empty()).collect();
    if let Some(metric) = metrics.iter().find(|m| RESERVED_KEYS.contains(&m.key().as_str())) {
        return Err(BlockError::Configuration(format!(
            "Metric name \"{}\" is reserved for the evaluator output",
            metric.name
        )));
    }
    Ok(metrics)
}

pub(super) async fn execute(
    block: &SerializedBlock,
    inputs: BlockInputs,
    ctx: &HandlerContext<'_>,
) -> Result<BlockResult, BlockError> {
    let content = match inputs.get("content") {
        Some(value) => match value.as_str() {
            Some(text) => text.to_string(),
            None => value.to_json().to_string(),
        },
        None => return Err(BlockError::MissingInput("content".into())),
    };
    let metrics = parse_metrics(inputs.get_json("metrics"))?;
    if metrics.is_empty() {
        return Err(BlockError::MissingInput("metrics".into()));
    }

    let mut request = model_request(block, &inputs)?;
    request.system_prompt = Some(evaluation_prompt(&metrics));
    request.context = Some(content.clone());
    request.response_format = Some(response_schema(&metrics));
    request.temperature = Some(request.temperature.unwrap_or(0.1));

    let response = ctx.services.provider.complete(request).await?;
    let parsed = extract_json_object(&response.content);
    if parsed.is_none() {
        tracing::warn!("Evaluator {} could not parse scores; defaulting to 0", block.id);
    }
    let scores = score_metrics(&metrics, parsed.as_ref());

    let mut output = usage_output(&response);
    output.insert("content".into(), Json::String(content));
    output.extend(scores);
    Ok(BlockOutput::new(Json::Object(output)).into())
}

/// Scores keyed by lowercase metric name. Keys match case-insensitively and
/// any metric the model omitted or left non-numeric scores 0.
pub fn score_metrics(metrics: &[Metric], parsed: Option<&Map<String, Json>>) -> Map<String, Json> {
    metrics
        .iter()
        .map(|metric| {
            let key = metric.key();
            let score = parsed
                .and_then(|fields| fields.iter().find(|(k, _)| k.trim().to_lowercase() == key))
                .and_then(|(_, v)| match v {
                    Json::Number(n) => n.as_f64(),
                    Json::String(s) => s.trim().parse().ok(),
                    _ => None,
                })
                .unwrap_or(0.0);
            (key, json!(score))
        })
        .collect()
}

fn evaluation_prompt(metrics: &[Metric]) -> String {
    let mut text = String::from(
        "You are an objective evaluation agent. Score the provided content against each metric.\n\n",
    );
    for metric in metrics {
        match metric.range {
            Some(range) => text.push_str(&format!(
                "- {} ({} to {}): {}\n",
                metric.key(),
                range.min,
                range.max,
                metric.description
            )),
            None => text.push_str(&format!("- {}: {}\n", metric.key(), metric.description)),
        }
    }
    text.push_str(
        "\nRespond with a JSON object only, using the lowercase metric names above as keys and \
         numeric scores as values.",
    );
    text
}

fn response_schema(metrics: &[Metric]) -> Json {
    let properties: Map<String, Json> = metrics
        .iter()
        .map(|m| (m.key(), json!({ "type": "number", "description": m.description })))
        .collect();
    let required: Vec<String> = metrics.iter().map(Metric::key).collect();
    json!({
        "name": "evaluation_response",
        "schema": {
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        },
        "strict": true,
    })
}
