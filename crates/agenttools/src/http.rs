use agentcore::BlockError;
use agentruntime::{ToolResponse, HTTP_REQUEST_TOOL};
use serde_json::{json, Map, Value as Json};

/// `http_request` tool backing the api block.
///
/// Params: `url`, `method`, `headers` and `params` (query) as flat objects,
/// and an optional `body`. Output is `{data, status, headers}` where `data`
/// is the parsed JSON body, or the raw text when it is not JSON.
pub struct HttpRequestTool {
    client: reqwest::Client,
}

impl HttpRequestTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub async fn call(&self, params: &Json) -> Result<ToolResponse, BlockError> {
        let url = params
            .get("url")
            .and_then(Json::as_str)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| BlockError::MissingInput("url".to_string()))?;
        let method = params
            .get("method")
            .and_then(Json::as_str)
            .unwrap_or("GET")
            .to_uppercase();
        let body = params.get("body").filter(|b| !b.is_null());

        tracing::info!("{} {}", method, url);

        let mut request = match method.as_str() {
            "GET" => self.client.get(url),
            "DELETE" => self.client.delete(url),
            "HEAD" => self.client.head(url),
            "POST" => with_body(self.client.post(url), body),
            "PUT" => with_body(self.client.put(url), body),
            "PATCH" => with_body(self.client.patch(url), body),
            _ => {
                return Err(BlockError::Configuration(format!(
                    "Unsupported method: {}",
                    method
                )))
            }
        };

        for (key, value) in string_pairs(params.get("headers")) {
            request = request.header(key, value);
        }
        let query = string_pairs(params.get("params"));
        if !query.is_empty() {
            request = request.query(&query);
        }

        let response = request.send().await.map_err(|e| BlockError::Tool {
            tool: HTTP_REQUEST_TOOL.to_string(),
            message: format!("HTTP request failed: {}", e),
        })?;

        let status = response.status();
        let headers: Map<String, Json> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v.to_str().unwrap_or(""))))
            .collect();
        let text = response.text().await.map_err(|e| BlockError::Tool {
            tool: HTTP_REQUEST_TOOL.to_string(),
            message: format!("Failed to read response: {}", e),
        })?;

        tracing::info!("Response status: {}", status.as_u16());

        let data = parse_body(&text);
        if !status.is_success() {
            let mut failed = ToolResponse::failed(format!(
                "{} {} returned status {}",
                method,
                url,
                status.as_u16()
            ));
            failed.output = json!({ "data": data, "status": status.as_u16(), "headers": headers });
            return Ok(failed);
        }

        Ok(ToolResponse::ok(json!({
            "data": data,
            "status": status.as_u16(),
            "headers": headers,
        })))
    }
}

impl Default for HttpRequestTool {
    fn default() -> Self {
        Self::new()
    }
}

fn with_body(request: reqwest::RequestBuilder, body: Option<&Json>) -> reqwest::RequestBuilder {
    match body {
        Some(Json::String(text)) => request.body(text.clone()),
        Some(json) => request.json(json),
        None => request,
    }
}

/// Flattens a header or query object into string pairs. Non-string scalars
/// are rendered as JSON text.
fn string_pairs(value: Option<&Json>) -> Vec<(String, String)> {
    let Some(Json::Object(map)) = value else {
        return Vec::new();
    };
    map.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let v = match v {
                Json::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), v)
        })
        .collect()
}

fn parse_body(text: &str) -> Json {
    if text.is_empty() {
        return Json::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Json::String(text.to_string()))
}
