use crate::BlockError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared type of a block param.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Json,
    #[default]
    Any,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Json => "json",
            ParamType::Any => "any",
        };
        f.write_str(name)
    }
}

/// Resolved block input, coerced to the param's declared type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Json(serde_json::Value),
}

impl Value {
    /// Coerce a raw JSON param into the declared type.
    ///
    /// Coercion is permissive: numeric strings become numbers, `"true"` and
    /// `"false"` become booleans, JSON text becomes structured JSON, and
    /// scalars are stringified for string params. Empty strings and nulls
    /// become [`Value::Null`] for every non-string type.
    pub fn coerce(field: &str, raw: serde_json::Value, ty: ParamType) -> Result<Value, BlockError> {
        use serde_json::Value as Json;

        match (ty, raw) {
            (_, Json::Null) => Ok(Value::Null),
            (ParamType::Any, raw) => Ok(Value::from(raw)),

            (ParamType::String, Json::String(s)) => Ok(Value::String(s)),
            (ParamType::String, Json::Number(n)) => Ok(Value::String(n.to_string())),
            (ParamType::String, Json::Bool(b)) => Ok(Value::String(b.to_string())),
            (ParamType::String, other) => Ok(Value::String(other.to_string())),

            (ParamType::Number, Json::Number(n)) => n
                .as_f64()
                .map(Value::Number)
                .ok_or_else(|| BlockError::invalid_type(field, "number", n.to_string())),
            (ParamType::Number, Json::String(s)) if s.trim().is_empty() => Ok(Value::Null),
            (ParamType::Number, Json::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Value::Number)
                .map_err(|_| BlockError::invalid_type(field, "number", format!("'{}'", s))),
            (ParamType::Number, other) => {
                Err(BlockError::invalid_type(field, "number", json_kind(&other)))
            }

            (ParamType::Boolean, Json::Bool(b)) => Ok(Value::Bool(b)),
            (ParamType::Boolean, Json::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "" => Ok(Value::Null),
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(BlockError::invalid_type(field, "boolean", format!("'{}'", s))),
            },
            (ParamType::Boolean, Json::Number(n)) => {
                Ok(Value::Bool(n.as_f64().map(|f| f != 0.0).unwrap_or(false)))
            }
            (ParamType::Boolean, other) => {
                Err(BlockError::invalid_type(field, "boolean", json_kind(&other)))
            }

            (ParamType::Json, Json::String(s)) if s.trim().is_empty() => Ok(Value::Null),
            (ParamType::Json, Json::String(s)) => match serde_json::from_str(&s) {
                Ok(parsed) => Ok(Value::Json(parsed)),
                Err(_) => Ok(Value::Json(Json::String(s))),
            },
            (ParamType::Json, other) => Ok(Value::Json(other)),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::Json(serde_json::Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Json(j) => j.as_f64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Json(j) => j.as_bool(),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(j) => Some(j),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Convert back into plain JSON for handing to collaborators.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Json(j) => j.clone(),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<serde_json::Value> for Value {
    fn from(j: serde_json::Value) -> Self {
        match j {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Number(ref n) => match n.as_f64() {
                Some(f) => Value::Number(f),
                None => Value::Json(j),
            },
            other => Value::Json(other),
        }
    }
}
