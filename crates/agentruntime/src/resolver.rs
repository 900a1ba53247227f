//! Resolves a block's params against the run before it executes.
//!
//! * `<blockname.path.to.field>` reads another block's output. Block names
//!   match case-insensitively with spaces removed; block ids work too,
//!   `start` always reaches the starter block, and any other id with stored
//!   state (parallel branch outputs, carried-over states) is readable.
//! * `<loop.index>`, `<loop.currentItem>`, `<loop.items>` read the
//!   enclosing loop. `<parallel.*>` reads the current parallel branch.
//! * `<variable.name>` reads a workflow variable.
//! * `{{NAME}}` reads an environment variable.
//!
//! A param that is exactly one reference takes the referenced JSON value;
//! otherwise references are interpolated as text. Code and condition
//! expressions interpolate JSON literals instead.

use agentcore::{
    BlockError, BlockType, ExecutionContext, LoopDef, SerializedBlock, SerializedWorkflow, Value,
};
use regex::Regex;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::OnceLock;

/// `<...>` with no nested angle brackets. Candidates are then checked with
/// `is_reference_syntax`, so comparisons like `a < b > c` stay literal.
const REFERENCE_PATTERN: &str = r"<([^<>\s][^<>]*)>";
const ENV_REFERENCE_PATTERN: &str = r"\{\{\s*([\p{Alphabetic}\p{N}_]+)\s*\}\}";

static REFERENCE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
static ENV_REFERENCE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

fn pattern(
    cell: &'static OnceLock<Result<Regex, regex::Error>>,
    source: &str,
) -> Result<&'static Regex, BlockError> {
    cell.get_or_init(|| Regex::new(source))
        .as_ref()
        .map_err(|e| BlockError::Configuration(format!("Invalid reference pattern: {}", e)))
}

/// Where a reference is evaluated from. Decides which loop `<loop.*>` means.
#[derive(Debug, Clone, Copy)]
pub enum Origin<'b> {
    Block(&'b SerializedBlock),
    /// The loop block itself, e.g. while evaluating its own condition.
    Container(&'b str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Render {
    Text,
    Literal,
}

/// Params a block receives after resolution and coercion.
#[derive(Debug, Clone, Default)]
pub struct BlockInputs {
    values: HashMap<String, Value>,
}

impl BlockInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str).filter(|s| !s.trim().is_empty())
    }

    pub fn require_str(&self, key: &str) -> Result<&str, BlockError> {
        self.get_str(key)
            .ok_or_else(|| BlockError::MissingInput(key.to_string()))
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    /// Any non-null input as plain JSON.
    pub fn get_json(&self, key: &str) -> Option<Json> {
        self.get(key).map(Value::to_json)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub struct InputResolver<'a> {
    workflow: &'a SerializedWorkflow,
    names: HashMap<String, &'a str>,
}

impl<'a> InputResolver<'a> {
    pub fn new(workflow: &'a SerializedWorkflow) -> Self {
        let names = workflow
            .blocks
            .iter()
            .map(|b| (normalize_name(b.name()), b.id.as_str()))
            .collect();
        Self { workflow, names }
    }

    pub fn resolve_inputs(
        &self,
        block: &SerializedBlock,
        ctx: &ExecutionContext,
    ) -> Result<BlockInputs, BlockError> {
        let mut inputs = BlockInputs::new();
        for (key, raw) in &block.config.params {
            let resolved = if is_deferred(block.block_type(), key) {
                raw.clone()
            } else if block.block_type() == BlockType::Function && key == "code" {
                match raw.as_str() {
                    Some(code) => Json::String(self.resolve_expression(code, ctx, Origin::Block(block))?),
                    None => raw.clone(),
                }
            } else {
                self.resolve_value(raw, ctx, Origin::Block(block))?
            };
            let ty = block.inputs.get(key).copied().unwrap_or_default();
            inputs.insert(key.clone(), Value::coerce(key, resolved, ty)?);
        }
        Ok(inputs)
    }

    /// Resolve every string inside `value`, keeping its structure.
    pub fn resolve_value(
        &self,
        value: &Json,
        ctx: &ExecutionContext,
        origin: Origin<'_>,
    ) -> Result<Json, BlockError> {
        match value {
            Json::String(text) => self.resolve_text(text, ctx, origin),
            Json::Array(items) => items
                .iter()
                .map(|item| self.resolve_value(item, ctx, origin))
                .collect::<Result<Vec<_>, _>>()
                .map(Json::Array),
            Json::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.resolve_value(v, ctx, origin)?);
                }
                Ok(Json::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    pub fn resolve_text(
        &self,
        text: &str,
        ctx: &ExecutionContext,
        origin: Origin<'_>,
    ) -> Result<Json, BlockError> {
        let trimmed = text.trim();
        if let Some(inner) = whole_reference(trimmed) {
            if let Some(value) = self.lookup(inner, ctx, origin)? {
                return Ok(value);
            }
        }
        let with_env = substitute_env(text, ctx, Render::Text)?;
        self.substitute(&with_env, ctx, origin, Render::Text).map(Json::String)
    }

    /// Substitute references as JSON literals so the result parses as an
    /// expression or as code.
    pub fn resolve_expression(
        &self,
        expression: &str,
        ctx: &ExecutionContext,
        origin: Origin<'_>,
    ) -> Result<String, BlockError> {
        let with_env = substitute_env(expression, ctx, Render::Literal)?;
        self.substitute(&with_env, ctx, origin, Render::Literal)
    }

    fn substitute(
        &self,
        text: &str,
        ctx: &ExecutionContext,
        origin: Origin<'_>,
        render: Render,
    ) -> Result<String, BlockError> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in pattern(&REFERENCE, REFERENCE_PATTERN)?.captures_iter(text) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if !is_reference_syntax(inner.as_str()) {
                continue;
            }
            if let Some(value) = self.lookup(inner.as_str(), ctx, origin)? {
                out.push_str(&text[last..whole.start()]);
                out.push_str(&render_value(&value, render));
                last = whole.end();
            }
        }
        out.push_str(&text[last..]);
        Ok(out)
    }

    /// `Ok(None)` when `reference` does not name anything resolvable and
    /// should stay literal text.
    fn lookup(
        &self,
        reference: &str,
        ctx: &ExecutionContext,
        origin: Origin<'_>,
    ) -> Result<Option<Json>, BlockError> {
        let mut segments = reference.split('.');
        let head = segments.next().unwrap_or_default().trim();
        let path: Vec<&str> = segments.collect();

        match head {
            "loop" => return self.lookup_loop(&path, ctx, origin).map(Some),
            "parallel" => return lookup_parallel(&path, ctx).map(Some),
            "variable" => return lookup_variable(&path, ctx).map(Some),
            _ => {}
        }

        let normalized = normalize_name(head);
        let block_id = self
            .names
            .get(&normalized)
            .copied()
            .or_else(|| self.workflow.find_block(head).map(|b| b.id.as_str()))
            .or_else(|| {
                (normalized == "start")
                    .then(|| self.workflow.starter().map(|b| b.id.as_str()))
                    .flatten()
            })
            .or_else(|| ctx.block_states.contains_key(head).then_some(head));

        match block_id {
            Some(id) => {
                let output = ctx.output(id).cloned().unwrap_or(Json::Null);
                Ok(Some(navigate(&output, &path)))
            }
            None if !path.is_empty() && is_identifier(head) => Err(BlockError::Configuration(
                format!("Block reference \"{}\" was not found", head),
            )),
            None => Ok(None),
        }
    }

    fn loop_scope(&self, origin: Origin<'_>) -> Option<&'a LoopDef> {
        match origin {
            Origin::Block(block) => self.workflow.loop_containing(&block.id),
            Origin::Container(id) => self.workflow.loops.get(id),
        }
    }

    fn lookup_loop(
        &self,
        path: &[&str],
        ctx: &ExecutionContext,
        origin: Origin<'_>,
    ) -> Result<Json, BlockError> {
        let def = self.loop_scope(origin).ok_or_else(|| {
            BlockError::Configuration("<loop.*> references are only valid inside a loop".into())
        })?;
        let (field, rest) = match path.split_first() {
            Some((field, rest)) => (*field, rest),
            None => ("", &[][..]),
        };
        match field {
            "index" => Ok(Json::from(ctx.loop_iterations.get(&def.id).copied().unwrap_or(0))),
            "currentItem" => Ok(navigate(
                ctx.loop_items.get(&def.id).unwrap_or(&Json::Null),
                rest,
            )),
            "items" => {
                let items = self.loop_items(def, ctx)?;
                Ok(navigate(&Json::Array(items), rest))
            }
            other => Err(BlockError::Configuration(format!(
                "Unknown loop property \"{}\"",
                other
            ))),
        }
    }

    /// Items a forEach loop iterates, after resolving references.
    pub fn loop_items(&self, def: &LoopDef, ctx: &ExecutionContext) -> Result<Vec<Json>, BlockError> {
        let Some(raw) = &def.for_each_items else {
            return Ok(Vec::new());
        };
        let resolved = match self.workflow.find_block(&def.id) {
            Some(block) => self.resolve_value(raw, ctx, Origin::Block(block))?,
            None => raw.clone(),
        };
        normalize_collection(&resolved)
    }
}

/// Params that handlers resolve themselves.
fn is_deferred(block_type: BlockType, key: &str) -> bool {
    matches!((block_type, key), (BlockType::Condition, "conditions"))
}

fn lookup_parallel(path: &[&str], ctx: &ExecutionContext) -> Result<Json, BlockError> {
    let scope = ctx.parallel_scope.as_ref().ok_or_else(|| {
        BlockError::Configuration("<parallel.*> references are only valid inside a parallel".into())
    })?;
    let (field, rest) = match path.split_first() {
        Some((field, rest)) => (*field, rest),
        None => ("", &[][..]),
    };
    match field {
        "index" => Ok(Json::from(scope.index)),
        "currentItem" => Ok(navigate(&scope.item, rest)),
        "items" => Ok(navigate(&scope.items, rest)),
        other => Err(BlockError::Configuration(format!(
            "Unknown parallel property \"{}\"",
            other
        ))),
    }
}

fn lookup_variable(path: &[&str], ctx: &ExecutionContext) -> Result<Json, BlockError> {
    let (name, rest) = path
        .split_first()
        .ok_or_else(|| BlockError::Configuration("<variable> reference needs a name".into()))?;
    let wanted = normalize_name(name);
    ctx.workflow_variables
        .iter()
        .find(|(k, _)| k.as_str() == *name || normalize_name(k) == wanted)
        .map(|(_, v)| navigate(v, rest))
        .ok_or_else(|| BlockError::Configuration(format!("Variable \"{}\" was not found", name)))
}

fn substitute_env(text: &str, ctx: &ExecutionContext, render: Render) -> Result<String, BlockError> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in pattern(&ENV_REFERENCE, ENV_REFERENCE_PATTERN)?.captures_iter(text) {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = ctx.environment_variables.get(key.as_str()).ok_or_else(|| {
            BlockError::Configuration(format!("Environment variable \"{}\" was not found", key.as_str()))
        })?;
        out.push_str(&text[last..whole.start()]);
        out.push_str(&render_value(&Json::String(value.clone()), render));
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

fn render_value(value: &Json, render: Render) -> String {
    match (render, value) {
        (Render::Text, Json::String(s)) => s.clone(),
        (Render::Text, Json::Null) => String::new(),
        (_, other) => other.to_string(),
    }
}

fn whole_reference(text: &str) -> Option<&str> {
    let inner = text.strip_prefix('<')?.strip_suffix('>')?;
    is_reference_syntax(inner).then_some(inner)
}

fn is_reference_syntax(inner: &str) -> bool {
    !inner.is_empty()
        && !inner.starts_with(' ')
        && inner
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '[' | ']' | ' '))
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

/// Lowercase with whitespace removed, the way block names are referenced.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Walk `path` through `value`. Segments may carry `[n]` indexes.
pub fn navigate(value: &Json, path: &[&str]) -> Json {
    let mut current = value;
    for segment in path {
        let mut parts = segment.split('[');
        let key = parts.next().unwrap_or_default();
        if !key.is_empty() {
            current = match current {
                Json::Object(map) => match map.get(key) {
                    Some(v) => v,
                    None => return Json::Null,
                },
                Json::Array(items) => match key.parse::<usize>().ok().and_then(|i| items.get(i)) {
                    Some(v) => v,
                    None => return Json::Null,
                },
                _ => return Json::Null,
            };
        }
        for index in parts {
            let index = index.trim_end_matches(']');
            current = match index.parse::<usize>().ok().and_then(|i| current.get(i)) {
                Some(v) => v,
                None => return Json::Null,
            };
        }
    }
    current.clone()
}

/// Items of a loop or parallel collection: arrays as-is, objects as
/// `[key, value]` pairs, JSON text parsed first.
pub fn normalize_collection(value: &Json) -> Result<Vec<Json>, BlockError> {
    match value {
        Json::Null => Ok(Vec::new()),
        Json::Array(items) => Ok(items.clone()),
        Json::Object(map) => Ok(map
            .iter()
            .map(|(k, v)| Json::Array(vec![Json::String(k.clone()), v.clone()]))
            .collect()),
        Json::String(text) if text.trim().is_empty() => Ok(Vec::new()),
        Json::String(text) => match serde_json::from_str::<Json>(text.trim()) {
            Ok(parsed @ (Json::Array(_) | Json::Object(_))) => normalize_collection(&parsed),
            _ => Err(BlockError::Configuration(format!(
                "Collection must be an array or object, got \"{}\"",
                text
            ))),
        },
        other => Err(BlockError::Configuration(format!(
            "Collection must be an array or object, got {}",
            other
        ))),
    }
}
