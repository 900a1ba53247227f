use crate::{BlockType, ParamType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type BlockId = String;

pub const SERIALIZED_VERSION: &str = "1.0";

/// Executable workflow graph produced by the serializer. Immutable for the
/// lifetime of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedWorkflow {
    pub version: String,
    pub blocks: Vec<SerializedBlock>,
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub loops: HashMap<BlockId, LoopDef>,
    #[serde(default)]
    pub parallels: HashMap<BlockId, ParallelDef>,
}

impl Default for SerializedWorkflow {
    fn default() -> Self {
        Self::new()
    }
}

impl SerializedWorkflow {
    pub fn new() -> Self {
        Self {
            version: SERIALIZED_VERSION.to_string(),
            blocks: Vec::new(),
            connections: Vec::new(),
            loops: HashMap::new(),
            parallels: HashMap::new(),
        }
    }

    pub fn add_block(&mut self, block: SerializedBlock) -> BlockId {
        let id = block.id.clone();
        self.blocks.push(block);
        id
    }

    pub fn connect(&mut self, source: impl Into<BlockId>, target: impl Into<BlockId>) {
        self.connections.push(Connection::new(source, target));
    }

    pub fn connect_handle(
        &mut self,
        source: impl Into<BlockId>,
        handle: impl Into<String>,
        target: impl Into<BlockId>,
    ) {
        self.connections
            .push(Connection::new(source, target).with_source_handle(handle));
    }

    pub fn find_block(&self, id: &str) -> Option<&SerializedBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn block_type(&self, id: &str) -> Option<BlockType> {
        self.find_block(id).map(|b| b.metadata.block_type)
    }

    pub fn starter(&self) -> Option<&SerializedBlock> {
        self.blocks
            .iter()
            .find(|b| b.metadata.block_type == BlockType::Starter)
    }

    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| c.target == id)
    }

    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| c.source == id)
    }

    /// Id of the loop or parallel whose body contains `id`, if any.
    pub fn container_of(&self, id: &str) -> Option<&str> {
        self.loops
            .values()
            .find(|l| l.nodes.iter().any(|n| n == id))
            .map(|l| l.id.as_str())
            .or_else(|| {
                self.parallels
                    .values()
                    .find(|p| p.nodes.iter().any(|n| n == id))
                    .map(|p| p.id.as_str())
            })
    }

    pub fn loop_containing(&self, id: &str) -> Option<&LoopDef> {
        self.loops.values().find(|l| l.nodes.iter().any(|n| n == id))
    }

    pub fn parallel_containing(&self, id: &str) -> Option<&ParallelDef> {
        self.parallels
            .values()
            .find(|p| p.nodes.iter().any(|n| n == id))
    }
}

/// Block in an executable workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedBlock {
    pub id: BlockId,
    pub metadata: BlockMetadata,
    #[serde(default)]
    pub position: Position,
    pub config: BlockConfig,
    #[serde(default)]
    pub inputs: HashMap<String, ParamType>,
    #[serde(default)]
    pub outputs: HashMap<String, ParamType>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl SerializedBlock {
    pub fn new(id: impl Into<BlockId>, block_type: BlockType) -> Self {
        let id = id.into();
        Self {
            metadata: BlockMetadata {
                block_type,
                name: id.clone(),
                description: None,
            },
            id,
            position: Position::default(),
            config: BlockConfig::default(),
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            enabled: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = name.into();
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.config.tool = Some(tool.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.config.params.insert(key.into(), value.into());
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, ty: ParamType) -> Self {
        self.inputs.insert(key.into(), ty);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn block_type(&self) -> BlockType {
        self.metadata.block_type
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn param(&self, key: &str) -> Option<&serde_json::Value> {
        self.config.params.get(key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockMetadata {
    pub block_type: BlockType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// Directed edge between two blocks. `source_handle` distinguishes output
/// ports on the same block (condition branches, loop start/end, error path).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub source: BlockId,
    pub target: BlockId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl Connection {
    pub fn new(source: impl Into<BlockId>, target: impl Into<BlockId>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
        }
    }

    pub fn with_source_handle(mut self, handle: impl Into<String>) -> Self {
        self.source_handle = Some(handle.into());
        self
    }

    pub fn handle(&self) -> Option<&str> {
        self.source_handle.as_deref()
    }
}

/// Node position in the visual editor
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum LoopType {
    #[default]
    For,
    ForEach,
    While,
    DoWhile,
}

/// Body sub-graph re-entered by a loop block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoopDef {
    pub id: BlockId,
    pub nodes: Vec<BlockId>,
    pub iterations: usize,
    #[serde(default)]
    pub loop_type: LoopType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub for_each_items: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub while_condition: Option<String>,
}

impl LoopDef {
    pub fn new(id: impl Into<BlockId>, nodes: Vec<BlockId>, iterations: usize) -> Self {
        Self {
            id: id.into(),
            nodes,
            iterations,
            loop_type: LoopType::For,
            for_each_items: None,
            while_condition: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ParallelType {
    #[default]
    Count,
    Collection,
}

/// Body sub-graph fanned out concurrently by a parallel block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParallelDef {
    pub id: BlockId,
    pub nodes: Vec<BlockId>,
    pub count: usize,
    #[serde(default)]
    pub parallel_type: ParallelType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution: Option<serde_json::Value>,
}

impl ParallelDef {
    pub fn new(id: impl Into<BlockId>, nodes: Vec<BlockId>, count: usize) -> Self {
        Self {
            id: id.into(),
            nodes,
            count,
            parallel_type: ParallelType::Count,
            distribution: None,
        }
    }
}

/// Error handling policy for blocks without an explicit error path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ErrorHandling {
    #[default]
    StopWorkflow,
    ContinueOnError,
}
