//! Persisted editor representation of a workflow. This is what the store
//! hands back; the serializer turns it into a [`crate::SerializedWorkflow`].

use crate::workflow::{BlockId, LoopType, ParallelType, Position};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub blocks: HashMap<BlockId, BlockRecord>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub loops: HashMap<BlockId, LoopRecord>,
    #[serde(default)]
    pub parallels: HashMap<BlockId, ParallelRecord>,
}

/// A stored workflow as returned by a workflow loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRecord {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub state: WorkflowState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
    pub id: BlockId,
    #[serde(rename = "type")]
    pub block_type: String,
    pub name: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub sub_blocks: HashMap<String, SubBlockRecord>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub data: BlockData,
}

fn default_enabled() -> bool {
    true
}

impl BlockRecord {
    pub fn new(id: impl Into<BlockId>, block_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            block_type: block_type.into(),
            name: name.into(),
            position: Position::default(),
            sub_blocks: HashMap::new(),
            enabled: true,
            data: BlockData::default(),
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        let key = key.into();
        self.sub_blocks.insert(
            key.clone(),
            SubBlockRecord {
                id: key,
                kind: None,
                value: value.into(),
            },
        );
        self
    }

    pub fn with_parent(mut self, parent: impl Into<BlockId>) -> Self {
        self.data.parent_id = Some(parent.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubBlockRecord {
    pub id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// Container metadata stored on a block by the editor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<BlockId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_type: Option<LoopType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_type: Option<ParallelType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub while_condition: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    #[serde(default)]
    pub id: String,
    pub source: BlockId,
    pub target: BlockId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl Edge {
    pub fn new(source: impl Into<BlockId>, target: impl Into<BlockId>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("{}-{}", source, target),
            source,
            target,
            source_handle: None,
            target_handle: None,
        }
    }

    pub fn with_source_handle(mut self, handle: impl Into<String>) -> Self {
        self.source_handle = Some(handle.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopRecord {
    pub id: BlockId,
    pub nodes: Vec<BlockId>,
    #[serde(default)]
    pub iterations: usize,
    #[serde(default)]
    pub loop_type: LoopType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub for_each_items: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub while_condition: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelRecord {
    pub id: BlockId,
    pub nodes: Vec<BlockId>,
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(default)]
    pub parallel_type: ParallelType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution: Option<serde_json::Value>,
}
