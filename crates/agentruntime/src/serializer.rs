//! Turns persisted editor state into an executable [`SerializedWorkflow`].

use crate::registry::BlockRegistry;
use agentcore::routing::is_internal_handle;
use agentcore::{
    BlockConfig, BlockMetadata, BlockRecord, BlockType, ConfigurationError, Connection, Edge,
    LoopDef, LoopType, ParallelDef, ParallelType, SerializedBlock, SerializedWorkflow,
    WorkflowState,
};
use agentcore::state::{LoopRecord, ParallelRecord};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

/// Iterations for a loop block that never stored a count.
pub const DEFAULT_LOOP_ITERATIONS: usize = 5;
/// Branches for a parallel block that never stored a count.
pub const DEFAULT_PARALLEL_COUNT: usize = 5;

pub struct Serializer<'a> {
    registry: &'a BlockRegistry,
}

impl<'a> Serializer<'a> {
    pub fn new(registry: &'a BlockRegistry) -> Self {
        Self { registry }
    }

    pub fn serialize_workflow(
        &self,
        state: &WorkflowState,
    ) -> Result<SerializedWorkflow, ConfigurationError> {
        self.serialize(&state.blocks, &state.edges, &state.loops, &state.parallels)
    }

    pub fn serialize(
        &self,
        blocks: &HashMap<String, BlockRecord>,
        edges: &[Edge],
        loops: &HashMap<String, LoopRecord>,
        parallels: &HashMap<String, ParallelRecord>,
    ) -> Result<SerializedWorkflow, ConfigurationError> {
        let mut workflow = SerializedWorkflow::new();

        let mut records: Vec<&BlockRecord> = blocks.values().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        for record in &records {
            workflow.blocks.push(self.serialize_block(record)?);
        }

        for edge in edges {
            for endpoint in [&edge.source, &edge.target] {
                if !blocks.contains_key(endpoint) {
                    return Err(ConfigurationError::UnknownConnectionEndpoint(endpoint.clone()));
                }
            }
            workflow.connections.push(Connection {
                source: edge.source.clone(),
                target: edge.target.clone(),
                source_handle: edge.source_handle.clone(),
                target_handle: edge.target_handle.clone(),
            });
        }

        for record in &records {
            match BlockType::from_str(&record.block_type) {
                Ok(BlockType::Loop) => {
                    let def = match loops.get(&record.id) {
                        Some(stored) => loop_from_record(stored),
                        None => derive_loop(record, &records),
                    };
                    workflow.loops.insert(record.id.clone(), def);
                }
                Ok(BlockType::Parallel) => {
                    let def = match parallels.get(&record.id) {
                        Some(stored) => parallel_from_record(stored),
                        None => derive_parallel(record, &records),
                    };
                    workflow.parallels.insert(record.id.clone(), def);
                }
                _ => {}
            }
        }

        let containers = workflow
            .loops
            .values()
            .map(|l| (&l.id, &l.nodes))
            .chain(workflow.parallels.values().map(|p| (&p.id, &p.nodes)));
        for (container, nodes) in containers {
            if let Some(node) = nodes.iter().find(|n| !blocks.contains_key(n.as_str())) {
                return Err(ConfigurationError::DanglingContainerNode {
                    container: container.clone(),
                    node: node.clone(),
                });
            }
        }

        check_acyclic(&workflow)?;

        tracing::debug!(
            "Serialized workflow: {} blocks, {} connections, {} loops, {} parallels",
            workflow.blocks.len(),
            workflow.connections.len(),
            workflow.loops.len(),
            workflow.parallels.len()
        );
        Ok(workflow)
    }

    fn serialize_block(&self, record: &BlockRecord) -> Result<SerializedBlock, ConfigurationError> {
        let spec = self.registry.get(&record.block_type)?;

        let mut keys: Vec<&String> = record.sub_blocks.keys().collect();
        keys.sort();
        let mut params = serde_json::Map::new();
        for key in keys {
            params.insert(key.clone(), record.sub_blocks[key].value.clone());
        }

        let tool = if spec.uses_provider {
            let explicit = params
                .get("provider")
                .and_then(|v| v.as_str())
                .filter(|s| !s.trim().is_empty());
            let model = params.get("model").and_then(|v| v.as_str()).unwrap_or_default();
            Some(explicit.map(str::to_string).unwrap_or_else(|| provider_for_model(model).to_string()))
        } else {
            spec.tool.clone()
        };

        Ok(SerializedBlock {
            id: record.id.clone(),
            metadata: BlockMetadata {
                block_type: spec.block_type,
                name: record.name.clone(),
                description: Some(spec.description.clone()),
            },
            position: record.position,
            config: BlockConfig { tool, params },
            inputs: spec.input_types(),
            outputs: spec.output_types(),
            enabled: record.enabled,
        })
    }
}

/// Provider id for a model name, by well-known prefixes.
pub fn provider_for_model(model: &str) -> &'static str {
    let model = model.trim().to_ascii_lowercase();
    if model.starts_with("claude") {
        "anthropic"
    } else if model.starts_with("gemini") {
        "google"
    } else if model.starts_with("deepseek") {
        "deepseek"
    } else if model.starts_with("grok") {
        "xai"
    } else if model.starts_with("llama") || model.starts_with("mistral") || model.starts_with("qwen") {
        "ollama"
    } else {
        "openai"
    }
}

fn children_of(container: &str, records: &[&BlockRecord]) -> Vec<String> {
    records
        .iter()
        .filter(|r| r.data.parent_id.as_deref() == Some(container))
        .map(|r| r.id.clone())
        .collect()
}

fn sub_block_count(record: &BlockRecord, keys: &[&str]) -> Option<usize> {
    keys.iter().find_map(|k| {
        let value = &record.sub_blocks.get(*k)?.value;
        value
            .as_u64()
            .map(|n| n as usize)
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
    })
}

fn loop_from_record(stored: &LoopRecord) -> LoopDef {
    LoopDef {
        id: stored.id.clone(),
        nodes: stored.nodes.clone(),
        iterations: stored.iterations,
        loop_type: stored.loop_type,
        for_each_items: stored.for_each_items.clone(),
        while_condition: stored.while_condition.clone(),
    }
}

fn derive_loop(record: &BlockRecord, records: &[&BlockRecord]) -> LoopDef {
    let loop_type = record.data.loop_type.unwrap_or(LoopType::For);
    let iterations = record
        .data
        .count
        .or_else(|| sub_block_count(record, &["iterations", "count"]))
        .unwrap_or(DEFAULT_LOOP_ITERATIONS);
    LoopDef {
        id: record.id.clone(),
        nodes: children_of(&record.id, records),
        iterations,
        loop_type,
        for_each_items: record.data.collection.clone().or_else(|| {
            record.sub_blocks.get("collection").map(|s| s.value.clone())
        }),
        while_condition: record.data.while_condition.clone().or_else(|| {
            record
                .sub_blocks
                .get("whileCondition")
                .and_then(|s| s.value.as_str().map(str::to_string))
        }),
    }
}

fn parallel_from_record(stored: &ParallelRecord) -> ParallelDef {
    ParallelDef {
        id: stored.id.clone(),
        nodes: stored.nodes.clone(),
        count: stored.count.unwrap_or(DEFAULT_PARALLEL_COUNT),
        parallel_type: stored.parallel_type,
        distribution: stored.distribution.clone(),
    }
}

fn derive_parallel(record: &BlockRecord, records: &[&BlockRecord]) -> ParallelDef {
    let distribution = record
        .data
        .collection
        .clone()
        .or_else(|| record.sub_blocks.get("collection").map(|s| s.value.clone()));
    let parallel_type = record.data.parallel_type.unwrap_or(if distribution.is_some() {
        ParallelType::Collection
    } else {
        ParallelType::Count
    });
    ParallelDef {
        id: record.id.clone(),
        nodes: children_of(&record.id, records),
        count: record
            .data
            .count
            .or_else(|| sub_block_count(record, &["count"]))
            .unwrap_or(DEFAULT_PARALLEL_COUNT),
        parallel_type,
        distribution,
    }
}

/// Rejects cycles among connections the scheduler follows. Loop re-entry is
/// expressed through containers, never through back edges.
fn check_acyclic(workflow: &SerializedWorkflow) -> Result<(), ConfigurationError> {
    let mut graph = DiGraph::<&str, ()>::new();
    let mut index = HashMap::new();
    for block in &workflow.blocks {
        index.insert(block.id.as_str(), graph.add_node(block.id.as_str()));
    }

    let mut seen = HashSet::new();
    for conn in &workflow.connections {
        if is_internal_handle(conn.handle()) {
            continue;
        }
        if !seen.insert((conn.source.as_str(), conn.target.as_str())) {
            continue;
        }
        if let (Some(from), Some(to)) = (index.get(conn.source.as_str()), index.get(conn.target.as_str())) {
            graph.add_edge(*from, *to, ());
        }
    }

    toposort(&graph, None).map(|_| ()).map_err(|cycle| {
        ConfigurationError::CyclicGraph(graph[cycle.node_id()].to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_inference() {
        assert_eq!(provider_for_model("gpt-4o"), "openai");
        assert_eq!(provider_for_model("claude-3-7-sonnet"), "anthropic");
        assert_eq!(provider_for_model("Gemini-2.0-flash"), "google");
        assert_eq!(provider_for_model(""), "openai");
    }
}
