use crate::workflow::BlockId;
use crate::BlockType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Separator used when deriving a child execution id for a sub-workflow.
pub const SUB_EXECUTION_SEPARATOR: &str = "_sub_";

/// Output and bookkeeping for one block within a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlockState {
    pub output: serde_json::Value,
    pub executed: bool,
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BlockState {
    pub fn succeeded(output: serde_json::Value, execution_time_ms: u64) -> Self {
        Self {
            output,
            executed: true,
            execution_time_ms,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, execution_time_ms: u64) -> Self {
        let error = error.into();
        Self {
            output: serde_json::json!({ "error": error }),
            executed: true,
            execution_time_ms,
            error: Some(error),
        }
    }

    /// Output carried over from a previous run; readable, not executed.
    pub fn cached(output: serde_json::Value) -> Self {
        Self {
            output,
            executed: false,
            execution_time_ms: 0,
            error: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Branch decisions recorded by router and condition blocks. The only source
/// of truth for which branch was selected.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Decisions {
    pub router: HashMap<BlockId, BlockId>,
    pub condition: HashMap<BlockId, String>,
}

impl Decisions {
    pub fn clear_for(&mut self, block_id: &str) {
        self.router.remove(block_id);
        self.condition.remove(block_id);
    }
}

/// Per-block log entry emitted to the execution logging sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockLog {
    pub block_id: BlockId,
    pub block_name: String,
    pub block_type: BlockType,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Index and item of the parallel branch a body block runs in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParallelScope {
    pub parallel_id: BlockId,
    pub index: usize,
    pub item: serde_json::Value,
    pub items: serde_json::Value,
}

/// Mutable single-run state. Owned by exactly one executor invocation.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub workflow_id: Option<String>,
    /// Number of workflow blocks between this run and the top-level run.
    pub depth: usize,
    /// Workflow ids of the enclosing runs, outermost first.
    pub ancestors: Vec<String>,
    pub block_states: HashMap<BlockId, BlockState>,
    pub executed_blocks: HashSet<BlockId>,
    pub active_execution_path: HashSet<BlockId>,
    pub decisions: Decisions,
    pub loop_iterations: HashMap<BlockId, usize>,
    pub loop_items: HashMap<BlockId, serde_json::Value>,
    pub completed_loops: HashSet<BlockId>,
    pub environment_variables: HashMap<String, String>,
    pub workflow_variables: HashMap<String, serde_json::Value>,
    pub block_logs: Vec<BlockLog>,
    pub parallel_scope: Option<ParallelScope>,
    pub started_at: DateTime<Utc>,
}

impl ExecutionContext {
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            workflow_id: None,
            depth: 0,
            ancestors: Vec::new(),
            block_states: HashMap::new(),
            executed_blocks: HashSet::new(),
            active_execution_path: HashSet::new(),
            decisions: Decisions::default(),
            loop_iterations: HashMap::new(),
            loop_items: HashMap::new(),
            completed_loops: HashSet::new(),
            environment_variables: HashMap::new(),
            workflow_variables: HashMap::new(),
            block_logs: Vec::new(),
            parallel_scope: None,
            started_at: Utc::now(),
        }
    }

    /// Workflow ids from the top-level run down to and including this one.
    pub fn call_chain(&self) -> Vec<String> {
        let mut chain = self.ancestors.clone();
        chain.extend(self.workflow_id.iter().cloned());
        chain
    }

    /// True when `workflow_id` is this run's workflow or one of its callers.
    pub fn is_on_call_chain(&self, workflow_id: &str) -> bool {
        self.workflow_id.as_deref() == Some(workflow_id)
            || self.ancestors.iter().any(|id| id == workflow_id)
    }

    /// Execution id of a child workflow invoked from this run.
    pub fn child_execution_id(&self, child_workflow_id: &str) -> String {
        format!(
            "{}{}{}",
            self.execution_id, SUB_EXECUTION_SEPARATOR, child_workflow_id
        )
    }

    pub fn is_executed(&self, block_id: &str) -> bool {
        self.executed_blocks.contains(block_id)
    }

    pub fn output(&self, block_id: &str) -> Option<&serde_json::Value> {
        self.block_states.get(block_id).map(|s| &s.output)
    }

    pub fn has_failed(&self, block_id: &str) -> bool {
        self.block_states
            .get(block_id)
            .map(BlockState::is_failed)
            .unwrap_or(false)
    }

    pub fn record(&mut self, block_id: &str, state: BlockState) {
        self.block_states.insert(block_id.to_string(), state);
        self.executed_blocks.insert(block_id.to_string());
    }

    pub fn activate(&mut self, block_id: impl Into<BlockId>) {
        self.active_execution_path.insert(block_id.into());
    }

    /// Forget everything a block did so a container can run it again.
    pub fn reset_block(&mut self, block_id: &str) {
        self.executed_blocks.remove(block_id);
        self.active_execution_path.remove(block_id);
        self.block_states.remove(block_id);
        self.decisions.clear_for(block_id);
        self.completed_loops.remove(block_id);
        self.loop_iterations.remove(block_id);
        self.loop_items.remove(block_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn child_execution_id_appends_separator() {
        let ctx = ExecutionContext::new("run");
        assert_eq!(ctx.depth, 0);
        assert_eq!(ctx.child_execution_id("wf-a"), "run_sub_wf-a");
    }

    #[test]
    fn depth_ignores_separators_in_ids() {
        let ctx = ExecutionContext::new("x_sub_x_sub_x_sub_x");
        assert_eq!(ctx.depth, 0);
    }

    #[test]
    fn call_chain_includes_current_workflow() {
        let mut ctx = ExecutionContext::new("run");
        assert!(ctx.call_chain().is_empty());
        ctx.ancestors = vec!["a".into(), "b".into()];
        ctx.workflow_id = Some("c".into());

        assert_eq!(ctx.call_chain(), vec!["a", "b", "c"]);
        assert!(ctx.is_on_call_chain("a"));
        assert!(ctx.is_on_call_chain("c"));
        assert!(!ctx.is_on_call_chain("d"));
    }

    #[test]
    fn reset_block_clears_decisions_and_state() {
        let mut ctx = ExecutionContext::new("run");
        ctx.record("router", BlockState::succeeded(json!({}), 3));
        ctx.activate("router");
        ctx.decisions.router.insert("router".into(), "next".into());

        ctx.reset_block("router");

        assert!(!ctx.is_executed("router"));
        assert!(!ctx.active_execution_path.contains("router"));
        assert!(ctx.decisions.router.is_empty());
        assert!(ctx.output("router").is_none());
    }

    #[test]
    fn failed_state_carries_error_in_output() {
        let state = BlockState::failed("boom", 1);
        assert!(state.is_failed());
        assert_eq!(state.output, json!({"error": "boom"}));
    }
}
