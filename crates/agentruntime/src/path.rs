//! Maintains the active execution path after each layer.
//!
//! Routers and conditions activate exactly the branch they decided for.
//! Every other block activates its outgoing targets, following `error`
//! handles only when it failed and all other handles only when it
//! succeeded. Loop and parallel handles are left to the container
//! orchestration.

use agentcore::routing::{condition_handle, is_error_handle, is_internal_handle};
use agentcore::{BlockType, ExecutionContext, SerializedWorkflow};

pub struct PathTracker<'a> {
    workflow: &'a SerializedWorkflow,
}

impl<'a> PathTracker<'a> {
    pub fn new(workflow: &'a SerializedWorkflow) -> Self {
        Self { workflow }
    }

    pub fn is_in_active_path(&self, block_id: &str, ctx: &ExecutionContext) -> bool {
        ctx.active_execution_path.contains(block_id)
    }

    /// Extend the active path from the blocks of the layer that just ran.
    pub fn update_execution_paths(&self, executed: &[String], ctx: &mut ExecutionContext) {
        for block_id in executed {
            let Some(block) = self.workflow.find_block(block_id) else {
                continue;
            };
            let failed = ctx.has_failed(block_id);

            match block.block_type() {
                kind if failed || !kind.is_decision() => self.update_regular_paths(block_id, failed, ctx),
                BlockType::Router => self.update_router_paths(block_id, ctx),
                _ => self.update_condition_paths(block_id, ctx),
            }
        }
    }

    fn update_router_paths(&self, block_id: &str, ctx: &mut ExecutionContext) {
        if let Some(target) = ctx.decisions.router.get(block_id).cloned() {
            tracing::debug!("Router {} activated {}", block_id, target);
            ctx.activate(target);
        }
    }

    fn update_condition_paths(&self, block_id: &str, ctx: &mut ExecutionContext) {
        let Some(condition_id) = ctx.decisions.condition.get(block_id) else {
            return;
        };
        let handle = condition_handle(condition_id);
        let targets: Vec<String> = self
            .workflow
            .outgoing(block_id)
            .filter(|c| c.handle() == Some(handle.as_str()))
            .map(|c| c.target.clone())
            .collect();
        for target in targets {
            tracing::debug!("Condition {} activated {}", block_id, target);
            ctx.activate(target);
        }
    }

    fn update_regular_paths(&self, block_id: &str, failed: bool, ctx: &mut ExecutionContext) {
        let targets: Vec<String> = self
            .workflow
            .outgoing(block_id)
            .filter(|c| !is_internal_handle(c.handle()))
            .filter(|c| is_error_handle(c.handle()) == failed)
            .map(|c| c.target.clone())
            .collect();
        for target in targets {
            ctx.activate(target);
        }
    }
}
