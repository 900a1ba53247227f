//! Loop and parallel orchestration.
//!
//! A container runs its body sub-graph to quiescence with the same layer
//! scheduler as the top level. Loops reuse the run's context and reset the
//! body between iterations; parallels give every branch its own copy of
//! the context and merge the branch outputs back under virtual block ids.

use super::{BlockRun, Executor, Scope};
use crate::expression::evaluate_condition;
use crate::handlers::BlockOutput;
use crate::resolver::{normalize_collection, InputResolver, Origin};
use agentcore::routing::{requires_active_path_check, LOOP_END_HANDLE, LOOP_START_HANDLE, PARALLEL_END_HANDLE, PARALLEL_START_HANDLE};
use agentcore::{
    BlockError, BlockId, BlockType, ExecutionContext, ExecutionEvent, LoopDef, LoopType,
    ParallelScope, ParallelType,
};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value as Json};
use std::time::Instant;

/// Cap for while and doWhile loops that declare no iteration limit.
pub const MAX_CONDITIONAL_ITERATIONS: usize = 1000;

/// Id under which a parallel branch's output for `block_id` is stored.
pub fn virtual_block_id(block_id: &str, parallel_id: &str, index: usize) -> String {
    format!("{}_parallel_{}_iteration_{}", block_id, parallel_id, index)
}

impl Executor {
    pub(super) async fn run_container(
        &self,
        block_id: &BlockId,
        ctx: &mut ExecutionContext,
        resolver: &InputResolver<'_>,
    ) -> BlockRun {
        let started_at = Utc::now();
        let timer = Instant::now();
        let block_type = self.workflow.block_type(block_id);
        if let Some(block_type) = block_type {
            self.emit(ExecutionEvent::BlockStarted {
                execution_id: ctx.execution_id.clone(),
                block_id: block_id.clone(),
                block_type,
                timestamp: started_at,
            });
        }

        let result = match block_type {
            Some(BlockType::Loop) => self.execute_loop(block_id, ctx, resolver).await,
            Some(BlockType::Parallel) => self.execute_parallel(block_id, ctx, resolver).await,
            _ => Err(BlockError::Configuration(format!(
                "Block {} is not a container",
                block_id
            ))),
        };

        BlockRun {
            block_id: block_id.clone(),
            started_at,
            duration_ms: timer.elapsed().as_millis() as u64,
            result,
        }
    }

    async fn execute_loop(
        &self,
        loop_id: &BlockId,
        ctx: &mut ExecutionContext,
        resolver: &InputResolver<'_>,
    ) -> Result<BlockOutput, BlockError> {
        let def = self
            .workflow
            .loops
            .get(loop_id)
            .ok_or_else(|| BlockError::Configuration(format!("Loop {} is not defined", loop_id)))?;

        if ctx.completed_loops.contains(loop_id) {
            tracing::debug!("Loop {} already completed", loop_id);
            return Ok(BlockOutput::new(ctx.output(loop_id).cloned().unwrap_or_else(|| json!({}))));
        }

        let items = match def.loop_type {
            LoopType::ForEach => resolver.loop_items(def, ctx)?,
            _ => Vec::new(),
        };
        let max_iterations = match def.loop_type {
            LoopType::For => def.iterations,
            LoopType::ForEach => items.len(),
            LoopType::While | LoopType::DoWhile if def.iterations == 0 => MAX_CONDITIONAL_ITERATIONS,
            LoopType::While | LoopType::DoWhile => def.iterations,
        };

        let mut results = Vec::new();
        let mut index = 0;
        while index < max_iterations {
            ctx.loop_iterations.insert(loop_id.clone(), index);
            if let Some(item) = items.get(index) {
                ctx.loop_items.insert(loop_id.clone(), item.clone());
            }
            if def.loop_type == LoopType::While && !self.loop_condition(def, ctx, resolver)? {
                break;
            }

            tracing::debug!("Loop {} iteration {}", loop_id, index);
            self.prepare_body(loop_id, &def.nodes, LOOP_START_HANDLE, ctx);
            self.run_layers(Scope::Body(&def.nodes), ctx, resolver)
                .await
                .map_err(|e| {
                    BlockError::execution(format!("Loop {} iteration {} failed: {}", loop_id, index, e))
                })?;
            results.push(self.body_outputs(&def.nodes, ctx));
            index += 1;

            if def.loop_type == LoopType::DoWhile {
                ctx.loop_iterations.insert(loop_id.clone(), index);
                if !self.loop_condition(def, ctx, resolver)? {
                    break;
                }
            }
        }
        if index == max_iterations && def.loop_type != LoopType::For && def.loop_type != LoopType::ForEach {
            tracing::warn!("Loop {} stopped at its iteration cap of {}", loop_id, max_iterations);
        }

        ctx.loop_iterations.insert(loop_id.clone(), index);
        ctx.completed_loops.insert(loop_id.clone());
        self.activate_end_targets(loop_id, LOOP_END_HANDLE, ctx);
        tracing::info!("Loop {} completed after {} iterations", loop_id, index);

        Ok(BlockOutput::new(json!({
            "loopId": loop_id,
            "iterations": index,
            "results": results,
        })))
    }

    fn loop_condition(
        &self,
        def: &LoopDef,
        ctx: &ExecutionContext,
        resolver: &InputResolver<'_>,
    ) -> Result<bool, BlockError> {
        let Some(condition) = def.while_condition.as_deref().filter(|c| !c.trim().is_empty()) else {
            return Ok(false);
        };
        let expression = resolver.resolve_expression(condition, ctx, Origin::Container(&def.id))?;
        evaluate_condition(&expression)
            .map_err(|e| BlockError::execution(format!("Loop {} condition: {}", def.id, e)))
    }

    async fn execute_parallel(
        &self,
        parallel_id: &BlockId,
        ctx: &mut ExecutionContext,
        resolver: &InputResolver<'_>,
    ) -> Result<BlockOutput, BlockError> {
        let def = self.workflow.parallels.get(parallel_id).ok_or_else(|| {
            BlockError::Configuration(format!("Parallel {} is not defined", parallel_id))
        })?;

        let (items, count) = match def.parallel_type {
            ParallelType::Collection => {
                let raw = def.distribution.clone().unwrap_or(Json::Null);
                let resolved = match self.workflow.find_block(parallel_id) {
                    Some(block) => resolver.resolve_value(&raw, ctx, Origin::Block(block))?,
                    None => raw,
                };
                let items = normalize_collection(&resolved)?;
                let count = items.len();
                (items, count)
            }
            ParallelType::Count => (Vec::new(), def.count),
        };
        let all_items = Json::Array(items.clone());

        let branches: Vec<ExecutionContext> = (0..count)
            .map(|index| {
                let mut branch = ctx.clone();
                branch.execution_id = format!(
                    "{}_parallel_{}_iteration_{}",
                    ctx.execution_id, parallel_id, index
                );
                branch.block_logs = Vec::new();
                branch.parallel_scope = Some(ParallelScope {
                    parallel_id: parallel_id.clone(),
                    index,
                    item: items.get(index).cloned().unwrap_or(Json::Null),
                    items: all_items.clone(),
                });
                self.prepare_body(parallel_id, &def.nodes, PARALLEL_START_HANDLE, &mut branch);
                branch
            })
            .collect();

        tracing::debug!("Parallel {} running {} branches", parallel_id, count);
        let finished: Vec<_> = stream::iter(branches.into_iter().enumerate().map(
            |(index, mut branch)| async move {
                let outcome = self
                    .run_layers(Scope::Body(&def.nodes), &mut branch, resolver)
                    .await;
                (index, branch, outcome)
            },
        ))
        .buffered(self.config.max_parallel_blocks.max(1))
        .collect()
        .await;

        let mut results = Vec::with_capacity(count);
        let mut first_error = None;
        for (index, branch, outcome) in finished {
            if let Err(err) = outcome {
                first_error.get_or_insert_with(|| {
                    format!("Parallel {} branch {} failed: {}", parallel_id, index, err)
                });
            }
            for node in &def.nodes {
                if !branch.is_executed(node) {
                    continue;
                }
                if let Some(state) = branch.block_states.get(node) {
                    ctx.block_states
                        .insert(virtual_block_id(node, parallel_id, index), state.clone());
                    ctx.block_states.insert(node.clone(), state.clone());
                }
            }
            results.push(self.body_outputs(&def.nodes, &branch));
            ctx.block_logs.extend(branch.block_logs);
        }
        if let Some(message) = first_error {
            return Err(BlockError::execution(message));
        }

        ctx.completed_loops.insert(parallel_id.clone());
        self.activate_end_targets(parallel_id, PARALLEL_END_HANDLE, ctx);
        tracing::info!("Parallel {} completed {} branches", parallel_id, count);

        Ok(BlockOutput::new(json!({
            "parallelId": parallel_id,
            "count": count,
            "results": results,
        })))
    }

    /// Reset the body and activate its entry blocks: targets of the start
    /// handle, plus regular blocks nothing inside the body points at.
    fn prepare_body(
        &self,
        container_id: &str,
        nodes: &[BlockId],
        start_handle: &str,
        ctx: &mut ExecutionContext,
    ) {
        for node in nodes {
            ctx.reset_block(node);
        }
        let entries: Vec<BlockId> = self
            .workflow
            .outgoing(container_id)
            .filter(|c| c.handle() == Some(start_handle))
            .map(|c| c.target.clone())
            .collect();
        for entry in entries {
            ctx.activate(entry);
        }
        for node in nodes {
            let Some(block) = self.workflow.find_block(node) else {
                continue;
            };
            if requires_active_path_check(block.block_type()) {
                continue;
            }
            let fed_from_body = self
                .workflow
                .incoming(node)
                .any(|c| c.source == container_id || nodes.contains(&c.source));
            if !fed_from_body {
                ctx.activate(node.clone());
            }
        }
    }

    fn activate_end_targets(&self, container_id: &str, end_handle: &str, ctx: &mut ExecutionContext) {
        let targets: Vec<BlockId> = self
            .workflow
            .outgoing(container_id)
            .filter(|c| c.handle() == Some(end_handle))
            .map(|c| c.target.clone())
            .collect();
        for target in targets {
            ctx.activate(target);
        }
    }

    /// Outputs of the body blocks that ran, keyed by block id.
    fn body_outputs(&self, nodes: &[BlockId], ctx: &ExecutionContext) -> Json {
        let map: serde_json::Map<String, Json> = nodes
            .iter()
            .filter(|n| ctx.is_executed(n))
            .filter_map(|n| ctx.output(n).map(|o| (n.clone(), o.clone())))
            .collect();
        Json::Object(map)
    }
}
