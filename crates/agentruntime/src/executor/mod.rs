//! Layered workflow executor.
//!
//! Each round collects every block that is enabled, unexecuted, outside any
//! container body, on the active path, not excluded by an upstream decision
//! and whose dependencies are satisfied. Regular blocks of a layer run
//! concurrently against a shared view of the context and their results are
//! applied afterwards; loop and parallel containers then run one at a time
//! with exclusive access. Paths are updated once the whole layer is applied.

mod containers;

pub use containers::{virtual_block_id, MAX_CONDITIONAL_ITERATIONS};

use crate::handlers::{starter_output, BlockHandler, BlockOutput, BlockResult, Decision, HandlerContext, StreamingExecution};
use crate::path::PathTracker;
use crate::resolver::InputResolver;
use crate::runtime::RuntimeConfig;
use crate::services::Services;
use agentcore::routing::{
    condition_handle, is_container_end_handle, is_error_handle, should_skip_in_selective_activation,
    PARALLEL_START_HANDLE, LOOP_START_HANDLE,
};
use agentcore::{
    BlockError, BlockId, BlockLog, BlockState, BlockType, ConfigurationError, Connection,
    ErrorHandling, EventEmitter, ExecutionContext, ExecutionEvent, ExecutionMetadata,
    ExecutionResult, FlowError, LoopType, ParallelType, SerializedBlock, SerializedWorkflow,
};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use serde_json::{json, Value as Json};
use std::collections::HashMap;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

/// Inputs for one run.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub execution_id: String,
    pub workflow_input: Json,
    pub environment_variables: HashMap<String, String>,
    pub workflow_variables: HashMap<String, Json>,
    /// Outputs carried over from an earlier run, readable by reference.
    pub block_states: HashMap<BlockId, Json>,
    /// Nesting depth of the run; zero for a top-level run.
    pub depth: usize,
    /// Workflow ids of the runs that invoked this one, outermost first.
    pub ancestors: Vec<String>,
}

impl ExecutionRequest {
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            workflow_input: json!({}),
            environment_variables: HashMap::new(),
            workflow_variables: HashMap::new(),
            block_states: HashMap::new(),
            depth: 0,
            ancestors: Vec::new(),
        }
    }

    /// Request with a fresh random execution id.
    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_input(mut self, input: Json) -> Self {
        self.workflow_input = input;
        self
    }

    pub fn with_environment(mut self, env: HashMap<String, String>) -> Self {
        self.environment_variables = env;
        self
    }

    pub fn with_variables(mut self, variables: HashMap<String, Json>) -> Self {
        self.workflow_variables = variables;
        self
    }

    pub fn with_block_states(mut self, states: HashMap<BlockId, Json>) -> Self {
        self.block_states = states;
        self
    }

    /// Marks this as a child run invoked from `parent`, one level deeper.
    pub fn nested_under(mut self, parent: &ExecutionContext) -> Self {
        self.depth = parent.depth + 1;
        self.ancestors = parent.call_chain();
        self
    }
}

/// Which blocks a scheduling round may pick from.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Scope<'s> {
    TopLevel,
    Body(&'s [BlockId]),
}

/// Outcome of one block invocation, applied to the context after the layer.
struct BlockRun {
    block_id: BlockId,
    started_at: DateTime<Utc>,
    duration_ms: u64,
    result: Result<BlockOutput, BlockError>,
}

pub struct Executor {
    workflow: SerializedWorkflow,
    services: Services,
    config: RuntimeConfig,
    workflow_id: Option<String>,
    cancellation: CancellationToken,
}

impl Executor {
    pub fn new(workflow: SerializedWorkflow, services: Services, config: RuntimeConfig) -> Self {
        Self {
            workflow,
            services,
            config,
            workflow_id: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn workflow(&self) -> &SerializedWorkflow {
        &self.workflow
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Boxed [`Executor::execute`], for callers that recurse into nested runs.
    pub fn execute_boxed(&self, request: ExecutionRequest) -> BoxFuture<'_, ExecutionResult> {
        self.execute(request).boxed()
    }

    /// Run the workflow to completion. Never panics or returns early: every
    /// failure ends up in the result.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let execution_id = request.execution_id.clone();
        let start_time = Utc::now();
        let timer = Instant::now();

        self.emit(ExecutionEvent::WorkflowStarted {
            execution_id: execution_id.clone(),
            workflow_id: self.workflow_id.clone(),
            timestamp: start_time,
        });
        tracing::info!(
            "Starting workflow execution {} ({} blocks)",
            execution_id,
            self.workflow.blocks.len()
        );

        let result = match self.validate_workflow() {
            Err(err) => {
                tracing::error!("Workflow validation failed: {}", err);
                ExecutionResult::failure(
                    FlowError::from(err).to_string(),
                    Vec::new(),
                    self.metadata(&execution_id, start_time, &timer),
                )
            }
            Ok(()) => {
                let mut ctx = self.create_execution_context(request);
                let resolver = InputResolver::new(&self.workflow);
                let outcome = self.run_layers(Scope::TopLevel, &mut ctx, &resolver).await;
                self.finish(ctx, outcome, self.metadata(&execution_id, start_time, &timer))
            }
        };

        if result.success {
            tracing::info!(
                "Workflow execution {} completed in {}ms",
                execution_id,
                result.metadata.duration_ms
            );
        } else {
            tracing::warn!(
                "Workflow execution {} failed: {}",
                execution_id,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
        self.emit(ExecutionEvent::WorkflowCompleted {
            execution_id,
            success: result.success,
            duration_ms: result.metadata.duration_ms,
            timestamp: Utc::now(),
        });
        result
    }

    /// Structural checks that must hold before any block runs.
    pub fn validate_workflow(&self) -> Result<(), ConfigurationError> {
        let wf = &self.workflow;
        let starters: Vec<&SerializedBlock> = wf
            .blocks
            .iter()
            .filter(|b| b.block_type() == BlockType::Starter && b.enabled)
            .collect();
        let [starter] = starters.as_slice() else {
            return Err(ConfigurationError::MissingStarter);
        };
        if wf.incoming(&starter.id).next().is_some() {
            return Err(ConfigurationError::Invalid(
                "Starter block cannot have incoming connections".into(),
            ));
        }

        for conn in &wf.connections {
            for endpoint in [&conn.source, &conn.target] {
                if wf.find_block(endpoint).is_none() {
                    return Err(ConfigurationError::UnknownConnectionEndpoint(endpoint.clone()));
                }
            }
        }

        for def in wf.loops.values() {
            check_container(wf, &def.id, &def.nodes, BlockType::Loop)?;
            match def.loop_type {
                LoopType::For if def.iterations == 0 => {
                    return Err(ConfigurationError::Invalid(format!(
                        "Loop {} must run at least one iteration",
                        def.id
                    )))
                }
                LoopType::While | LoopType::DoWhile
                    if def.while_condition.as_deref().map_or(true, |c| c.trim().is_empty()) =>
                {
                    return Err(ConfigurationError::Invalid(format!(
                        "Loop {} needs a condition",
                        def.id
                    )))
                }
                _ => {}
            }
        }
        for def in wf.parallels.values() {
            check_container(wf, &def.id, &def.nodes, BlockType::Parallel)?;
            if def.parallel_type == ParallelType::Count && def.count == 0 {
                return Err(ConfigurationError::Invalid(format!(
                    "Parallel {} must run at least one branch",
                    def.id
                )));
            }
        }
        Ok(())
    }

    /// Fresh context with the starter already executed and its successors
    /// on the active path.
    pub fn create_execution_context(&self, request: ExecutionRequest) -> ExecutionContext {
        let mut ctx = ExecutionContext::new(request.execution_id);
        ctx.workflow_id = self.workflow_id.clone();
        ctx.depth = request.depth;
        ctx.ancestors = request.ancestors;
        ctx.environment_variables = request.environment_variables;
        ctx.workflow_variables = request.workflow_variables;
        for (block_id, output) in request.block_states {
            ctx.block_states.insert(block_id, BlockState::cached(output));
        }

        if let Some(starter) = self.workflow.starter() {
            ctx.record(
                &starter.id,
                BlockState::succeeded(starter_output(&request.workflow_input), 0),
            );
            ctx.activate(starter.id.clone());
            PathTracker::new(&self.workflow).update_execution_paths(&[starter.id.clone()], &mut ctx);
        }
        ctx
    }

    /// Blocks eligible to run next at the top level.
    pub fn get_next_execution_layer(&self, ctx: &ExecutionContext) -> Vec<BlockId> {
        self.next_layer(Scope::TopLevel, ctx)
    }

    fn next_layer(&self, scope: Scope<'_>, ctx: &ExecutionContext) -> Vec<BlockId> {
        let path = PathTracker::new(&self.workflow);
        self.workflow
            .blocks
            .iter()
            .filter(|b| match scope {
                Scope::TopLevel => self.workflow.container_of(&b.id).is_none(),
                Scope::Body(nodes) => nodes.contains(&b.id),
            })
            .filter(|b| b.enabled && !ctx.is_executed(&b.id))
            .filter(|b| path.is_in_active_path(&b.id, ctx))
            .filter(|b| !self.excluded_by_decision(b, ctx))
            .filter(|b| {
                let incoming: Vec<&Connection> = self.workflow.incoming(&b.id).collect();
                self.check_dependencies(&incoming, ctx)
            })
            .map(|b| b.id.clone())
            .collect()
    }

    /// A flow-control block is skipped when an executed router or condition
    /// feeding it decided for a different branch.
    fn excluded_by_decision(&self, block: &SerializedBlock, ctx: &ExecutionContext) -> bool {
        if !should_skip_in_selective_activation(block.block_type()) {
            return false;
        }
        self.workflow.incoming(&block.id).any(|conn| {
            if !ctx.is_executed(&conn.source) {
                return false;
            }
            match self.workflow.block_type(&conn.source) {
                Some(BlockType::Router) => ctx
                    .decisions
                    .router
                    .get(&conn.source)
                    .map_or(false, |target| target != &block.id),
                Some(BlockType::Condition) => ctx
                    .decisions
                    .condition
                    .get(&conn.source)
                    .map_or(false, |id| conn.handle() != Some(condition_handle(id).as_str())),
                _ => false,
            }
        })
    }

    /// Every incoming connection must be satisfied. A source satisfies its
    /// connection once it executed, or when it is not executed and not on the
    /// active path (a branch that will never run). Container start handles
    /// are always satisfied; end handles wait for the container to complete.
    pub fn check_dependencies(&self, incoming: &[&Connection], ctx: &ExecutionContext) -> bool {
        incoming.iter().all(|conn| match conn.handle() {
            Some(LOOP_START_HANDLE) | Some(PARALLEL_START_HANDLE) => true,
            handle if is_container_end_handle(handle) => ctx.completed_loops.contains(&conn.source),
            _ => {
                let source_enabled = self
                    .workflow
                    .find_block(&conn.source)
                    .map_or(false, |b| b.enabled);
                !source_enabled
                    || ctx.is_executed(&conn.source)
                    || !ctx.active_execution_path.contains(&conn.source)
            }
        })
    }

    pub(crate) fn run_layers<'s>(
        &'s self,
        scope: Scope<'s>,
        ctx: &'s mut ExecutionContext,
        resolver: &'s InputResolver<'s>,
    ) -> BoxFuture<'s, Result<(), FlowError>> {
        async move {
            let mut layers = 0usize;
            loop {
                if self.cancellation.is_cancelled() {
                    return Err(cancelled());
                }
                let layer = self.next_layer(scope, ctx);
                if layer.is_empty() {
                    return Ok(());
                }
                layers += 1;
                if layers > self.config.max_layers {
                    return Err(FlowError::Execution(format!(
                        "Maximum execution layers ({}) exceeded",
                        self.config.max_layers
                    )));
                }
                tracing::debug!("Layer {}: {:?}", layers, layer);
                self.execute_layer(&layer, ctx, resolver).await?;
            }
        }
        .boxed()
    }

    async fn execute_layer(
        &self,
        layer: &[BlockId],
        ctx: &mut ExecutionContext,
        resolver: &InputResolver<'_>,
    ) -> Result<(), FlowError> {
        let (containers, regular): (Vec<&BlockId>, Vec<&BlockId>) = layer.iter().partition(|id| {
            self.workflow
                .block_type(id)
                .map_or(false, |t| t.is_container())
        });

        let runs: Vec<BlockRun> = {
            let shared: &ExecutionContext = ctx;
            let pending: Vec<_> = regular
                .into_iter()
                .map(|id| self.run_block(id, shared, resolver))
                .collect();
            stream::iter(pending)
                .buffered(self.config.max_parallel_blocks.max(1))
                .collect()
                .await
        };

        let mut halt = None;
        for run in runs {
            if let Some(err) = self.apply_run(run, ctx) {
                halt.get_or_insert(err);
            }
        }
        for id in containers {
            if halt.is_some() {
                break;
            }
            let run = self.run_container(id, ctx, resolver).await;
            if let Some(err) = self.apply_run(run, ctx) {
                halt.get_or_insert(err);
            }
        }

        let executed: Vec<BlockId> = layer
            .iter()
            .filter(|id| ctx.is_executed(id))
            .cloned()
            .collect();
        PathTracker::new(&self.workflow).update_execution_paths(&executed, ctx);

        match halt {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn run_block(
        &self,
        block_id: &BlockId,
        ctx: &ExecutionContext,
        resolver: &InputResolver<'_>,
    ) -> BlockRun {
        let started_at = Utc::now();
        let timer = Instant::now();

        let result = match self.workflow.find_block(block_id) {
            None => Err(BlockError::Configuration(format!("Block {} not found", block_id))),
            Some(block) => {
                self.emit(ExecutionEvent::BlockStarted {
                    execution_id: ctx.execution_id.clone(),
                    block_id: block.id.clone(),
                    block_type: block.block_type(),
                    timestamp: started_at,
                });
                let invocation = self.invoke_handler(block, ctx, resolver);
                let bounded = async {
                    match self.config.block_timeout_ms {
                        Some(ms) => timeout(Duration::from_millis(ms), invocation)
                            .await
                            .unwrap_or(Err(BlockError::Timeout { ms })),
                        None => invocation.await,
                    }
                };
                tokio::select! {
                    _ = self.cancellation.cancelled() => Err(BlockError::Cancelled),
                    result = bounded => result,
                }
            }
        };

        BlockRun {
            block_id: block_id.clone(),
            started_at,
            duration_ms: timer.elapsed().as_millis() as u64,
            result,
        }
    }

    async fn invoke_handler(
        &self,
        block: &SerializedBlock,
        ctx: &ExecutionContext,
        resolver: &InputResolver<'_>,
    ) -> Result<BlockOutput, BlockError> {
        let inputs = resolver.resolve_inputs(block, ctx)?;
        let emitter = self.emitter(&ctx.execution_id, &block.id);
        let handler_ctx = HandlerContext {
            execution: ctx,
            workflow: &self.workflow,
            resolver,
            services: &self.services,
            config: &self.config,
            emitter: emitter.clone(),
            cancellation: &self.cancellation,
        };

        match BlockHandler::for_type(block.block_type())
            .execute(block, inputs, &handler_ctx)
            .await?
        {
            BlockResult::Output(output) => Ok(output),
            BlockResult::Streaming(streaming) => drain_stream(streaming, emitter.as_ref()).await,
        }
    }

    /// Record a finished block. Returns the error that should halt the run,
    /// if any.
    fn apply_run(&self, run: BlockRun, ctx: &mut ExecutionContext) -> Option<FlowError> {
        let (block_name, block_type) = match self.workflow.find_block(&run.block_id) {
            Some(block) => (block.name().to_string(), block.block_type()),
            None => {
                return Some(FlowError::Execution(format!("Block {} not found", run.block_id)))
            }
        };
        let ended_at = Utc::now();

        match run.result {
            Ok(output) => {
                match &output.decision {
                    Some(Decision::Router(target)) => {
                        ctx.decisions.router.insert(run.block_id.clone(), target.clone());
                    }
                    Some(Decision::Condition(condition_id)) => {
                        ctx.decisions
                            .condition
                            .insert(run.block_id.clone(), condition_id.clone());
                    }
                    None => {}
                }
                match &output.reported_error {
                    Some(err) => tracing::warn!("Block {} reported: {}", run.block_id, err),
                    None => tracing::info!("Block {} completed in {}ms", run.block_id, run.duration_ms),
                }
                self.emit(ExecutionEvent::BlockCompleted {
                    execution_id: ctx.execution_id.clone(),
                    block_id: run.block_id.clone(),
                    output: output.value.clone(),
                    duration_ms: run.duration_ms,
                    timestamp: ended_at,
                });
                ctx.block_logs.push(BlockLog {
                    block_id: run.block_id.clone(),
                    block_name,
                    block_type,
                    started_at: run.started_at,
                    ended_at,
                    duration_ms: run.duration_ms,
                    success: true,
                    output: Some(output.value.clone()),
                    error: output.reported_error,
                });
                ctx.record(&run.block_id, BlockState::succeeded(output.value, run.duration_ms));
                None
            }
            Err(err) => {
                let message = err.to_string();
                tracing::error!("Block {} failed: {}", run.block_id, message);
                self.emit(ExecutionEvent::BlockFailed {
                    execution_id: ctx.execution_id.clone(),
                    block_id: run.block_id.clone(),
                    error: message.clone(),
                    timestamp: ended_at,
                });
                ctx.block_logs.push(BlockLog {
                    block_id: run.block_id.clone(),
                    block_name,
                    block_type,
                    started_at: run.started_at,
                    ended_at,
                    duration_ms: run.duration_ms,
                    success: false,
                    output: None,
                    error: Some(message.clone()),
                });
                ctx.record(&run.block_id, BlockState::failed(message, run.duration_ms));

                if err == BlockError::Cancelled {
                    return Some(cancelled());
                }
                if self.has_error_path(&run.block_id) {
                    tracing::info!("Block {} failed; following its error path", run.block_id);
                    return None;
                }
                match self.config.on_error {
                    ErrorHandling::StopWorkflow => Some(FlowError::Block {
                        block_id: run.block_id,
                        source: err,
                    }),
                    ErrorHandling::ContinueOnError => None,
                }
            }
        }
    }

    fn has_error_path(&self, block_id: &str) -> bool {
        self.workflow
            .outgoing(block_id)
            .any(|c| is_error_handle(c.handle()))
    }

    fn finish(
        &self,
        ctx: ExecutionContext,
        outcome: Result<(), FlowError>,
        metadata: ExecutionMetadata,
    ) -> ExecutionResult {
        let error = match outcome {
            Err(err) => Some(err.to_string()),
            Ok(()) => ctx
                .block_logs
                .iter()
                .find(|log| !log.success && !self.has_error_path(&log.block_id))
                .map(|log| {
                    format!(
                        "Block {} failed: {}",
                        log.block_id,
                        log.error.as_deref().unwrap_or("unknown error")
                    )
                }),
        };
        ExecutionResult {
            success: error.is_none(),
            output: self.final_output(&ctx),
            error,
            logs: ctx.block_logs,
            metadata,
        }
    }

    /// The response block's output when one ran, else the output of the
    /// last block that completed.
    fn final_output(&self, ctx: &ExecutionContext) -> Json {
        let response = self.workflow.blocks.iter().find(|b| {
            b.block_type() == BlockType::Response
                && self.workflow.container_of(&b.id).is_none()
                && ctx.is_executed(&b.id)
        });
        if let Some(output) = response.and_then(|b| ctx.output(&b.id)) {
            return output.clone();
        }
        ctx.block_logs
            .iter()
            .rev()
            .find(|log| log.success)
            .and_then(|log| log.output.clone())
            .or_else(|| {
                self.workflow
                    .starter()
                    .and_then(|s| ctx.output(&s.id))
                    .cloned()
            })
            .unwrap_or(Json::Null)
    }

    fn metadata(&self, execution_id: &str, start_time: DateTime<Utc>, timer: &Instant) -> ExecutionMetadata {
        ExecutionMetadata {
            execution_id: execution_id.to_string(),
            workflow_id: self.workflow_id.clone(),
            duration_ms: timer.elapsed().as_millis() as u64,
            start_time,
            end_time: Utc::now(),
        }
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(bus) = &self.services.events {
            bus.emit(event);
        }
    }

    fn emitter(&self, execution_id: &str, block_id: &str) -> Option<EventEmitter> {
        self.services
            .events
            .as_ref()
            .map(|bus| bus.create_emitter(execution_id, block_id))
    }
}

fn cancelled() -> FlowError {
    FlowError::Execution("Workflow execution was cancelled".into())
}

fn check_container(
    wf: &SerializedWorkflow,
    id: &str,
    nodes: &[BlockId],
    expected: BlockType,
) -> Result<(), ConfigurationError> {
    match wf.block_type(id) {
        Some(ty) if ty == expected => {}
        _ => {
            return Err(ConfigurationError::Invalid(format!(
                "{} {} has no matching block",
                expected, id
            )))
        }
    }
    match nodes.iter().find(|n| wf.find_block(n).is_none()) {
        Some(node) => Err(ConfigurationError::DanglingContainerNode {
            container: id.to_string(),
            node: node.clone(),
        }),
        None => Ok(()),
    }
}

async fn drain_stream(
    mut streaming: StreamingExecution,
    emitter: Option<&EventEmitter>,
) -> Result<BlockOutput, BlockError> {
    let mut content = String::new();
    while let Some(chunk) = streaming.stream.next().await {
        let chunk = chunk?;
        if let Some(emitter) = emitter {
            emitter.chunk(chunk.clone());
        }
        content.push_str(&chunk);
    }
    let mut output = match streaming.output {
        Json::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    output.insert("content".into(), Json::String(content));
    Ok(BlockOutput::new(Json::Object(output)))
}
