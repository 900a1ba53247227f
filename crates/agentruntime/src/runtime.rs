use crate::executor::{ExecutionRequest, Executor};
use crate::registry::BlockRegistry;
use crate::serializer::Serializer;
use crate::services::{ProviderClient, Services, ToolInvoker, WorkflowLoader};
use crate::stack::ExecutionStack;
use agentcore::{ErrorHandling, EventBus, ExecutionEvent, ExecutionResult, FlowError, WorkflowState};
use std::sync::Arc;

/// Main runtime for executing workflows
pub struct AgentRuntime {
    services: Services,
    config: RuntimeConfig,
    event_bus: Arc<EventBus>,
}

impl AgentRuntime {
    pub fn new(
        provider: Arc<dyn ProviderClient>,
        tools: Arc<dyn ToolInvoker>,
        loader: Arc<dyn WorkflowLoader>,
    ) -> Self {
        Self::with_config(provider, tools, loader, RuntimeConfig::default())
    }

    pub fn with_config(
        provider: Arc<dyn ProviderClient>,
        tools: Arc<dyn ToolInvoker>,
        loader: Arc<dyn WorkflowLoader>,
        config: RuntimeConfig,
    ) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let services = Services::new(provider, tools, loader).with_events(event_bus.clone());
        Self {
            services,
            config,
            event_bus,
        }
    }

    /// Replace the block registry, e.g. to register extra block metadata.
    pub fn with_registry(mut self, registry: Arc<BlockRegistry>) -> Self {
        self.services.registry = registry;
        self
    }

    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.services.registry
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn execution_stack(&self) -> &Arc<ExecutionStack> {
        &self.services.execution_stack
    }

    /// Executor for a persisted workflow state.
    pub fn executor(
        &self,
        workflow_id: Option<&str>,
        state: &WorkflowState,
    ) -> Result<Executor, FlowError> {
        let workflow = Serializer::new(&self.services.registry).serialize_workflow(state)?;
        let executor = Executor::new(workflow, self.services.clone(), self.config.clone());
        Ok(match workflow_id {
            Some(id) => executor.with_workflow_id(id),
            None => executor,
        })
    }

    /// Execute a workflow state directly (without the store)
    pub async fn execute_state(
        &self,
        workflow_id: Option<&str>,
        state: &WorkflowState,
        request: ExecutionRequest,
    ) -> Result<ExecutionResult, FlowError> {
        let executor = self.executor(workflow_id, state)?;
        Ok(executor.execute(request).await)
    }

    /// Load a workflow through the configured loader and execute it
    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        request: ExecutionRequest,
    ) -> Result<ExecutionResult, FlowError> {
        let record = self
            .services
            .loader
            .load_workflow(workflow_id)
            .await
            .map_err(|e| FlowError::Execution(format!("Failed to load workflow {}: {}", workflow_id, e)))?
            .ok_or_else(|| FlowError::Execution(format!("Workflow {} not found", workflow_id)))?;
        self.execute_state(Some(&record.id), &record.state, request).await
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub max_parallel_blocks: usize,
    pub event_buffer_size: usize,
    /// Scheduling rounds allowed per scope before the run is aborted.
    pub max_layers: usize,
    pub block_timeout_ms: Option<u64>,
    pub on_error: ErrorHandling,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_blocks: 10,
            event_buffer_size: 1000,
            max_layers: 1000,
            block_timeout_ms: None,
            on_error: ErrorHandling::StopWorkflow,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `AGENTFLOW_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let parse = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(n) = parse("AGENTFLOW_MAX_PARALLEL") {
            config.max_parallel_blocks = n.max(1) as usize;
        }
        if let Some(n) = parse("AGENTFLOW_MAX_LAYERS") {
            config.max_layers = n as usize;
        }
        if let Some(n) = parse("AGENTFLOW_EVENT_BUFFER") {
            config.event_buffer_size = n.max(1) as usize;
        }
        config.block_timeout_ms = parse("AGENTFLOW_BLOCK_TIMEOUT_MS").filter(|ms| *ms > 0);
        if let Some(flag) = lookup("AGENTFLOW_CONTINUE_ON_ERROR") {
            if matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes") {
                config.on_error = ErrorHandling::ContinueOnError;
            }
        }
        config
    }
}
