use crate::workflow::BlockId;
use crate::BlockType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub type ExecutionId = String;

/// Events emitted during workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    WorkflowStarted {
        execution_id: ExecutionId,
        workflow_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    WorkflowCompleted {
        execution_id: ExecutionId,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    BlockStarted {
        execution_id: ExecutionId,
        block_id: BlockId,
        block_type: BlockType,
        timestamp: DateTime<Utc>,
    },
    BlockCompleted {
        execution_id: ExecutionId,
        block_id: BlockId,
        output: serde_json::Value,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    BlockFailed {
        execution_id: ExecutionId,
        block_id: BlockId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    BlockEvent {
        execution_id: ExecutionId,
        block_id: BlockId,
        event: BlockEvent,
        timestamp: DateTime<Utc>,
    },
}

/// Events specific to one block's execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum BlockEvent {
    Info { message: String },
    Warning { message: String },
    Chunk { content: String },
}

/// Event emitter handed to a single block for real-time updates
#[derive(Clone)]
pub struct EventEmitter {
    execution_id: ExecutionId,
    block_id: BlockId,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventEmitter {
    pub fn new(
        execution_id: ExecutionId,
        block_id: BlockId,
        sender: broadcast::Sender<ExecutionEvent>,
    ) -> Self {
        Self {
            execution_id,
            block_id,
            sender,
        }
    }

    pub fn emit(&self, event: BlockEvent) {
        let _ = self.sender.send(ExecutionEvent::BlockEvent {
            execution_id: self.execution_id.clone(),
            block_id: self.block_id.clone(),
            event,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(BlockEvent::Info {
            message: message.into(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(BlockEvent::Warning {
            message: message.into(),
        });
    }

    /// Forward one streamed content chunk
    pub fn chunk(&self, content: impl Into<String>) {
        self.emit(BlockEvent::Chunk {
            content: content.into(),
        });
    }
}

/// Process-wide event bus. Sending never fails when nobody listens.
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("No event subscribers");
        }
    }

    pub fn create_emitter(&self, execution_id: &str, block_id: &str) -> EventEmitter {
        EventEmitter::new(
            execution_id.to_string(),
            block_id.to_string(),
            self.sender.clone(),
        )
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
