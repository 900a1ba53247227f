//! Workflow stores backing [`WorkflowLoader`].

use agentcore::{BlockError, WorkflowRecord};
use agentruntime::WorkflowLoader;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Process-local store, used by the server.
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    workflows: RwLock<HashMap<String, WorkflowRecord>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a workflow, replacing any previous version with the same id.
    pub async fn insert(&self, record: WorkflowRecord) -> Option<WorkflowRecord> {
        self.workflows.write().await.insert(record.id.clone(), record)
    }

    pub async fn get(&self, id: &str) -> Option<WorkflowRecord> {
        self.workflows.read().await.get(id).cloned()
    }

    /// All workflows ordered by id.
    pub async fn list(&self) -> Vec<WorkflowRecord> {
        let mut records: Vec<WorkflowRecord> = self.workflows.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    pub async fn remove(&self, id: &str) -> Option<WorkflowRecord> {
        self.workflows.write().await.remove(id)
    }
}

#[async_trait]
impl WorkflowLoader for InMemoryWorkflowStore {
    async fn load_workflow(&self, id: &str) -> Result<Option<WorkflowRecord>, BlockError> {
        Ok(self.get(id).await)
    }
}

/// Directory of `{id}.json` files, one [`WorkflowRecord`] each.
pub struct FileWorkflowStore {
    dir: PathBuf,
}

impl FileWorkflowStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, BlockError> {
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return Err(BlockError::Configuration(format!("Invalid workflow id: {}", id)));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    /// Writes `record` to `{dir}/{id}.json`, creating the directory if needed.
    pub async fn save(&self, record: &WorkflowRecord) -> Result<PathBuf, BlockError> {
        let path = self.path_for(&record.id)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| BlockError::execution(format!("Failed to encode workflow {}: {}", record.id, e)))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| io_error(&path, e))?;
        tracing::debug!("Saved workflow {} to {}", record.id, path.display());
        Ok(path)
    }

    /// Every parseable workflow file in the directory, ordered by id.
    /// Unreadable files are skipped with a warning.
    pub async fn list(&self) -> Result<Vec<WorkflowRecord>, BlockError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.dir, e)),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&self.dir, e))? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_record(&path).await {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping {}: {}", path.display(), e),
            }
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }
}

#[async_trait]
impl WorkflowLoader for FileWorkflowStore {
    async fn load_workflow(&self, id: &str) -> Result<Option<WorkflowRecord>, BlockError> {
        let path = self.path_for(id)?;
        if !tokio::fs::try_exists(&path).await.map_err(|e| io_error(&path, e))? {
            return Ok(None);
        }
        read_record(&path).await.map(Some)
    }
}

async fn read_record(path: &Path) -> Result<WorkflowRecord, BlockError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| io_error(path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| BlockError::execution(format!("Invalid workflow file {}: {}", path.display(), e)))
}

fn io_error(path: &Path, err: std::io::Error) -> BlockError {
    BlockError::execution(format!("{}: {}", path.display(), err))
}
