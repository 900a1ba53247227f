use agentcore::BlockError;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Set of in-flight sub-workflow execution keys, shared by every executor
/// built from the same services.
///
/// Keys have the form `{parent_execution_id}_sub_{child_workflow_id}`, so two
/// unrelated runs never collide. Recursion through a run's own callers is
/// caught earlier from the context's call chain.
#[derive(Debug, Default)]
pub struct ExecutionStack {
    active: Mutex<HashSet<String>>,
}

impl ExecutionStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim `key`. The returned guard releases it when dropped.
    pub fn enter(self: &Arc<Self>, key: impl Into<String>) -> Result<ExecutionGuard, BlockError> {
        let key = key.into();
        if !self.lock().insert(key.clone()) {
            return Err(BlockError::CyclicDependency(key));
        }
        tracing::debug!("Execution stack entered: {}", key);
        Ok(ExecutionGuard {
            stack: Arc::clone(self),
            key,
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Scoped claim on an execution stack key.
#[derive(Debug)]
pub struct ExecutionGuard {
    stack: Arc<ExecutionStack>,
    key: String,
}

impl ExecutionGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        self.stack.lock().remove(&self.key);
        tracing::debug!("Execution stack released: {}", self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_key_is_a_cycle() {
        let stack = Arc::new(ExecutionStack::new());
        let _guard = stack.enter("run_sub_a").unwrap();
        let err = stack.enter("run_sub_a").unwrap_err();
        assert_eq!(err, BlockError::CyclicDependency("run_sub_a".into()));
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn guard_releases_on_drop() {
        let stack = Arc::new(ExecutionStack::new());
        {
            let guard = stack.enter("run_sub_a").unwrap();
            assert_eq!(guard.key(), "run_sub_a");
            assert!(stack.contains("run_sub_a"));
        }
        assert!(stack.is_empty());
    }

    #[test]
    fn distinct_parents_do_not_collide() {
        let stack = Arc::new(ExecutionStack::new());
        let _a = stack.enter("run1_sub_child").unwrap();
        let _b = stack.enter("run2_sub_child").unwrap();
        assert_eq!(stack.len(), 2);
    }
}
