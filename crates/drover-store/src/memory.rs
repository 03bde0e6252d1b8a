//! In-memory task store, used by tests and by callers that load a backlog
//! from elsewhere.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::models::{Task, TaskStatus};
use crate::store::{StoreError, StoreResult, TaskFilter, TaskStore, apply_transition};

/// Thread-safe in-memory task store. Insertion order is preserved.
#[derive(Debug, Clone, Default)]
pub struct MemoryTaskStore {
    tasks: Arc<RwLock<Vec<Task>>>,
}

impl MemoryTaskStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `tasks` in the given order.
    ///
    /// # Errors
    ///
    /// [`StoreError::Duplicate`] if two tasks share an id.
    pub fn from_tasks(tasks: impl IntoIterator<Item = Task>) -> StoreResult<Self> {
        let store = Self::new();
        for task in tasks {
            store.insert(task)?;
        }
        Ok(store)
    }

    /// Append a task.
    pub fn insert(&self, task: Task) -> StoreResult<()> {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        if tasks.iter().any(|t| t.id == task.id) {
            return Err(StoreError::Duplicate(task.id));
        }
        tasks.push(task);
        Ok(())
    }

    /// Number of stored tasks.
    pub fn len(&self) -> usize {
        self.tasks.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the store holds no tasks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn get_task(&self, id: &str) -> StoreResult<Option<Task>> {
        let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
        Ok(tasks.iter().find(|t| t.id == id).cloned())
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>> {
        let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
        Ok(tasks.iter().filter(|t| filter.matches(t)).cloned().collect())
    }

    async fn update_status(&self, id: &str, status: TaskStatus) -> StoreResult<()> {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        apply_transition(task, status)
    }
}
