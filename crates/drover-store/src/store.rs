//! The task-store contract.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Task, TaskStatus};

/// Result type for task store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by task store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No task with this id exists.
    #[error("task not found: {0}")]
    NotFound(String),

    /// A task with this id already exists.
    #[error("duplicate task id: {0}")]
    Duplicate(String),

    /// The requested status change is not an edge of the status graph.
    #[error("invalid status transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// Reading or writing the backing file failed.
    #[error("task store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The backing file does not contain a valid task list.
    #[error("task store at {path} is not valid JSON: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Optional filters applied by [`TaskStore::list_tasks`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    /// Only tasks in this status.
    pub status: Option<TaskStatus>,
    /// Only tasks whose parent epic is this id.
    pub epic: Option<String>,
    /// Only tasks carrying this label.
    pub label: Option<String>,
}

impl TaskFilter {
    /// A filter that matches every task.
    pub fn all() -> Self {
        Self::default()
    }

    /// Copy of this filter restricted to `status`.
    pub fn with_status(&self, status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..self.clone()
        }
    }

    /// Whether `task` passes every filter that is set.
    pub fn matches(&self, task: &Task) -> bool {
        if self.status.is_some_and(|s| s != task.status) {
            return false;
        }
        if let Some(epic) = &self.epic {
            if task.epic.as_deref() != Some(epic.as_str()) {
                return false;
            }
        }
        match &self.label {
            Some(label) => task.labels.contains(label),
            None => true,
        }
    }
}

/// Task persistence contract.
///
/// Implementations own task status. `list_tasks` must return tasks in
/// insertion order so that callers can use it as a stable tie-breaker.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Fetch a single task. Returns `None` when the id is unknown.
    async fn get_task(&self, id: &str) -> StoreResult<Option<Task>>;

    /// List tasks passing `filter`, in insertion order.
    async fn list_tasks(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>>;

    /// Move a task to `status`.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] for an unknown id,
    /// [`StoreError::InvalidTransition`] when the edge is not allowed.
    /// Setting a task to its current status is a no-op.
    async fn update_status(&self, id: &str, status: TaskStatus) -> StoreResult<()>;
}

/// Apply a status change to `task` in place, enforcing the status graph.
pub(crate) fn apply_transition(task: &mut Task, to: TaskStatus) -> StoreResult<()> {
    if task.status == to {
        return Ok(());
    }
    if !task.status.can_transition_to(to) {
        return Err(StoreError::InvalidTransition {
            id: task.id.clone(),
            from: task.status,
            to,
        });
    }
    tracing::debug!(task_id = %task.id, from = %task.status, to = %to, "task status transition");
    task.status = to;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_matches_everything() {
        let task = Task::new("a", "A").with_status(TaskStatus::Closed);
        assert!(TaskFilter::all().matches(&task));
    }

    #[test]
    fn filter_by_epic_and_label() {
        let task = Task::new("a", "A").in_epic("e-1").with_label("backend");
        let mut filter = TaskFilter {
            epic: Some("e-1".into()),
            label: Some("backend".into()),
            ..TaskFilter::default()
        };
        assert!(filter.matches(&task));

        filter.label = Some("frontend".into());
        assert!(!filter.matches(&task));

        filter.label = None;
        filter.epic = Some("e-2".into());
        assert!(!filter.matches(&task));
    }

    #[test]
    fn with_status_keeps_other_filters() {
        let filter = TaskFilter {
            label: Some("x".into()),
            ..TaskFilter::default()
        }
        .with_status(TaskStatus::Open);
        assert_eq!(filter.status, Some(TaskStatus::Open));
        assert_eq!(filter.label.as_deref(), Some("x"));
    }

    #[test]
    fn apply_transition_rejects_illegal_edge() {
        let mut task = Task::new("a", "A").with_status(TaskStatus::Closed);
        let err = apply_transition(&mut task, TaskStatus::InProgress).unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        assert_eq!(task.status, TaskStatus::Closed);
    }

    #[test]
    fn apply_transition_same_status_is_noop() {
        let mut task = Task::new("a", "A");
        apply_transition(&mut task, TaskStatus::Open).unwrap();
        assert_eq!(task.status, TaskStatus::Open);
    }
}
