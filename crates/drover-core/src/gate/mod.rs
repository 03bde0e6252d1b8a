//! Checkpoint gate: approval gates that block their dependents.
//!
//! A gate is a task whose kind is `gate`, `checkpoint` or `review`. It
//! blocks while it exists and is not closed. Only direct dependencies are
//! inspected: a task two hops behind an open gate is not blocked by it.

use std::collections::HashMap;

use drover_store::{StoreError, StoreResult, Task, TaskKind, TaskStatus, TaskStore};
use tracing::{debug, info};

/// Errors from gate operations.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("task {id} is a {kind}, not a gate; only gate, checkpoint and review tasks can be approved")]
    NotAGate { id: String, kind: TaskKind },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Evaluates and approves gates against a task store.
pub struct CheckpointGate<'a> {
    store: &'a dyn TaskStore,
}

impl<'a> CheckpointGate<'a> {
    pub fn new(store: &'a dyn TaskStore) -> Self {
        Self { store }
    }

    /// Whether `id` names a gate that is not closed. Missing tasks and
    /// non-gates never block.
    pub async fn is_blocking(&self, id: &str) -> StoreResult<bool> {
        Ok(self
            .store
            .get_task(id)
            .await?
            .is_some_and(|task| is_blocking_gate(&task)))
    }

    /// Close the gate `id`.
    ///
    /// # Errors
    ///
    /// [`GateError::NotFound`] for an unknown id, [`GateError::NotAGate`]
    /// when the task is not a gate kind.
    pub async fn approve(&self, id: &str) -> Result<(), GateError> {
        let task = self
            .store
            .get_task(id)
            .await?
            .ok_or_else(|| GateError::NotFound(id.to_string()))?;
        if !task.is_gate() {
            return Err(GateError::NotAGate {
                id: task.id,
                kind: task.kind,
            });
        }
        self.store.update_status(id, TaskStatus::Closed).await?;
        info!(gate_id = id, "gate approved");
        Ok(())
    }

    /// First direct dependency of `task_id`, in declared order, that is a
    /// blocking gate.
    ///
    /// # Errors
    ///
    /// [`GateError::NotFound`] for an unknown task id.
    pub async fn blocking_gate_for(&self, task_id: &str) -> Result<Option<String>, GateError> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| GateError::NotFound(task_id.to_string()))?;
        Ok(self.blocking_gate_for_task(&task).await?)
    }

    /// Same as [`Self::blocking_gate_for`] for an already-loaded task.
    pub async fn blocking_gate_for_task(&self, task: &Task) -> StoreResult<Option<String>> {
        for dep in &task.depends_on {
            if self.is_blocking(dep).await? {
                debug!(task_id = %task.id, gate_id = %dep, "blocked by open gate");
                return Ok(Some(dep.clone()));
            }
        }
        Ok(None)
    }
}

fn is_blocking_gate(task: &Task) -> bool {
    task.is_gate() && task.status != TaskStatus::Closed
}

/// [`CheckpointGate::blocking_gate_for_task`] resolved against tasks that
/// are already loaded, keyed by id.
pub fn blocking_gate_among(task: &Task, tasks: &HashMap<&str, &Task>) -> Option<String> {
    task.depends_on
        .iter()
        .find(|dep| tasks.get(dep.as_str()).is_some_and(|t| is_blocking_gate(t)))
        .cloned()
}
