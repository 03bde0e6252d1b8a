//! Task readiness: which open task may run next.
//!
//! Nothing is cached between calls. Each decision reads the store afresh so
//! status changes made between two decisions (by an operator approving a
//! gate, or by another tool editing the backlog) are always observed.
//! Within one decision the backlog is read once.

use std::collections::HashMap;

use drover_store::{StoreResult, Task, TaskFilter, TaskStatus, TaskStore};
use tracing::{debug, warn};

use crate::gate::blocking_gate_among;

/// Computes ready and in-progress tasks from a store.
pub struct TaskReadinessResolver<'a> {
    store: &'a dyn TaskStore,
}

impl<'a> TaskReadinessResolver<'a> {
    pub fn new(store: &'a dyn TaskStore) -> Self {
        Self { store }
    }

    /// Open tasks matching `filter` whose direct dependencies include no
    /// blocking gate and no unclosed non-gate task, sorted by priority with
    /// ties kept in store order.
    ///
    /// The status part of `filter` is ignored. Dependencies on unknown ids
    /// are treated as satisfied.
    pub async fn list_ready(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>> {
        // Dependencies may sit outside the epic or label filter.
        let backlog = self.store.list_tasks(&TaskFilter::all()).await?;
        let by_id: HashMap<&str, &Task> = backlog.iter().map(|t| (t.id.as_str(), t)).collect();
        let candidates = filter.with_status(TaskStatus::Open);

        let mut ready = Vec::new();
        for task in backlog.iter().filter(|t| candidates.matches(t)) {
            if let Some(gate_id) = blocking_gate_among(task, &by_id) {
                debug!(task_id = %task.id, gate_id = %gate_id, "not ready: waiting on gate");
                continue;
            }
            if let Some(dep) = first_unclosed_dependency(task, &by_id) {
                debug!(task_id = %task.id, dependency = %dep, "not ready: dependency open");
                continue;
            }
            ready.push(task.clone());
        }

        // Stable sort keeps insertion order among equal priorities.
        ready.sort_by_key(|t| t.priority);
        Ok(ready)
    }

    /// The task currently `in_progress` among those matching `filter`.
    pub async fn next_in_progress(&self, filter: &TaskFilter) -> StoreResult<Option<Task>> {
        let mut in_progress = self
            .store
            .list_tasks(&filter.with_status(TaskStatus::InProgress))
            .await?;
        if in_progress.len() > 1 {
            let ids: Vec<&str> = in_progress.iter().map(|t| t.id.as_str()).collect();
            warn!(?ids, "more than one task in progress; resuming the first");
        }
        if in_progress.is_empty() {
            return Ok(None);
        }
        Ok(Some(in_progress.swap_remove(0)))
    }
}

fn first_unclosed_dependency(task: &Task, by_id: &HashMap<&str, &Task>) -> Option<String> {
    for dep_id in &task.depends_on {
        match by_id.get(dep_id.as_str()) {
            None => {
                warn!(task_id = %task.id, dependency = %dep_id, "dependency not found; treating as satisfied");
            }
            Some(dep) if dep.is_gate() => {}
            Some(dep) if dep.status != TaskStatus::Closed => return Some(dep.id.clone()),
            Some(_) => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::gate::CheckpointGate;
    use async_trait::async_trait;
    use drover_store::{MemoryTaskStore, Priority, TaskKind};

    /// Store wrapper counting reads.
    struct CountingStore {
        inner: MemoryTaskStore,
        gets: AtomicUsize,
        lists: AtomicUsize,
    }

    #[async_trait]
    impl TaskStore for CountingStore {
        async fn get_task(&self, id: &str) -> StoreResult<Option<Task>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get_task(id).await
        }

        async fn list_tasks(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            self.inner.list_tasks(filter).await
        }

        async fn update_status(&self, id: &str, status: TaskStatus) -> StoreResult<()> {
            self.inner.update_status(id, status).await
        }
    }

    fn ids(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.id.as_str()).collect()
    }

    #[tokio::test]
    async fn sorts_by_priority_then_insertion() {
        let store = MemoryTaskStore::from_tasks([
            Task::new("low", "low").with_priority(Priority::P3),
            Task::new("hi-1", "hi").with_priority(Priority::P0),
            Task::new("mid", "mid"),
            Task::new("hi-2", "hi").with_priority(Priority::P0),
            Task::new("done", "done").with_status(TaskStatus::Closed),
        ])
        .unwrap();
        let resolver = TaskReadinessResolver::new(&store);
        let ready = resolver.list_ready(&TaskFilter::all()).await.unwrap();
        assert_eq!(ids(&ready), vec!["hi-1", "hi-2", "mid", "low"]);
    }

    #[tokio::test]
    async fn open_dependency_blocks_closed_unblocks() {
        let store = MemoryTaskStore::from_tasks([
            Task::new("a", "A"),
            Task::new("b", "B").with_dependency("a"),
            Task::new("c", "C").with_dependency("ghost"),
        ])
        .unwrap();
        let resolver = TaskReadinessResolver::new(&store);
        assert_eq!(
            ids(&resolver.list_ready(&TaskFilter::all()).await.unwrap()),
            vec!["a", "c"]
        );

        store.update_status("a", TaskStatus::InProgress).await.unwrap();
        store.update_status("a", TaskStatus::Closed).await.unwrap();
        assert_eq!(
            ids(&resolver.list_ready(&TaskFilter::all()).await.unwrap()),
            vec!["b", "c"]
        );
    }

    #[tokio::test]
    async fn gate_dependency_blocks_until_approved() {
        let store = MemoryTaskStore::from_tasks([
            Task::new("g", "Sign-off").with_kind(TaskKind::Gate),
            Task::new("t", "Build").with_dependency("g"),
        ])
        .unwrap();
        let resolver = TaskReadinessResolver::new(&store);

        let ready = resolver.list_ready(&TaskFilter::all()).await.unwrap();
        assert_eq!(ids(&ready), vec!["g"]);

        CheckpointGate::new(&store).approve("g").await.unwrap();
        let ready = resolver.list_ready(&TaskFilter::all()).await.unwrap();
        assert_eq!(ids(&ready), vec!["t"]);
    }

    #[tokio::test]
    async fn filters_by_epic_and_label() {
        let store = MemoryTaskStore::from_tasks([
            Task::new("a", "A").in_epic("e1").with_label("api"),
            Task::new("b", "B").in_epic("e1"),
            Task::new("c", "C").in_epic("e2").with_label("api"),
        ])
        .unwrap();
        let resolver = TaskReadinessResolver::new(&store);

        let filter = TaskFilter {
            epic: Some("e1".into()),
            ..TaskFilter::default()
        };
        assert_eq!(ids(&resolver.list_ready(&filter).await.unwrap()), vec!["a", "b"]);

        let filter = TaskFilter {
            label: Some("api".into()),
            // Status in the filter is overridden.
            status: Some(TaskStatus::Closed),
            ..TaskFilter::default()
        };
        assert_eq!(ids(&resolver.list_ready(&filter).await.unwrap()), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn next_in_progress_returns_first_match() {
        let store = MemoryTaskStore::from_tasks([
            Task::new("a", "A"),
            Task::new("b", "B").with_status(TaskStatus::InProgress).with_label("x"),
        ])
        .unwrap();
        let resolver = TaskReadinessResolver::new(&store);
        let task = resolver.next_in_progress(&TaskFilter::all()).await.unwrap();
        assert_eq!(task.map(|t| t.id).as_deref(), Some("b"));

        let filter = TaskFilter {
            label: Some("y".into()),
            ..TaskFilter::default()
        };
        assert!(resolver.next_in_progress(&filter).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn one_backlog_read_per_decision() {
        let store = CountingStore {
            inner: MemoryTaskStore::from_tasks([
                Task::new("g", "Gate").with_kind(TaskKind::Gate),
                Task::new("a", "A"),
                Task::new("b", "B").with_dependency("a").with_dependency("g"),
                Task::new("c", "C").with_dependency("a").in_epic("e1"),
                Task::new("d", "D").in_epic("e1"),
            ])
            .unwrap(),
            gets: AtomicUsize::new(0),
            lists: AtomicUsize::new(0),
        };
        let resolver = TaskReadinessResolver::new(&store);

        let ready = resolver.list_ready(&TaskFilter::all()).await.unwrap();
        assert_eq!(ids(&ready), vec!["g", "a", "d"]);
        assert_eq!(store.lists.load(Ordering::SeqCst), 1);
        assert_eq!(store.gets.load(Ordering::SeqCst), 0);

        // Dependencies outside the epic filter are still resolved.
        let filter = TaskFilter {
            epic: Some("e1".into()),
            ..TaskFilter::default()
        };
        let ready = resolver.list_ready(&filter).await.unwrap();
        assert_eq!(ids(&ready), vec!["d"]);
        assert_eq!(store.lists.load(Ordering::SeqCst), 2);
    }
}
