//! `drover list`: the whole backlog with status, optionally narrowed.

use anyhow::{Context, Result};

use drover_store::{Priority, Task, TaskFilter, TaskKind, TaskStatus, TaskStore};

/// Narrowing applied on top of the store filter.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub filter: TaskFilter,
    pub kind: Option<TaskKind>,
    pub priority: Option<Priority>,
}

/// Tasks matching `query`, in store order.
pub async fn list_tasks(store: &dyn TaskStore, query: &ListQuery) -> Result<Vec<Task>> {
    let tasks = store
        .list_tasks(&query.filter)
        .await
        .context("failed to list tasks")?;
    Ok(tasks
        .into_iter()
        .filter(|t| query.kind.is_none_or(|k| t.kind == k))
        .filter(|t| query.priority.is_none_or(|p| t.priority == p))
        .collect())
}

/// Run the list command.
pub async fn run_list(store: &dyn TaskStore, query: &ListQuery, json: bool) -> Result<()> {
    let tasks = list_tasks(store, query).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }

    if tasks.is_empty() {
        println!("No matching tasks.");
        return Ok(());
    }

    let closed = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Closed)
        .count();
    println!("Tasks ({closed}/{} closed):", tasks.len());
    for task in &tasks {
        let priority = task.priority.to_string();
        let status = task.status.to_string();
        let kind = task.kind.to_string();
        println!(
            "  {:<12} {status:<11} {priority:<3} {kind:<10} {}",
            task.id, task.title
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_store::MemoryTaskStore;

    fn store() -> MemoryTaskStore {
        MemoryTaskStore::from_tasks([
            Task::new("a", "A").with_priority(Priority::P1),
            Task::new("g", "Gate").with_kind(TaskKind::Review),
            Task::new("b", "B").with_status(TaskStatus::Closed),
        ])
        .unwrap()
    }

    fn ids(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.id.as_str()).collect()
    }

    #[tokio::test]
    async fn lists_everything_in_store_order() {
        let tasks = list_tasks(&store(), &ListQuery::default()).await.unwrap();
        assert_eq!(ids(&tasks), vec!["a", "g", "b"]);
    }

    #[tokio::test]
    async fn narrows_by_status_kind_and_priority() {
        let store = store();

        let query = ListQuery {
            filter: TaskFilter::all().with_status(TaskStatus::Closed),
            ..ListQuery::default()
        };
        assert_eq!(ids(&list_tasks(&store, &query).await.unwrap()), vec!["b"]);

        let query = ListQuery {
            kind: Some("review".parse().unwrap()),
            ..ListQuery::default()
        };
        assert_eq!(ids(&list_tasks(&store, &query).await.unwrap()), vec!["g"]);

        let query = ListQuery {
            priority: Some("p1".parse().unwrap()),
            ..ListQuery::default()
        };
        assert_eq!(ids(&list_tasks(&store, &query).await.unwrap()), vec!["a"]);
    }
}
