//! Readiness and gate approval over the JSON file store.
//!
//! The file is re-read on every call, so edits made between two decisions
//! must be visible to the next one.

use tempfile::TempDir;

use drover_core::gate::{CheckpointGate, GateError};
use drover_core::next_task;
use drover_core::readiness::TaskReadinessResolver;
use drover_store::{JsonFileTaskStore, Priority, Task, TaskFilter, TaskKind, TaskStatus, TaskStore};
use drover_test_utils::{read_backlog, write_backlog};

fn ids(tasks: &[Task]) -> Vec<String> {
    tasks.iter().map(|t| t.id.clone()).collect()
}

fn release_backlog() -> Vec<Task> {
    vec![
        Task::new("build", "Build the release").with_priority(Priority::P1),
        Task::new("review", "Review the build")
            .with_kind(TaskKind::Review)
            .with_dependency("build"),
        Task::new("publish", "Publish")
            .with_priority(Priority::P0)
            .with_dependency("review"),
        Task::new("announce", "Announce").with_dependency("publish"),
        Task::new("docs", "Write docs")
            .with_priority(Priority::P3)
            .with_label("docs"),
    ]
}

#[tokio::test]
async fn gate_blocks_direct_dependents_until_approved() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join(".drover/tasks.json");
    write_backlog(&path, &release_backlog());
    let store = JsonFileTaskStore::new(&path);
    let resolver = TaskReadinessResolver::new(&store);
    let gate = CheckpointGate::new(&store);

    // The gate itself is ready to be looked at; its dependents are not.
    let ready = resolver.list_ready(&TaskFilter::all()).await.unwrap();
    assert_eq!(ids(&ready), vec!["build", "docs"]);

    store.update_status("build", TaskStatus::InProgress).await.unwrap();
    store.update_status("build", TaskStatus::Closed).await.unwrap();

    let ready = resolver.list_ready(&TaskFilter::all()).await.unwrap();
    assert_eq!(ids(&ready), vec!["review", "docs"]);
    assert_eq!(
        gate.blocking_gate_for("publish").await.unwrap().as_deref(),
        Some("review")
    );
    // Two hops behind the gate, but its direct dependency is still open.
    assert_eq!(gate.blocking_gate_for("announce").await.unwrap(), None);

    gate.approve("review").await.unwrap();

    let ready = resolver.list_ready(&TaskFilter::all()).await.unwrap();
    assert_eq!(ids(&ready), vec!["publish", "docs"]);
    let on_disk = read_backlog(&path);
    let review = on_disk.iter().find(|t| t.id == "review").unwrap();
    assert_eq!(review.status, TaskStatus::Closed);
}

#[tokio::test]
async fn approving_a_plain_task_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("tasks.json");
    write_backlog(&path, &release_backlog());
    let store = JsonFileTaskStore::new(&path);
    let gate = CheckpointGate::new(&store);

    assert!(matches!(
        gate.approve("build").await,
        Err(GateError::NotAGate { .. })
    ));
    assert!(matches!(
        gate.approve("ghost").await,
        Err(GateError::NotFound(_))
    ));
    assert!(matches!(
        gate.blocking_gate_for("ghost").await,
        Err(GateError::NotFound(_))
    ));
}

#[tokio::test]
async fn external_edits_are_seen_by_the_next_decision() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("tasks.json");
    write_backlog(&path, &release_backlog());
    let store = JsonFileTaskStore::new(&path);

    let first = next_task(&store, &TaskFilter::all()).await.unwrap().unwrap();
    assert_eq!(first.id, "build");

    // Another tool closes `build` and approves the gate behind our back.
    let mut edited = release_backlog();
    edited[0].status = TaskStatus::Closed;
    edited[1].status = TaskStatus::Closed;
    write_backlog(&path, &edited);

    let next = next_task(&store, &TaskFilter::all()).await.unwrap().unwrap();
    assert_eq!(next.id, "publish");
}

#[tokio::test]
async fn in_progress_task_is_resumed_first() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("tasks.json");
    let mut backlog = release_backlog();
    backlog[4].status = TaskStatus::InProgress;
    write_backlog(&path, &backlog);
    let store = JsonFileTaskStore::new(&path);

    let resolver = TaskReadinessResolver::new(&store);
    let resumed = resolver.next_in_progress(&TaskFilter::all()).await.unwrap();
    assert_eq!(resumed.map(|t| t.id).as_deref(), Some("docs"));

    let next = next_task(&store, &TaskFilter::all()).await.unwrap().unwrap();
    assert_eq!(next.id, "docs");
}

#[tokio::test]
async fn label_filter_narrows_readiness() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("tasks.json");
    write_backlog(&path, &release_backlog());
    let store = JsonFileTaskStore::new(&path);
    let resolver = TaskReadinessResolver::new(&store);

    let filter = TaskFilter {
        label: Some("docs".into()),
        ..TaskFilter::default()
    };
    let ready = resolver.list_ready(&filter).await.unwrap();
    assert_eq!(ids(&ready), vec!["docs"]);
}
