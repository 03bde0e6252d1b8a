//! `drover ready` and `drover next`: inspect what the loop would work on.

use anyhow::{Context, Result};

use drover_core::next_task;
use drover_core::readiness::TaskReadinessResolver;
use drover_store::{Task, TaskFilter, TaskStore};

/// One table row per task.
fn print_task_row(task: &Task) {
    let kind = if task.is_gate() {
        format!("{} (gate)", task.kind)
    } else {
        task.kind.to_string()
    };
    let priority = task.priority.to_string();
    println!("  {:<12} {priority:<3} {kind:<18} {}", task.id, task.title);
}

/// List ready tasks in priority order.
pub async fn run_ready(store: &dyn TaskStore, filter: &TaskFilter, json: bool) -> Result<()> {
    let ready = TaskReadinessResolver::new(store)
        .list_ready(filter)
        .await
        .context("failed to list ready tasks")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ready)?);
        return Ok(());
    }

    if ready.is_empty() {
        println!("No ready tasks.");
        return Ok(());
    }

    println!("Ready tasks ({}):", ready.len());
    for task in &ready {
        print_task_row(task);
    }
    Ok(())
}

/// Show the task the run loop would pick next.
pub async fn run_next(store: &dyn TaskStore, filter: &TaskFilter, json: bool) -> Result<()> {
    let task = next_task(store, filter)
        .await
        .context("failed to pick the next task")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&task)?);
        return Ok(());
    }

    match task {
        Some(task) => {
            println!("Next task: {} ({})", task.id, task.status);
            print_task_row(&task);
            if let Some(description) = task.description.as_deref() {
                println!();
                println!("{}", description.trim());
            }
        }
        None => println!("No runnable task."),
    }
    Ok(())
}
