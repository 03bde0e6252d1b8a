//! `drover approve` and `drover gate`: human side of approval gates.

use anyhow::Result;

use drover_core::gate::CheckpointGate;
use drover_store::TaskStore;

/// Close the gate `gate_id`.
pub async fn run_approve(store: &dyn TaskStore, gate_id: &str) -> Result<()> {
    CheckpointGate::new(store).approve(gate_id).await?;
    println!("Gate {gate_id} approved.");
    Ok(())
}

/// Show which gate, if any, blocks `task_id`.
pub async fn run_gate(store: &dyn TaskStore, task_id: &str) -> Result<()> {
    match CheckpointGate::new(store).blocking_gate_for(task_id).await? {
        Some(gate_id) => {
            println!("Task {task_id} is waiting on gate {gate_id}.");
            println!("Approve it with: drover approve {gate_id}");
        }
        None => println!("Task {task_id} is not blocked by a gate."),
    }
    Ok(())
}
