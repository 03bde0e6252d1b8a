//! `drover run` command: work the backlog with one harness until done.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use drover_core::harness::HarnessRegistry;
use drover_core::{GitStateGate, LoopConfig, RunContext, RunOutcome, RunReport, run_loop};
use drover_store::{JsonFileTaskStore, TaskFilter};

use crate::config::DroverConfig;

/// Process exit code for an outcome.
pub fn exit_code(outcome: &RunOutcome) -> i32 {
    match outcome {
        RunOutcome::Completed | RunOutcome::AwaitingApproval { .. } => 0,
        RunOutcome::Blocked { .. } => 1,
        RunOutcome::TaskLimitReached { .. } | RunOutcome::RunLimitReached { .. } => 2,
        RunOutcome::BudgetExceeded { .. } => 3,
        RunOutcome::DirtyRepository { .. } => 4,
        RunOutcome::Interrupted => 130,
    }
}

/// Run the loop. Returns the process exit code.
pub async fn run_drover(config: &DroverConfig, filter: TaskFilter, json: bool) -> Result<i32> {
    let mut ctx = RunContext::from_config(&config.run).context("invalid run configuration")?;

    let registry = HarnessRegistry::with_defaults();
    let policy = config.run.selection_policy()?;
    let harness = registry.select(&policy)?;

    let git = GitStateGate::open(&config.project_root)
        .with_context(|| format!("cannot run outside a git repository: {}", config.project_root.display()))?;
    let store = JsonFileTaskStore::new(&config.tasks_path);

    let loop_config = LoopConfig {
        filter,
        git_policy: config.run.git.policy,
        system_prompt: config.run.system_prompt(&config.project_root)?,
        options: config.run.invocation_options(harness.kind(), &config.project_root),
    };

    if !json {
        println!("Running backlog {} with {}", config.tasks_path.display(), harness.name());
        println!("  Budget: {} tokens", ctx.ledger.limit()?);
        println!(
            "  Attempts: {} per task, {} per run",
            ctx.governor.max_per_task(),
            ctx.governor.max_per_run()
        );
        println!("  Git policy: {}", loop_config.git_policy);
    }

    // Set up graceful shutdown: first signal cancels, second force-exits.
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));
    let got_first_clone = Arc::clone(&got_first_signal);

    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_clone.swap(true, Ordering::SeqCst) {
                // Second signal: force exit.
                eprintln!("\nForce exit.");
                std::process::exit(130);
            }
            eprintln!("\nStopping after the current agent is terminated (Ctrl+C again to force)...");
            cancel_clone.cancel();
        }
    });

    let report = run_loop(&store, harness, &mut ctx, &git, &loop_config, cancel).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(exit_code(&report.outcome))
}

fn print_report(report: &RunReport) {
    println!();
    match &report.outcome {
        RunOutcome::Completed => println!("Backlog complete."),
        RunOutcome::AwaitingApproval { gates } => {
            println!("Run paused -- gates awaiting approval:");
            for gate in gates {
                println!("  - {gate}");
            }
            println!();
            println!("To resume:");
            println!("  1. Approve each gate: drover approve <gate-id>");
            println!("  2. Re-run:            drover run");
        }
        RunOutcome::Blocked { tasks } => {
            println!("Run stopped: open tasks remain but none is ready:");
            for task in tasks {
                println!("  - {task}");
            }
        }
        RunOutcome::BudgetExceeded { used, limit } => {
            println!("Run stopped: token budget exceeded ({used}/{limit} tokens used).");
        }
        RunOutcome::RunLimitReached { attempts } => {
            println!("Run stopped: attempt limit for this run reached ({attempts} attempts).");
        }
        RunOutcome::TaskLimitReached { task_id, attempts } => {
            println!("Run stopped: task {task_id} failed too often ({attempts} attempts).");
        }
        RunOutcome::DirtyRepository { task_id, paths } => {
            println!("Run stopped: task {task_id} left uncommitted changes:");
            for path in paths {
                println!("  {path}");
            }
            println!("Commit or discard them, then re-run `drover run`.");
        }
        RunOutcome::Interrupted => {
            println!("Run interrupted by signal. The current task was reopened.");
        }
    }

    println!();
    println!("  Run: {}", report.run_id);
    println!("  Harness: {}", report.harness);
    if !report.tasks_closed.is_empty() {
        println!("  Closed: {}", report.tasks_closed.join(", "));
    }
    println!("  Attempts: {}", report.attempts);
    println!(
        "  Tokens: {}/{} ({} remaining{})",
        report.usage.used,
        report.usage.limit,
        report.usage.remaining,
        if report.usage.estimated_invocations > 0 {
            format!(", {} estimated invocations", report.usage.estimated_invocations)
        } else {
            String::new()
        }
    );
    if let Some(cost) = report.usage.cost_usd {
        println!("  Cost: ${cost:.4}");
    }
    let elapsed = report.finished_at - report.started_at;
    println!("  Duration: {}s", elapsed.num_seconds());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_outcomes_exit_zero() {
        assert_eq!(exit_code(&RunOutcome::Completed), 0);
        assert_eq!(
            exit_code(&RunOutcome::AwaitingApproval {
                gates: vec!["g".into()]
            }),
            0
        );
    }

    #[test]
    fn failure_outcomes_exit_non_zero() {
        let failures = [
            RunOutcome::Blocked { tasks: vec![] },
            RunOutcome::BudgetExceeded { used: 2, limit: 1 },
            RunOutcome::RunLimitReached { attempts: 51 },
            RunOutcome::TaskLimitReached {
                task_id: "t".into(),
                attempts: 4,
            },
            RunOutcome::DirtyRepository {
                task_id: "t".into(),
                paths: vec![],
            },
            RunOutcome::Interrupted,
        ];
        for outcome in &failures {
            assert_ne!(exit_code(outcome), 0, "{outcome:?}");
            assert_eq!(outcome.is_success(), exit_code(outcome) == 0);
        }
    }
}
