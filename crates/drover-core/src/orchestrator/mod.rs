//! Single-task run loop: pick the next ready task, run one harness
//! invocation against it, account for usage, verify the repository and
//! settle the task status. Repeat until nothing is runnable or a governor
//! says stop.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use drover_store::{StoreResult, Task, TaskFilter, TaskKind, TaskStatus, TaskStore};

use crate::budget::{LedgerSnapshot, WarningState};
use crate::context::RunContext;
use crate::git_state::{GitPolicy, GitStateError, GitStateGate};
use crate::harness::{
    Capability, Harness, HarnessError, HarnessEvent, HarnessKind, InvocationOptions, UsageSummary,
};
use crate::iteration::Admission;
use crate::prompt::render_task_prompt;
use crate::readiness::TaskReadinessResolver;

/// Per-run settings that do not live in [`RunContext`].
#[derive(Debug, Clone, Default)]
pub struct LoopConfig {
    /// Restricts which tasks the loop considers.
    pub filter: TaskFilter,
    /// What a dirty tree after a run means.
    pub git_policy: GitPolicy,
    pub system_prompt: String,
    pub options: InvocationOptions,
}

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// No open work remains.
    Completed,
    /// Remaining work waits on these open gates.
    AwaitingApproval { gates: Vec<String> },
    /// Open tasks remain but none can run and no gate explains it.
    Blocked { tasks: Vec<String> },
    /// The ledger is over its limit.
    BudgetExceeded { used: u64, limit: u64 },
    /// The per-run attempt ceiling was exceeded.
    RunLimitReached { attempts: u32 },
    /// A task used up its attempts.
    TaskLimitReached { task_id: String, attempts: u32 },
    /// The tree was dirty after a run under the `required` policy.
    DirtyRepository { task_id: String, paths: Vec<String> },
    /// The cancellation token fired.
    Interrupted,
}

impl RunOutcome {
    /// Whether the run ended without anything needing repair.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed | Self::AwaitingApproval { .. })
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub harness: HarnessKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    /// Tasks closed by this run, in order.
    pub tasks_closed: Vec<String>,
    /// Harness invocations started.
    pub attempts: u32,
    pub usage: LedgerSnapshot,
}

/// What one harness invocation produced.
struct Attempt {
    exit_code: Option<i32>,
    usage: UsageSummary,
    last_error: Option<String>,
}

/// Run tasks from `store` with `harness` until the backlog is drained or a
/// stop condition fires.
///
/// # Errors
///
/// Store failures, spawn failures and git command failures abort the loop.
/// A task that was in progress when that happens is put back to `open`.
pub async fn run_loop(
    store: &dyn TaskStore,
    harness: &dyn Harness,
    ctx: &mut RunContext,
    git: &GitStateGate,
    config: &LoopConfig,
    cancel: CancellationToken,
) -> Result<RunReport> {
    let mut tasks_closed = Vec::new();
    let mut attempts = 0u32;

    tracing::info!(
        run_id = %ctx.run_id,
        harness = harness.name(),
        limit = ctx.ledger.limit()?,
        "run started"
    );

    let outcome = loop {
        // 1. Cancellation.
        if cancel.is_cancelled() {
            tracing::info!(run_id = %ctx.run_id, "run cancelled");
            break RunOutcome::Interrupted;
        }

        // 2. Budget.
        if !ctx.ledger.within_budget()? {
            let used = ctx.ledger.used()?;
            let limit = ctx.ledger.limit()?;
            tracing::warn!(used, limit, "token budget exceeded");
            break RunOutcome::BudgetExceeded { used, limit };
        }

        // 3. Pick a task.
        let task = match next_task(store, &config.filter)
            .await
            .context("failed to pick the next task")?
        {
            Some(task) => task,
            None => break idle_outcome(store, &config.filter).await?,
        };

        // 4. Attempt ceilings.
        match ctx.governor.admit(&task.id) {
            Admission::Admitted {
                task_attempt,
                run_attempt,
            } => {
                tracing::info!(
                    task_id = %task.id,
                    title = %task.title,
                    status = %task.status,
                    task_attempt,
                    run_attempt,
                    "starting task"
                );
            }
            Admission::RunLimitReached { attempts, max } => {
                tracing::warn!(attempts, max, "run attempt limit reached");
                break RunOutcome::RunLimitReached { attempts };
            }
            Admission::TaskLimitReached {
                task_id,
                attempts,
                max,
            } => {
                tracing::warn!(task_id = %task_id, attempts, max, "task attempt limit reached");
                break RunOutcome::TaskLimitReached { task_id, attempts };
            }
        }

        // 5. Invoke.
        store
            .update_status(&task.id, TaskStatus::InProgress)
            .await
            .with_context(|| format!("failed to mark task {} in progress", task.id))?;
        attempts += 1;

        let attempt = match invoke(harness, &task, ctx, config, &cancel).await {
            Ok(Some(attempt)) => attempt,
            Ok(None) => {
                reopen(store, &task.id).await;
                tracing::info!(task_id = %task.id, "run cancelled during invocation");
                break RunOutcome::Interrupted;
            }
            Err(e) => {
                reopen(store, &task.id).await;
                return Err(e).with_context(|| format!("harness invocation failed for task {}", task.id));
            }
        };

        tracing::info!(
            task_id = %task.id,
            exit_code = ?attempt.exit_code,
            tokens = attempt.usage.total_tokens(),
            estimated = attempt.usage.estimated,
            used = ctx.ledger.used()?,
            remaining = ctx.ledger.remaining()?,
            "invocation finished"
        );
        if ctx.ledger.check_warning(ctx.warn_threshold)? == WarningState::JustCrossed {
            tracing::info!(
                task_id = %task.id,
                remaining = ctx.ledger.remaining()?,
                "continuing past the budget warning threshold"
            );
        }

        // 6. Repository state.
        match git.ensure_clean(config.git_policy) {
            Ok(_) => {}
            Err(GitStateError::Dirty { paths }) => {
                reopen(store, &task.id).await;
                tracing::error!(task_id = %task.id, ?paths, "repository left dirty");
                break RunOutcome::DirtyRepository {
                    task_id: task.id,
                    paths,
                };
            }
            Err(e) => {
                reopen(store, &task.id).await;
                return Err(e).context("failed to check repository state");
            }
        }

        // 7. Settle the task.
        if attempt.exit_code == Some(0) {
            store
                .update_status(&task.id, TaskStatus::Closed)
                .await
                .with_context(|| format!("failed to close task {}", task.id))?;
            tracing::info!(task_id = %task.id, "task closed");
            tasks_closed.push(task.id);
        } else {
            let failure = HarnessError::SubprocessFailure {
                harness: harness.kind(),
                exit_code: attempt.exit_code,
                output: attempt.last_error.unwrap_or_default(),
            };
            tracing::warn!(task_id = %task.id, error = %failure, "task attempt failed; reopening");
            store
                .update_status(&task.id, TaskStatus::Open)
                .await
                .with_context(|| format!("failed to reopen task {}", task.id))?;
        }
    };

    let report = RunReport {
        run_id: ctx.run_id,
        harness: harness.kind(),
        started_at: ctx.started_at,
        finished_at: Utc::now(),
        outcome,
        tasks_closed,
        attempts,
        usage: ctx.ledger.snapshot()?,
    };
    tracing::info!(
        run_id = %report.run_id,
        outcome = ?report.outcome,
        closed = report.tasks_closed.len(),
        attempts = report.attempts,
        used = report.usage.used,
        "run finished"
    );
    Ok(report)
}

/// The task the loop works on next: the one already in progress, else the
/// first ready task that is neither a gate nor an epic.
pub async fn next_task(store: &dyn TaskStore, filter: &TaskFilter) -> StoreResult<Option<Task>> {
    let resolver = TaskReadinessResolver::new(store);
    if let Some(task) = resolver.next_in_progress(filter).await? {
        return Ok(Some(task));
    }
    Ok(resolver
        .list_ready(filter)
        .await?
        .into_iter()
        .find(is_runnable))
}

/// Gates wait for a human and epics are containers; neither is handed to a
/// harness.
fn is_runnable(task: &Task) -> bool {
    !task.is_gate() && task.kind != TaskKind::Epic
}

/// Outcome when no task is runnable.
async fn idle_outcome(store: &dyn TaskStore, filter: &TaskFilter) -> Result<RunOutcome> {
    let open: Vec<Task> = store
        .list_tasks(&filter.with_status(TaskStatus::Open))
        .await
        .context("failed to list open tasks")?
        .into_iter()
        .filter(|t| t.kind != TaskKind::Epic)
        .collect();

    if open.is_empty() {
        tracing::info!("no open tasks remain");
        return Ok(RunOutcome::Completed);
    }

    let gates: Vec<String> = open
        .iter()
        .filter(|t| t.is_gate())
        .map(|t| t.id.clone())
        .collect();
    if !gates.is_empty() {
        tracing::info!(?gates, "waiting for gate approval");
        return Ok(RunOutcome::AwaitingApproval { gates });
    }

    let tasks: Vec<String> = open.into_iter().map(|t| t.id).collect();
    tracing::warn!(?tasks, "open tasks remain but none is ready");
    Ok(RunOutcome::Blocked { tasks })
}

/// Put a task back to `open` after an aborted attempt. Failures are logged
/// since the caller is already on an error path.
async fn reopen(store: &dyn TaskStore, task_id: &str) {
    if let Err(e) = store.update_status(task_id, TaskStatus::Open).await {
        tracing::warn!(task_id, error = %e, "failed to reopen task");
    }
}

/// Run one invocation, recording usage into the ledger as it arrives.
///
/// Returns `None` when cancelled. Dropping the in-flight future or stream
/// kills the subprocess; usage from frames already received stays recorded.
async fn invoke(
    harness: &dyn Harness,
    task: &Task,
    ctx: &mut RunContext,
    config: &LoopConfig,
    cancel: &CancellationToken,
) -> Result<Option<Attempt>> {
    let task_prompt = render_task_prompt(task);

    if !harness.capabilities().contains(Capability::Streaming) {
        let result = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            result = harness.invoke(&config.system_prompt, &task_prompt, &config.options) => result?,
        };
        ctx.ledger.record_usage(&result.usage)?;
        let last_error = (!result.succeeded()).then(|| {
            if result.stderr.trim().is_empty() {
                result.raw_output.clone()
            } else {
                result.stderr.clone()
            }
        });
        return Ok(Some(Attempt {
            exit_code: result.exit_code,
            usage: result.usage,
            last_error,
        }));
    }

    let mut stream = harness
        .invoke_streaming(&config.system_prompt, &task_prompt, &config.options)
        .await?;

    let mut streamed = UsageSummary::default();
    let mut saw_usage = false;
    let mut last_error = None;

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            event = stream.next() => event,
        };
        let Some(event) = event else {
            // The stream ended without a terminal event.
            return Ok(Some(Attempt {
                exit_code: None,
                usage: streamed,
                last_error,
            }));
        };

        match event {
            HarnessEvent::Text { text } => {
                tracing::debug!(task_id = %task.id, %text, "agent text");
            }
            HarnessEvent::ToolStarted { name } => {
                tracing::info!(task_id = %task.id, tool = %name, "tool call");
            }
            HarnessEvent::ToolResult { output } => {
                tracing::debug!(task_id = %task.id, bytes = output.len(), "tool result");
            }
            HarnessEvent::System { message } => {
                tracing::debug!(task_id = %task.id, %message, "harness notice");
            }
            HarnessEvent::Error { message } => {
                tracing::warn!(task_id = %task.id, %message, "harness reported an error");
                last_error = Some(message);
            }
            HarnessEvent::Usage(delta) => {
                ctx.ledger.record_usage(&delta)?;
                streamed.add(&delta);
                saw_usage = true;
            }
            HarnessEvent::Completed { exit_code, usage } => {
                if !saw_usage {
                    ctx.ledger.record_usage(&usage)?;
                }
                return Ok(Some(Attempt {
                    exit_code,
                    usage,
                    last_error,
                }));
            }
        }
    }
}
