//! Per-task and per-run attempt counters.
//!
//! Counters only grow. Increments are unbounded; the ceilings are applied
//! by the `check_*` methods, which always compare against the latest
//! configured maximum.

use std::collections::HashMap;

use tracing::debug;

/// Default attempts allowed for one task.
pub const DEFAULT_MAX_PER_TASK: u32 = 3;
/// Default attempts allowed across the whole run.
pub const DEFAULT_MAX_PER_RUN: u32 = 50;

/// Errors from the iteration governor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IterationError {
    #[error("invalid {field}: must be a positive integer, got {value}")]
    Validation { field: &'static str, value: i64 },
}

/// Result of [`IterationGovernor::admit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Both counters are within their ceilings.
    Admitted { task_attempt: u32, run_attempt: u32 },
    /// The run ceiling was exceeded.
    RunLimitReached { attempts: u32, max: u32 },
    /// The ceiling for this task was exceeded.
    TaskLimitReached {
        task_id: String,
        attempts: u32,
        max: u32,
    },
}

/// Attempt counters for one run.
#[derive(Debug, Clone)]
pub struct IterationGovernor {
    task_counts: HashMap<String, u32>,
    run_count: u32,
    max_per_task: u32,
    max_per_run: u32,
}

impl Default for IterationGovernor {
    fn default() -> Self {
        Self {
            task_counts: HashMap::new(),
            run_count: 0,
            max_per_task: DEFAULT_MAX_PER_TASK,
            max_per_run: DEFAULT_MAX_PER_RUN,
        }
    }
}

fn positive(field: &'static str, value: i64) -> Result<u32, IterationError> {
    u32::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or(IterationError::Validation { field, value })
}

impl IterationGovernor {
    /// A governor with the default ceilings.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_max_per_task(&mut self, max: i64) -> Result<(), IterationError> {
        self.max_per_task = positive("max per task", max)?;
        Ok(())
    }

    pub fn set_max_per_run(&mut self, max: i64) -> Result<(), IterationError> {
        self.max_per_run = positive("max per run", max)?;
        Ok(())
    }

    pub fn max_per_task(&self) -> u32 {
        self.max_per_task
    }

    pub fn max_per_run(&self) -> u32 {
        self.max_per_run
    }

    /// Bump the attempt count for `task_id` and return the new value.
    pub fn increment_task(&mut self, task_id: &str) -> u32 {
        let count = self.task_counts.entry(task_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Bump the run attempt count and return the new value.
    pub fn increment_run(&mut self) -> u32 {
        self.run_count += 1;
        self.run_count
    }

    pub fn task_count(&self, task_id: &str) -> u32 {
        self.task_counts.get(task_id).copied().unwrap_or(0)
    }

    pub fn run_count(&self) -> u32 {
        self.run_count
    }

    /// Pass iff the task's count is at most the ceiling.
    pub fn check_task(&self, task_id: &str) -> bool {
        self.task_count(task_id) <= self.max_per_task
    }

    /// Pass iff the run count is at most the ceiling.
    pub fn check_run(&self) -> bool {
        self.run_count <= self.max_per_run
    }

    /// Count one attempt at `task_id` (run first, then task) and check
    /// both ceilings.
    pub fn admit(&mut self, task_id: &str) -> Admission {
        let run_attempt = self.increment_run();
        let task_attempt = self.increment_task(task_id);
        debug!(task_id, task_attempt, run_attempt, "attempt counted");

        if !self.check_run() {
            return Admission::RunLimitReached {
                attempts: run_attempt,
                max: self.max_per_run,
            };
        }
        if !self.check_task(task_id) {
            return Admission::TaskLimitReached {
                task_id: task_id.to_string(),
                attempts: task_attempt,
                max: self.max_per_task,
            };
        }
        Admission::Admitted {
            task_attempt,
            run_attempt,
        }
    }
}
