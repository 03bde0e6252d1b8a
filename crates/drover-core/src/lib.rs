//! Core of drover: harness adapters, run governors and the run loop.
//!
//! The loop in [`orchestrator`] takes one ready task at a time from a
//! [`drover_store::TaskStore`], hands it to a [`harness::Harness`], and
//! settles the task once the [`budget`], [`iteration`] and [`git_state`]
//! checks have had their say.

pub mod budget;
pub mod config;
pub mod context;
pub mod gate;
pub mod git_state;
pub mod harness;
pub mod iteration;
pub mod orchestrator;
pub mod prompt;
pub mod readiness;

pub use budget::{BudgetError, LedgerSnapshot, UsageLedger, WarningState};
pub use config::{ConfigError, RunConfig};
pub use context::RunContext;
pub use gate::{CheckpointGate, GateError};
pub use git_state::{GitPolicy, GitStateError, GitStateGate};
pub use iteration::{Admission, IterationError, IterationGovernor};
pub use orchestrator::{LoopConfig, RunOutcome, RunReport, next_task, run_loop};
pub use readiness::TaskReadinessResolver;
