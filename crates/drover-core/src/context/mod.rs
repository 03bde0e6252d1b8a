//! Run-scoped state threaded through the run loop.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::budget::UsageLedger;
use crate::config::{ConfigError, RunConfig};
use crate::iteration::IterationGovernor;

/// Counters and identity of one run. Owned by the caller and passed by
/// `&mut` into the loop, so nothing outlives the run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ledger: UsageLedger,
    pub governor: IterationGovernor,
    /// Percentage of the limit at which the one-shot warning fires.
    pub warn_threshold: u32,
}

impl RunContext {
    /// Build a context from validated configuration: initialise the ledger
    /// with the budget limit and apply the iteration ceilings.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Budget`] when no limit is configured, plus any
    /// validation failure of the individual values.
    pub fn from_config(config: &RunConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut ledger = UsageLedger::new();
        ledger.init(config.budget.limit)?;

        let mut governor = IterationGovernor::new();
        governor.set_max_per_task(config.iterations.max_per_task)?;
        governor.set_max_per_run(config.iterations.max_per_run)?;

        Ok(Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            ledger,
            governor,
            warn_threshold: config.budget.warn_threshold,
        })
    }
}
