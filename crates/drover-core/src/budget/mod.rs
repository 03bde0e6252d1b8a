//! Run-scoped usage ledger.
//!
//! The ledger holds a token limit fixed at [`UsageLedger::init`], a
//! monotonic `used` counter and a one-shot warning latch. Every query made
//! before `init` fails with [`BudgetError::NotInitialized`].

use serde::Serialize;
use tracing::{debug, warn};

use crate::harness::UsageSummary;

/// Default warning threshold, in percent of the limit.
pub const DEFAULT_WARN_THRESHOLD: u32 = 80;

/// Errors from the usage ledger.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BudgetError {
    #[error("usage ledger used before init; set a budget limit first")]
    NotInitialized,

    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },
}

/// Result of [`UsageLedger::check_warning`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningState {
    /// Usage is below the threshold (or the limit is zero).
    BelowThreshold,
    /// This call is the first to see usage at or above the threshold.
    JustCrossed,
    /// The threshold was crossed on an earlier call.
    AlreadyWarned,
}

/// Point-in-time view of the ledger, serialised into run reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerSnapshot {
    pub limit: u64,
    pub used: u64,
    pub remaining: i64,
    pub warned: bool,
    pub cost_usd: Option<f64>,
    pub estimated_invocations: u32,
}

#[derive(Debug, Clone, Default)]
struct LedgerState {
    limit: u64,
    used: u64,
    warned: bool,
    cost_usd: Option<f64>,
    estimated_invocations: u32,
}

/// Token ledger for one run.
#[derive(Debug, Clone, Default)]
pub struct UsageLedger {
    state: Option<LedgerState>,
}

impl UsageLedger {
    /// An uninitialised ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the limit and reset usage to zero.
    ///
    /// # Errors
    ///
    /// [`BudgetError::Validation`] when `limit` is missing or negative.
    pub fn init(&mut self, limit: Option<i64>) -> Result<(), BudgetError> {
        let limit = limit.ok_or_else(|| BudgetError::Validation {
            field: "budget limit",
            reason: "a limit is required".to_string(),
        })?;
        let limit = u64::try_from(limit).map_err(|_| BudgetError::Validation {
            field: "budget limit",
            reason: format!("must be a non-negative integer, got {limit}"),
        })?;
        debug!(limit, "usage ledger initialised");
        self.state = Some(LedgerState {
            limit,
            ..LedgerState::default()
        });
        Ok(())
    }

    /// Whether [`Self::init`] has been called.
    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    fn state(&self) -> Result<&LedgerState, BudgetError> {
        self.state.as_ref().ok_or(BudgetError::NotInitialized)
    }

    fn state_mut(&mut self) -> Result<&mut LedgerState, BudgetError> {
        self.state.as_mut().ok_or(BudgetError::NotInitialized)
    }

    /// Add `tokens` to the used total.
    ///
    /// # Errors
    ///
    /// [`BudgetError::Validation`] for a negative count,
    /// [`BudgetError::NotInitialized`] before `init`.
    pub fn record(&mut self, tokens: i64) -> Result<(), BudgetError> {
        let tokens = u64::try_from(tokens).map_err(|_| BudgetError::Validation {
            field: "token count",
            reason: format!("must be a non-negative integer, got {tokens}"),
        })?;
        let state = self.state_mut()?;
        state.used = state.used.saturating_add(tokens);
        Ok(())
    }

    /// Record a whole invocation: input plus output tokens, and its cost.
    pub fn record_usage(&mut self, usage: &UsageSummary) -> Result<(), BudgetError> {
        let state = self.state_mut()?;
        state.used = state.used.saturating_add(usage.total_tokens());
        if let Some(cost) = usage.cost_usd {
            state.cost_usd = Some(state.cost_usd.unwrap_or(0.0) + cost);
        }
        if usage.estimated {
            state.estimated_invocations += 1;
        }
        debug!(
            tokens = usage.total_tokens(),
            used = state.used,
            limit = state.limit,
            estimated = usage.estimated,
            "usage recorded"
        );
        Ok(())
    }

    pub fn limit(&self) -> Result<u64, BudgetError> {
        Ok(self.state()?.limit)
    }

    pub fn used(&self) -> Result<u64, BudgetError> {
        Ok(self.state()?.used)
    }

    /// `limit - used`; negative once the budget is overrun.
    pub fn remaining(&self) -> Result<i64, BudgetError> {
        let state = self.state()?;
        let remaining = i128::from(state.limit) - i128::from(state.used);
        Ok(remaining.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64)
    }

    /// `used <= limit`.
    pub fn within_budget(&self) -> Result<bool, BudgetError> {
        let state = self.state()?;
        Ok(state.used <= state.limit)
    }

    /// One-shot threshold check.
    ///
    /// Returns [`WarningState::JustCrossed`] exactly once, the first time
    /// `used * 100 / limit >= threshold_percent`. A zero limit never warns.
    pub fn check_warning(&mut self, threshold_percent: u32) -> Result<WarningState, BudgetError> {
        let state = self.state_mut()?;
        if state.warned {
            return Ok(WarningState::AlreadyWarned);
        }
        if state.limit == 0 {
            return Ok(WarningState::BelowThreshold);
        }
        let percent = u128::from(state.used) * 100 / u128::from(state.limit);
        if percent >= u128::from(threshold_percent) {
            state.warned = true;
            warn!(
                used = state.used,
                limit = state.limit,
                threshold = threshold_percent,
                "token budget warning threshold reached"
            );
            return Ok(WarningState::JustCrossed);
        }
        Ok(WarningState::BelowThreshold)
    }

    pub fn snapshot(&self) -> Result<LedgerSnapshot, BudgetError> {
        let state = self.state()?;
        Ok(LedgerSnapshot {
            limit: state.limit,
            used: state.used,
            remaining: self.remaining()?,
            warned: state.warned,
            cost_usd: state.cost_usd,
            estimated_invocations: state.estimated_invocations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(limit: i64) -> UsageLedger {
        let mut ledger = UsageLedger::new();
        ledger.init(Some(limit)).unwrap();
        ledger
    }

    #[test]
    fn queries_before_init_fail() {
        let mut ledger = UsageLedger::new();
        assert_eq!(ledger.within_budget(), Err(BudgetError::NotInitialized));
        assert_eq!(ledger.remaining(), Err(BudgetError::NotInitialized));
        assert_eq!(ledger.record(5), Err(BudgetError::NotInitialized));
        assert_eq!(
            ledger.check_warning(DEFAULT_WARN_THRESHOLD),
            Err(BudgetError::NotInitialized)
        );
        assert!(!ledger.is_initialized());
    }

    #[test]
    fn init_rejects_missing_and_negative() {
        let mut ledger = UsageLedger::new();
        assert!(matches!(ledger.init(None), Err(BudgetError::Validation { .. })));
        assert!(matches!(ledger.init(Some(-1)), Err(BudgetError::Validation { .. })));
        assert!(!ledger.is_initialized());
    }

    #[test]
    fn init_resets_usage() {
        let mut ledger = ledger(100);
        ledger.record(60).unwrap();
        ledger.init(Some(200)).unwrap();
        assert_eq!(ledger.used().unwrap(), 0);
        assert_eq!(ledger.remaining().unwrap(), 200);
    }

    #[test]
    fn record_rejects_negative() {
        let mut ledger = ledger(100);
        assert!(matches!(ledger.record(-3), Err(BudgetError::Validation { .. })));
        assert_eq!(ledger.used().unwrap(), 0);
    }

    #[test]
    fn overrun_goes_negative() {
        let mut ledger = ledger(1000);
        ledger.record(400).unwrap();
        assert!(ledger.within_budget().unwrap());
        ledger.record(700).unwrap();
        assert!(!ledger.within_budget().unwrap());
        assert_eq!(ledger.remaining().unwrap(), -100);
    }

    #[test]
    fn exactly_at_limit_is_within_budget() {
        let mut ledger = ledger(500);
        ledger.record(500).unwrap();
        assert!(ledger.within_budget().unwrap());
        assert_eq!(ledger.remaining().unwrap(), 0);
    }

    #[test]
    fn warning_latches_once() {
        let mut ledger = ledger(1000);
        ledger.record(799).unwrap();
        assert_eq!(ledger.check_warning(80).unwrap(), WarningState::BelowThreshold);
        ledger.record(1).unwrap();
        assert_eq!(ledger.check_warning(80).unwrap(), WarningState::JustCrossed);
        assert_eq!(ledger.check_warning(80).unwrap(), WarningState::AlreadyWarned);
        ledger.record(500).unwrap();
        assert_eq!(ledger.check_warning(80).unwrap(), WarningState::AlreadyWarned);
    }

    #[test]
    fn zero_limit_never_warns() {
        let mut ledger = ledger(0);
        ledger.record(10).unwrap();
        assert_eq!(ledger.check_warning(80).unwrap(), WarningState::BelowThreshold);
        assert!(!ledger.within_budget().unwrap());
    }

    #[test]
    fn record_usage_sums_tokens_and_cost() {
        let mut ledger = ledger(10_000);
        ledger
            .record_usage(&UsageSummary {
                input_tokens: 35,
                output_tokens: 175,
                cache_read_tokens: 999,
                cost_usd: Some(0.5),
                ..UsageSummary::default()
            })
            .unwrap();
        ledger
            .record_usage(&UsageSummary::estimate(&"x".repeat(400), &"y".repeat(120)))
            .unwrap();

        let snapshot = ledger.snapshot().unwrap();
        assert_eq!(snapshot.used, 340);
        assert_eq!(snapshot.remaining, 9_660);
        assert_eq!(snapshot.cost_usd, Some(0.5));
        assert_eq!(snapshot.estimated_invocations, 1);
        assert!(!snapshot.warned);
    }
}
