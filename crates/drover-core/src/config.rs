//! Run configuration.
//!
//! Every field has a default so that a partial TOML file (or none at all)
//! deserialises. Layering of files, environment and flags happens in the
//! CLI; this type only holds and validates the merged result.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::budget::{BudgetError, DEFAULT_WARN_THRESHOLD};
use crate::git_state::GitPolicy;
use crate::harness::{HarnessError, HarnessKind, InvocationOptions, SelectionPolicy};
use crate::iteration::{DEFAULT_MAX_PER_RUN, DEFAULT_MAX_PER_TASK, IterationError};
use crate::prompt::DEFAULT_SYSTEM_PROMPT;

/// Errors from configuration validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error(transparent)]
    Harness(#[from] HarnessError),

    #[error(transparent)]
    Budget(#[from] BudgetError),

    #[error(transparent)]
    Iteration(#[from] IterationError),

    #[error("failed to read system prompt at {path}: {source}")]
    SystemPrompt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// -----------------------------------------------------------------------
// Sections
// -----------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Always use this backend.
    #[serde(rename = "override", skip_serializing_if = "Option::is_none")]
    pub override_name: Option<String>,
    /// Backends to try, in order, before the fallback order.
    pub priority: Vec<String>,
    /// Model passed to backends that support model selection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Let agents act without interactive confirmation.
    pub auto_mode: bool,
    /// Extra flags per backend name, appended verbatim.
    pub extra_args: BTreeMap<String, Vec<String>>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            override_name: None,
            priority: Vec::new(),
            model: None,
            auto_mode: true,
            extra_args: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Token limit for the run. Required before a run starts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    /// Warn once when usage reaches this percentage of the limit.
    pub warn_threshold: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            limit: None,
            warn_threshold: DEFAULT_WARN_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IterationConfig {
    pub max_per_task: i64,
    pub max_per_run: i64,
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self {
            max_per_task: i64::from(DEFAULT_MAX_PER_TASK),
            max_per_run: i64::from(DEFAULT_MAX_PER_RUN),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub policy: GitPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// File holding the system prompt. The built-in prompt is used when
    /// unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<PathBuf>,
}

// -----------------------------------------------------------------------
// RunConfig
// -----------------------------------------------------------------------

/// Every knob of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Raise the default log level to `debug`.
    pub debug: bool,
    pub harness: HarnessConfig,
    pub budget: BudgetConfig,
    pub iterations: IterationConfig,
    pub git: GitConfig,
    pub prompts: PromptConfig,
}

impl RunConfig {
    /// Check every value before a run starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(limit) = self.budget.limit {
            if limit < 0 {
                return Err(ConfigError::Invalid {
                    field: "budget.limit",
                    reason: format!("must be non-negative, got {limit}"),
                });
            }
        }
        if !(1..=100).contains(&self.budget.warn_threshold) {
            return Err(ConfigError::Invalid {
                field: "budget.warn_threshold",
                reason: format!("must be between 1 and 100, got {}", self.budget.warn_threshold),
            });
        }
        if self.iterations.max_per_task <= 0 {
            return Err(ConfigError::Invalid {
                field: "iterations.max_per_task",
                reason: format!("must be positive, got {}", self.iterations.max_per_task),
            });
        }
        if self.iterations.max_per_run <= 0 {
            return Err(ConfigError::Invalid {
                field: "iterations.max_per_run",
                reason: format!("must be positive, got {}", self.iterations.max_per_run),
            });
        }
        self.selection_policy()?;
        for name in self.harness.extra_args.keys() {
            name.parse::<HarnessKind>()?;
        }
        Ok(())
    }

    /// Harness selection policy from the configured names.
    pub fn selection_policy(&self) -> Result<SelectionPolicy, HarnessError> {
        SelectionPolicy::from_names(self.harness.override_name.as_deref(), &self.harness.priority)
    }

    /// Invocation options for `kind`, running in `working_dir`.
    pub fn invocation_options(&self, kind: HarnessKind, working_dir: &Path) -> InvocationOptions {
        let extra_args = self
            .harness
            .extra_args
            .iter()
            .find(|(name, _)| name.parse::<HarnessKind>().ok() == Some(kind))
            .map(|(_, args)| args.clone())
            .unwrap_or_default();
        InvocationOptions {
            model: self.harness.model.clone(),
            extra_args,
            auto_mode: self.harness.auto_mode,
            working_dir: Some(working_dir.to_path_buf()),
            env: Default::default(),
        }
    }

    /// The system prompt: the configured file, resolved against `base`
    /// when relative, or the built-in prompt.
    pub fn system_prompt(&self, base: &Path) -> Result<String, ConfigError> {
        let Some(path) = &self.prompts.system else {
            return Ok(DEFAULT_SYSTEM_PROMPT.to_string());
        };
        let path = if path.is_absolute() {
            path.clone()
        } else {
            base.join(path)
        };
        std::fs::read_to_string(&path).map_err(|source| ConfigError::SystemPrompt { path, source })
    }
}
