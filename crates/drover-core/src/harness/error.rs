use thiserror::Error;

use super::types::HarnessKind;

/// Errors from harness selection and invocation.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Neither the override, the priority list, nor the fallback order
    /// produced an installed backend.
    #[error("no harness available (tried: {})", join_kinds(.tried))]
    NoHarnessAvailable { tried: Vec<HarnessKind> },

    /// A configured harness name is not one of the supported backends.
    #[error("unknown harness {0:?} (expected one of: claude, codex, aider, opencode)")]
    UnknownHarness(String),

    /// The backend binary could not be started.
    #[error("failed to spawn {harness} binary at '{binary}' -- is it installed and on PATH?")]
    Spawn {
        harness: HarnessKind,
        binary: String,
        #[source]
        source: std::io::Error,
    },

    /// The backend exited non-zero. `output` is what it printed.
    #[error("{harness} exited with {}: {output}", describe_exit(*.exit_code))]
    SubprocessFailure {
        harness: HarnessKind,
        exit_code: Option<i32>,
        output: String,
    },

    /// A frame or result object could not be decoded. Never fatal: callers
    /// log it and continue with zero or estimated usage.
    #[error("malformed {harness} output: {reason}")]
    ParseDegradation { harness: HarnessKind, reason: String },

    /// Waiting on or reading from the subprocess failed.
    #[error("I/O error talking to {harness}: {source}")]
    Io {
        harness: HarnessKind,
        #[source]
        source: std::io::Error,
    },
}

impl HarnessError {
    pub(crate) fn parse(harness: HarnessKind, reason: impl ToString) -> Self {
        Self::ParseDegradation {
            harness,
            reason: reason.to_string(),
        }
    }
}

fn join_kinds(kinds: &[HarnessKind]) -> String {
    if kinds.is_empty() {
        return "nothing".to_string();
    }
    kinds
        .iter()
        .map(|k| k.name())
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "a signal".to_string(),
    }
}
