//! Shared types for the harness layer: backend kinds, capabilities, the
//! normalized event enum and usage accounting.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;
use std::str::FromStr;

use futures::Stream;
use serde::{Deserialize, Serialize};

use super::error::HarnessError;

// ---------------------------------------------------------------------------
// Backend kinds
// ---------------------------------------------------------------------------

/// The four supported agent backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HarnessKind {
    /// Full-featured backend: separate system prompt, JSON result, streamed
    /// content blocks with per-message usage.
    Claude,
    /// Turn/item backend: usage only on streamed `turn.completed` frames.
    Codex,
    /// Minimal backend: plain text, no streaming, no usage.
    Aider,
    /// Step-based backend: usage on every `step_finish` frame.
    OpenCode,
}

impl HarnessKind {
    /// Every kind, in declaration order.
    pub const ALL: [HarnessKind; 4] = [Self::Claude, Self::Codex, Self::Aider, Self::OpenCode];

    /// Order tried when no priority list is configured.
    pub const FALLBACK_ORDER: [HarnessKind; 4] =
        [Self::Claude, Self::OpenCode, Self::Codex, Self::Aider];

    /// Canonical lowercase name, also used as the config key.
    pub fn name(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Aider => "aider",
            Self::OpenCode => "opencode",
        }
    }

    /// Binary looked up on `$PATH` by default.
    pub fn default_binary(self) -> &'static str {
        self.name()
    }

    /// Static capability set of this backend.
    pub fn capabilities(self) -> Capabilities {
        use Capability::*;
        match self {
            Self::Claude => Capabilities(&[
                Streaming,
                TokenReporting,
                SystemPromptInjection,
                AutoMode,
                StructuredJsonOutput,
                ModelSelection,
            ]),
            Self::Codex => Capabilities(&[Streaming, AutoMode, StructuredJsonOutput, ModelSelection]),
            Self::Aider => Capabilities(&[AutoMode, ModelSelection]),
            Self::OpenCode => Capabilities(&[
                Streaming,
                TokenReporting,
                StructuredJsonOutput,
                ModelSelection,
            ]),
        }
    }
}

impl fmt::Display for HarnessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HarnessKind {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" | "claude-code" => Ok(Self::Claude),
            "codex" => Ok(Self::Codex),
            "aider" => Ok(Self::Aider),
            "opencode" => Ok(Self::OpenCode),
            _ => Err(HarnessError::UnknownHarness(s.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// A feature a backend may or may not support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Streaming,
    TokenReporting,
    SystemPromptInjection,
    AutoMode,
    StructuredJsonOutput,
    ModelSelection,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Streaming => "streaming",
            Self::TokenReporting => "token_reporting",
            Self::SystemPromptInjection => "system_prompt_injection",
            Self::AutoMode => "auto_mode",
            Self::StructuredJsonOutput => "structured_json_output",
            Self::ModelSelection => "model_selection",
        };
        f.write_str(s)
    }
}

/// The capability set of one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities(&'static [Capability]);

impl Capabilities {
    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Usage
// ---------------------------------------------------------------------------

/// Token and cost usage of one invocation (or one frame of it).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cost_usd: Option<f64>,
    /// Counts come from the character heuristic, not the backend.
    pub estimated: bool,
}

impl UsageSummary {
    /// Characters per token assumed by [`Self::estimate`].
    pub const CHARS_PER_TOKEN: u64 = 4;

    /// Estimate usage from prompt and output lengths: `floor(chars / 4)`.
    pub fn estimate(prompt: &str, output: &str) -> Self {
        Self {
            input_tokens: prompt.chars().count() as u64 / Self::CHARS_PER_TOKEN,
            output_tokens: output.chars().count() as u64 / Self::CHARS_PER_TOKEN,
            estimated: true,
            ..Self::default()
        }
    }

    /// Add `other` into `self`. Costs add when either side has one.
    pub fn add(&mut self, other: &UsageSummary) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_creation_tokens += other.cache_creation_tokens;
        self.cost_usd = match (self.cost_usd, other.cost_usd) {
            (Some(a), Some(b)) => Some(a + b),
            (a, b) => a.or(b),
        };
        self.estimated |= other.estimated;
    }

    /// Tokens charged against the run budget: input plus output.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn is_zero(&self) -> bool {
        self.total_tokens() == 0
            && self.cache_read_tokens == 0
            && self.cache_creation_tokens == 0
            && self.cost_usd.is_none()
    }
}

/// Deserialize a wire counter where `null` means "not reported".
///
/// Use with `#[serde(default, deserialize_with = "null_as_default")]` so a
/// null counter degrades to zero instead of rejecting the whole frame.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A normalized event produced by any backend.
#[derive(Debug, Clone, PartialEq)]
pub enum HarnessEvent {
    /// Assistant text.
    Text { text: String },
    /// The agent started a tool call.
    ToolStarted { name: String },
    /// A tool call produced output.
    ToolResult { output: String },
    /// Informational notice from the backend.
    System { message: String },
    /// Error reported by the backend or by the stream reader.
    Error { message: String },
    /// Usage carried by a single frame. The terminal [`Self::Completed`]
    /// event repeats the sum of all of these.
    Usage(UsageSummary),
    /// Terminal event: the process exited.
    Completed {
        exit_code: Option<i32>,
        usage: UsageSummary,
    },
}

/// Lazy, finite stream of events from one invocation.
pub type EventStream = Pin<Box<dyn Stream<Item = HarnessEvent> + Send>>;

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// Per-invocation knobs.
#[derive(Debug, Clone, Default)]
pub struct InvocationOptions {
    /// Model override passed to backends that support model selection.
    pub model: Option<String>,
    /// Extra flags appended verbatim to the backend command line.
    pub extra_args: Vec<String>,
    /// Let the agent act without interactive confirmation.
    pub auto_mode: bool,
    /// Working directory of the subprocess; inherits ours when `None`.
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables for the subprocess.
    pub env: HashMap<String, String>,
}

/// Outcome of a synchronous invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationResult {
    pub harness: HarnessKind,
    /// Final assistant text.
    pub text: String,
    pub usage: UsageSummary,
    /// Subprocess exit code, `None` if it was killed by a signal.
    pub exit_code: Option<i32>,
    /// Everything the subprocess wrote to stdout.
    pub raw_output: String,
    /// Everything the subprocess wrote to stderr.
    pub stderr: String,
}

impl InvocationResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turn a non-zero exit into [`HarnessError::SubprocessFailure`]
    /// carrying the captured output.
    pub fn ensure_success(self) -> Result<Self, HarnessError> {
        if self.succeeded() {
            return Ok(self);
        }
        let output = if self.stderr.trim().is_empty() {
            self.raw_output
        } else {
            self.stderr
        };
        Err(HarnessError::SubprocessFailure {
            harness: self.harness,
            exit_code: self.exit_code,
            output,
        })
    }
}
