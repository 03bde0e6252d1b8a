//! OpenCode harness adapter.
//!
//! `opencode run --format json` emits one JSON object per line. `text`
//! frames carry assistant output; `step_finish` frames carry per-step
//! tokens and cost, which are summed. The same decoder serves both the
//! synchronous and the streaming path.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::error::HarnessError;
use super::process::{self, FrameDecoder, UsageFallback};
use super::trait_def::Harness;
use super::types::{
    EventStream, HarnessEvent, HarnessKind, InvocationOptions, InvocationResult, UsageSummary,
    null_as_default,
};
use crate::prompt::combine_prompts;

/// Harness adapter for the `opencode` CLI.
#[derive(Debug, Clone)]
pub struct OpenCodeAdapter {
    binary_path: String,
}

impl OpenCodeAdapter {
    /// Create an adapter that looks for `opencode` on `$PATH`.
    pub fn new() -> Self {
        Self::with_binary(HarnessKind::OpenCode.default_binary())
    }

    /// Create an adapter with a custom binary path.
    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            binary_path: path.into(),
        }
    }

    fn build_args(&self, prompt: &str, options: &InvocationOptions) -> Vec<String> {
        let mut args = vec!["run".to_string(), "--format".to_string(), "json".to_string()];
        if let Some(model) = &options.model {
            args.push("-m".to_string());
            args.push(model.clone());
        }
        args.extend(options.extra_args.iter().cloned());
        args.push(prompt.to_string());
        args
    }
}

impl Default for OpenCodeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct CacheTokens {
    #[serde(default, deserialize_with = "null_as_default")]
    read: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    write: u64,
}

#[derive(Debug, Default, Deserialize)]
struct StepTokens {
    #[serde(default, deserialize_with = "null_as_default")]
    input: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    output: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    reasoning: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    cache: CacheTokens,
}

#[derive(Debug, Deserialize)]
struct TextPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct StepPart {
    tokens: Option<StepTokens>,
    cost: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolState {
    status: Option<String>,
    output: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ToolPart {
    tool: Option<String>,
    #[serde(default)]
    state: ToolState,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// One line of `opencode run --format json`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenCodeFrame {
    Text {
        part: TextPart,
    },
    StepFinish {
        part: StepPart,
    },
    ToolUse {
        part: ToolPart,
    },
    Error {
        error: Option<ErrorBody>,
        message: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

// ---------------------------------------------------------------------------
// Stream decoding
// ---------------------------------------------------------------------------

/// Decoder for OpenCode JSON frames.
#[derive(Debug, Default)]
pub(crate) struct OpenCodeDecoder;

impl FrameDecoder for OpenCodeDecoder {
    fn decode(&mut self, line: &str) -> Result<Vec<HarnessEvent>, HarnessError> {
        let frame: OpenCodeFrame = serde_json::from_str(line)
            .map_err(|e| HarnessError::parse(HarnessKind::OpenCode, e))?;

        let mut events = Vec::new();
        match frame {
            OpenCodeFrame::Text { part } => {
                if !part.text.is_empty() {
                    events.push(HarnessEvent::Text { text: part.text });
                }
            }
            OpenCodeFrame::StepFinish { part } => {
                let tokens = part.tokens.unwrap_or_default();
                events.push(HarnessEvent::Usage(UsageSummary {
                    input_tokens: tokens.input,
                    output_tokens: tokens.output + tokens.reasoning,
                    cache_read_tokens: tokens.cache.read,
                    cache_creation_tokens: tokens.cache.write,
                    cost_usd: part.cost,
                    estimated: false,
                }));
            }
            OpenCodeFrame::ToolUse { part } => {
                let name = part.tool.unwrap_or_else(|| "tool".to_string());
                events.push(HarnessEvent::ToolStarted { name });
                if part.state.status.as_deref() == Some("completed") {
                    events.push(HarnessEvent::ToolResult {
                        output: part.state.output.unwrap_or_default(),
                    });
                }
            }
            OpenCodeFrame::Error { error, message } => {
                let message = error
                    .and_then(|e| e.message)
                    .or(message)
                    .unwrap_or_else(|| "unknown error".to_string());
                events.push(HarnessEvent::Error { message });
            }
            OpenCodeFrame::Unknown => {
                debug!("ignoring unrecognised opencode frame type");
            }
        }
        Ok(events)
    }
}

// ---------------------------------------------------------------------------
// Harness trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl Harness for OpenCodeAdapter {
    fn kind(&self) -> HarnessKind {
        HarnessKind::OpenCode
    }

    fn binary(&self) -> &str {
        &self.binary_path
    }

    async fn invoke(
        &self,
        system_prompt: &str,
        task_prompt: &str,
        options: &InvocationOptions,
    ) -> Result<InvocationResult, HarnessError> {
        let prompt = combine_prompts(system_prompt, task_prompt);
        let args = self.build_args(&prompt, options);
        let output = process::run_captured(self.kind(), &self.binary_path, &args, options).await?;

        let (_, acc) = process::decode_captured(self.kind(), &mut OpenCodeDecoder, &output.stdout);
        let text = acc.text().to_string();
        let usage = acc.finish(
            self.kind(),
            &UsageFallback {
                prompt,
                estimate: false,
            },
        );

        Ok(InvocationResult {
            harness: self.kind(),
            text,
            usage,
            exit_code: output.exit_code,
            raw_output: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn invoke_streaming(
        &self,
        system_prompt: &str,
        task_prompt: &str,
        options: &InvocationOptions,
    ) -> Result<EventStream, HarnessError> {
        let prompt = combine_prompts(system_prompt, task_prompt);
        let args = self.build_args(&prompt, options);
        process::spawn_streaming(
            self.kind(),
            &self.binary_path,
            &args,
            options,
            Box::new(OpenCodeDecoder),
            UsageFallback {
                prompt,
                estimate: false,
            },
        )
    }
}
