//! Codex harness adapter.
//!
//! Codex has no separate system-prompt channel, so the system and task
//! prompts are combined into one positional argument. Plain `codex exec`
//! prints text and reports no usage; `codex exec --json` emits
//! turn/item frames whose `turn.completed` frames carry token counts.

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

/// Harness adapter for the `codex` CLI.
#[derive(Debug, Clone)]
pub struct CodexAdapter {
    binary_path: String,
}

impl CodexAdapter {
    /// Create an adapter that looks for `codex` on `$PATH`.
    pub fn new() -> Self {
        Self::with_binary(HarnessKind::Codex.default_binary())
    }

    /// Create an adapter with a custom binary path.
    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            binary_path: path.into(),
        }
    }

    fn build_args(&self, prompt: &str, options: &InvocationOptions, streaming: bool) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if streaming {
            args.push("--json".to_string());
        }
        if options.auto_mode {
            args.push("--full-auto".to_string());
        }
        if let Some(model) = &options.model {
            args.push("-m".to_string());
            args.push(model.clone());
        }
        args.extend(options.extra_args.iter().cloned());
        args.push(prompt.to_string());
        args
    }
}

impl Default for CodexAdapter {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct CodexUsage {
    #[serde(default, deserialize_with = "null_as_default")]
    input_tokens: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    cached_input_tokens: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct CodexItem {
    #[serde(rename = "type", alias = "item_type")]
    kind: String,
    text: Option<String>,
    command: Option<String>,
    aggregated_output: Option<String>,
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CodexErrorBody {
    message: Option<String>,
}

/// One line of `codex exec --json`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum CodexFrame {
    #[serde(rename = "thread.started")]
    ThreadStarted { thread_id: Option<String> },
    #[serde(rename = "turn.started")]
    TurnStarted,
    #[serde(rename = "turn.completed")]
    TurnCompleted { usage: Option<CodexUsage> },
    #[serde(rename = "turn.failed")]
    TurnFailed { error: Option<CodexErrorBody> },
    #[serde(rename = "item.started")]
    ItemStarted { item: CodexItem },
    #[serde(rename = "item.updated")]
    ItemUpdated,
    #[serde(rename = "item.completed")]
    ItemCompleted { item: CodexItem },
    #[serde(rename = "error")]
    Error { message: Option<String> },
    #[serde(other)]
    Unknown,
}

/// Tool name reported for an item, if the item is a tool call.
fn tool_name(item: &CodexItem) -> Option<String> {
    match item.kind.as_str() {
        "command_execution" => Some("shell".to_string()),
        "file_edit" | "file_write" | "file_change" => Some(item.kind.clone()),
        "mcp_tool_call" => Some("mcp".to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Stream decoding
// ---------------------------------------------------------------------------

/// Decoder for `codex exec --json` frames.
#[derive(Debug, Default)]
pub(crate) struct CodexStreamDecoder;

impl FrameDecoder for CodexStreamDecoder {
    fn decode(&mut self, line: &str) -> Result<Vec<HarnessEvent>, HarnessError> {
        let frame: CodexFrame =
            serde_json::from_str(line).map_err(|e| HarnessError::parse(HarnessKind::Codex, e))?;

        let mut events = Vec::new();
        match frame {
            CodexFrame::ThreadStarted { thread_id } => {
                debug!(?thread_id, "codex thread started");
            }
            CodexFrame::TurnStarted | CodexFrame::ItemUpdated | CodexFrame::Unknown => {}
            CodexFrame::TurnCompleted { usage } => {
                if let Some(u) = usage {
                    events.push(HarnessEvent::Usage(UsageSummary {
                        input_tokens: u.input_tokens,
                        output_tokens: u.output_tokens,
                        cache_read_tokens: u.cached_input_tokens,
                        ..UsageSummary::default()
                    }));
                }
            }
            CodexFrame::TurnFailed { error } => {
                let message = error
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| "turn failed".to_string());
                events.push(HarnessEvent::Error { message });
            }
            CodexFrame::ItemStarted { item } => {
                if let Some(name) = tool_name(&item) {
                    events.push(HarnessEvent::ToolStarted { name });
                }
            }
            CodexFrame::ItemCompleted { item } => match item.kind.as_str() {
                "message" | "agent_message" | "assistant_message" => {
                    if let Some(text) = item.text {
                        events.push(HarnessEvent::Text { text });
                    }
                }
                "reasoning" => {
                    if let Some(text) = item.text {
                        events.push(HarnessEvent::System {
                            message: format!("reasoning: {text}"),
                        });
                    }
                }
                "command_execution" => {
                    let output = item
                        .aggregated_output
                        .or(item.command)
                        .unwrap_or_default();
                    events.push(HarnessEvent::ToolResult { output });
                }
                "file_edit" | "file_write" | "file_change" => {
                    let output = item.path.or(item.text).unwrap_or_default();
                    events.push(HarnessEvent::ToolResult { output });
                }
                "error" => {
                    events.push(HarnessEvent::Error {
                        message: item.text.unwrap_or_else(|| "item error".to_string()),
                    });
                }
                other => debug!(item_type = other, "ignoring codex item"),
            },
            CodexFrame::Error { message } => {
                events.push(HarnessEvent::Error {
                    message: message.unwrap_or_else(|| "unknown error".to_string()),
                });
            }
        }
        Ok(events)
    }
}

// ---------------------------------------------------------------------------
// Harness trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl Harness for CodexAdapter {
    fn kind(&self) -> HarnessKind {
        HarnessKind::Codex
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
        let args = self.build_args(&prompt, options, false);
        let output = process::run_captured(self.kind(), &self.binary_path, &args, options).await?;

        let text = output.stdout.trim().to_string();
        let usage = UsageSummary::estimate(&prompt, &output.stdout);
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
        let args = self.build_args(&prompt, options, true);
        process::spawn_streaming(
            self.kind(),
            &self.binary_path,
            &args,
            options,
            Box::new(CodexStreamDecoder),
            UsageFallback {
                prompt,
                estimate: true,
            },
        )
    }
}
