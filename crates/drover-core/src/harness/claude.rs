//! Claude harness adapter.
//!
//! Synchronous runs use `claude -p <task> --output-format json`, which
//! prints one result object. Streaming runs use `--output-format
//! stream-json --verbose` and parse each JSONL frame into
//! [`HarnessEvent`] values. The system prompt is passed separately via
//! `--append-system-prompt`.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::error::HarnessError;
use super::process::{self, FrameDecoder, UsageFallback};
use super::trait_def::Harness;
use super::types::{
    EventStream, HarnessEvent, HarnessKind, InvocationOptions, InvocationResult, UsageSummary,
    null_as_default,
};
use crate::prompt::combine_prompts;

/// Harness adapter for the `claude` CLI.
#[derive(Clone)]
pub struct ClaudeAdapter {
    /// Path to the `claude` binary. Defaults to `"claude"` (found via `$PATH`).
    binary_path: String,
}

impl std::fmt::Debug for ClaudeAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeAdapter")
            .field("binary_path", &self.binary_path)
            .finish()
    }
}

impl ClaudeAdapter {
    /// Create an adapter that looks for `claude` on `$PATH`.
    pub fn new() -> Self {
        Self::with_binary(HarnessKind::Claude.default_binary())
    }

    /// Create an adapter with a custom binary path.
    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            binary_path: path.into(),
        }
    }

    fn build_args(
        &self,
        system_prompt: &str,
        task_prompt: &str,
        options: &InvocationOptions,
        streaming: bool,
    ) -> Vec<String> {
        let mut args = vec!["-p".to_string(), task_prompt.to_string()];
        args.push("--output-format".to_string());
        if streaming {
            args.push("stream-json".to_string());
            args.push("--verbose".to_string());
        } else {
            args.push("json".to_string());
        }
        if !system_prompt.is_empty() {
            args.push("--append-system-prompt".to_string());
            args.push(system_prompt.to_string());
        }
        if let Some(model) = &options.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if options.auto_mode {
            args.push("--dangerously-skip-permissions".to_string());
        }
        args.extend(options.extra_args.iter().cloned());
        args
    }
}

impl Default for ClaudeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct ClaudeUsage {
    #[serde(default, deserialize_with = "null_as_default")]
    input_tokens: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    output_tokens: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    cache_read_input_tokens: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    cache_creation_input_tokens: u64,
}

impl From<&ClaudeUsage> for UsageSummary {
    fn from(u: &ClaudeUsage) -> Self {
        Self {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            cache_read_tokens: u.cache_read_input_tokens,
            cache_creation_tokens: u.cache_creation_input_tokens,
            ..Self::default()
        }
    }
}

/// The single object printed by `--output-format json`.
#[derive(Debug, Deserialize)]
struct ResultObject {
    result: Option<String>,
    content: Option<String>,
    usage: Option<ClaudeUsage>,
    cost_usd: Option<f64>,
    total_cost_usd: Option<f64>,
}

impl ResultObject {
    fn cost(&self) -> Option<f64> {
        self.cost_usd.or(self.total_cost_usd)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
    },
    ToolResult {
        #[serde(default)]
        content: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct MessageBody {
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<ClaudeUsage>,
}

#[derive(Debug, Deserialize)]
struct MessageFrame {
    message: Option<MessageBody>,
    usage: Option<ClaudeUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// One line of `--output-format stream-json`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamFrame {
    Assistant(MessageFrame),
    Message(MessageFrame),
    User(MessageFrame),
    ContentBlockStart {
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        delta: Delta,
    },
    Result {
        result: Option<String>,
        cost_usd: Option<f64>,
        total_cost_usd: Option<f64>,
    },
    System {
        subtype: Option<String>,
        message: Option<String>,
    },
    Error {
        error: Option<ErrorBody>,
        message: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// Render a tool result payload as text.
fn tool_output(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Stream decoding
// ---------------------------------------------------------------------------

/// Stateful decoder for Claude's stream-json frames.
///
/// Partial frames (`content_block_*`) and whole `assistant` messages can
/// both carry the same text. Once partial frames have been seen, message
/// content blocks are not re-emitted. The `result` text is emitted only
/// when no text arrived before it.
#[derive(Debug, Default)]
pub(crate) struct ClaudeStreamDecoder {
    saw_partial: bool,
    emitted_text: bool,
}

impl ClaudeStreamDecoder {
    fn message_events(&mut self, frame: MessageFrame, events: &mut Vec<HarnessEvent>) {
        let MessageFrame { message, usage } = frame;
        let body = message.unwrap_or_default();

        if !self.saw_partial {
            for block in body.content {
                match block {
                    ContentBlock::Text { text } => {
                        self.emitted_text = true;
                        events.push(HarnessEvent::Text { text });
                    }
                    ContentBlock::ToolUse { name } => {
                        events.push(HarnessEvent::ToolStarted { name });
                    }
                    ContentBlock::ToolResult { content } => {
                        events.push(HarnessEvent::ToolResult {
                            output: tool_output(&content),
                        });
                    }
                    ContentBlock::Other => {}
                }
            }
        }

        if let Some(usage) = usage.as_ref().or(body.usage.as_ref()) {
            events.push(HarnessEvent::Usage(usage.into()));
        }
    }
}

impl FrameDecoder for ClaudeStreamDecoder {
    fn decode(&mut self, line: &str) -> Result<Vec<HarnessEvent>, HarnessError> {
        let frame: StreamFrame =
            serde_json::from_str(line).map_err(|e| HarnessError::parse(HarnessKind::Claude, e))?;

        let mut events = Vec::new();
        match frame {
            StreamFrame::Assistant(frame) | StreamFrame::Message(frame) => {
                self.message_events(frame, &mut events);
            }
            StreamFrame::User(frame) => {
                for block in frame.message.unwrap_or_default().content {
                    if let ContentBlock::ToolResult { content } = block {
                        events.push(HarnessEvent::ToolResult {
                            output: tool_output(&content),
                        });
                    }
                }
            }
            StreamFrame::ContentBlockStart { content_block } => {
                self.saw_partial = true;
                match content_block {
                    ContentBlock::ToolUse { name } => events.push(HarnessEvent::ToolStarted { name }),
                    ContentBlock::Text { text } if !text.is_empty() => {
                        self.emitted_text = true;
                        events.push(HarnessEvent::Text { text });
                    }
                    _ => {}
                }
            }
            StreamFrame::ContentBlockDelta { delta } => {
                self.saw_partial = true;
                if let Delta::TextDelta { text } = delta {
                    self.emitted_text = true;
                    events.push(HarnessEvent::Text { text });
                }
            }
            StreamFrame::Result {
                result,
                cost_usd,
                total_cost_usd,
            } => {
                if let Some(text) = result.filter(|_| !self.emitted_text) {
                    self.emitted_text = true;
                    events.push(HarnessEvent::Text { text });
                }
                if let Some(cost) = cost_usd.or(total_cost_usd) {
                    events.push(HarnessEvent::Usage(UsageSummary {
                        cost_usd: Some(cost),
                        ..UsageSummary::default()
                    }));
                }
            }
            StreamFrame::System { subtype, message } => {
                if let Some(message) = message.or(subtype) {
                    events.push(HarnessEvent::System { message });
                }
            }
            StreamFrame::Error { error, message } => {
                let message = error
                    .and_then(|e| e.message)
                    .or(message)
                    .unwrap_or_else(|| "unknown error".to_string());
                events.push(HarnessEvent::Error { message });
            }
            StreamFrame::Unknown => {
                debug!("ignoring unrecognised stream-json frame type");
            }
        }
        Ok(events)
    }
}

/// Parse the single result object printed by `--output-format json`.
///
/// Returns the final text and usage. A missing `usage` yields zero counts.
pub(crate) fn parse_result_object(stdout: &str) -> Result<(String, UsageSummary), HarnessError> {
    let object: ResultObject = serde_json::from_str(stdout.trim())
        .map_err(|e| HarnessError::parse(HarnessKind::Claude, e))?;

    let mut usage = object
        .usage
        .as_ref()
        .map(UsageSummary::from)
        .unwrap_or_default();
    usage.cost_usd = object.cost();

    let text = object.result.or(object.content).unwrap_or_default();
    Ok((text, usage))
}

// ---------------------------------------------------------------------------
// Harness trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl Harness for ClaudeAdapter {
    fn kind(&self) -> HarnessKind {
        HarnessKind::Claude
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
        let args = self.build_args(system_prompt, task_prompt, options, false);
        let output = process::run_captured(self.kind(), &self.binary_path, &args, options).await?;

        let (text, usage) = match parse_result_object(&output.stdout) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "claude result object unreadable, recording zero usage");
                (output.stdout.trim().to_string(), UsageSummary::default())
            }
        };

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
        let args = self.build_args(system_prompt, task_prompt, options, true);
        process::spawn_streaming(
            self.kind(),
            &self.binary_path,
            &args,
            options,
            Box::new(ClaudeStreamDecoder::default()),
            UsageFallback {
                prompt: combine_prompts(system_prompt, task_prompt),
                estimate: false,
            },
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(line: &str) -> Vec<HarnessEvent> {
        ClaudeStreamDecoder::default().decode(line).unwrap()
    }

    #[test]
    fn parse_result_object_with_usage_and_cost() {
        let (text, usage) = parse_result_object(
            r#"{"result":"Done.","usage":{"input_tokens":1200,"output_tokens":340,"cache_read_input_tokens":50,"cache_creation_input_tokens":7},"cost_usd":0.0123}"#,
        )
        .unwrap();
        assert_eq!(text, "Done.");
        assert_eq!(usage.input_tokens, 1200);
        assert_eq!(usage.output_tokens, 340);
        assert_eq!(usage.cache_read_tokens, 50);
        assert_eq!(usage.cache_creation_tokens, 7);
        assert_eq!(usage.cost_usd, Some(0.0123));
        assert!(!usage.estimated);
    }

    #[test]
    fn parse_result_object_without_usage_is_zero() {
        let (text, usage) = parse_result_object(r#"{"content":"ok"}"#).unwrap();
        assert_eq!(text, "ok");
        assert_eq!(usage, UsageSummary::default());
    }

    #[test]
    fn parse_result_object_accepts_total_cost() {
        let (_, usage) = parse_result_object(r#"{"result":"x","total_cost_usd":1.5}"#).unwrap();
        assert_eq!(usage.cost_usd, Some(1.5));
    }

    #[test]
    fn parse_result_object_rejects_garbage() {
        let err = parse_result_object("not json").unwrap_err();
        assert!(matches!(
            err,
            HarnessError::ParseDegradation {
                harness: HarnessKind::Claude,
                ..
            }
        ));
    }

    #[test]
    fn assistant_frame_emits_text_tool_and_usage() {
        let events = decode(
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Looking"},{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"ls"}}],"usage":{"input_tokens":10,"output_tokens":100}}}"#,
        );
        assert_eq!(
            events,
            vec![
                HarnessEvent::Text {
                    text: "Looking".into()
                },
                HarnessEvent::ToolStarted {
                    name: "Bash".into()
                },
                HarnessEvent::Usage(UsageSummary {
                    input_tokens: 10,
                    output_tokens: 100,
                    ..UsageSummary::default()
                }),
            ]
        );
    }

    #[test]
    fn message_frame_reads_top_level_usage() {
        let events = decode(r#"{"type":"message","usage":{"input_tokens":20,"output_tokens":50}}"#);
        assert_eq!(
            events,
            vec![HarnessEvent::Usage(UsageSummary {
                input_tokens: 20,
                output_tokens: 50,
                ..UsageSummary::default()
            })]
        );
    }

    #[test]
    fn null_usage_counter_keeps_the_rest_of_the_frame() {
        let events = decode(
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hi"}],"usage":{"input_tokens":5,"output_tokens":25,"cache_creation_input_tokens":null}}}"#,
        );
        assert_eq!(
            events,
            vec![
                HarnessEvent::Text { text: "hi".into() },
                HarnessEvent::Usage(UsageSummary {
                    input_tokens: 5,
                    output_tokens: 25,
                    ..UsageSummary::default()
                }),
            ]
        );

        let (_, usage) =
            parse_result_object(r#"{"result":"x","usage":{"input_tokens":3,"output_tokens":null}}"#)
                .unwrap();
        assert_eq!(usage.input_tokens, 3);
        assert_eq!(usage.output_tokens, 0);
    }

    #[test]
    fn user_frame_emits_tool_results() {
        let events = decode(
            r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"t1","content":"file.rs"}]}}"#,
        );
        assert_eq!(
            events,
            vec![HarnessEvent::ToolResult {
                output: "file.rs".into()
            }]
        );
    }

    #[test]
    fn partial_frames_suppress_duplicate_message_text() {
        let mut decoder = ClaudeStreamDecoder::default();
        let first = decoder
            .decode(r#"{"type":"content_block_start","content_block":{"type":"text","text":""}}"#)
            .unwrap();
        assert!(first.is_empty());
        let delta = decoder
            .decode(r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"Hel"}}"#)
            .unwrap();
        assert_eq!(delta, vec![HarnessEvent::Text { text: "Hel".into() }]);

        let message = decoder
            .decode(r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Hello"}],"usage":{"input_tokens":1,"output_tokens":2}}}"#)
            .unwrap();
        assert_eq!(message.len(), 1);
        assert!(matches!(message[0], HarnessEvent::Usage(_)));
    }

    #[test]
    fn result_text_only_when_nothing_emitted() {
        let mut decoder = ClaudeStreamDecoder::default();
        let events = decoder
            .decode(r#"{"type":"result","result":"Final","cost_usd":0.02}"#)
            .unwrap();
        assert_eq!(
            events,
            vec![
                HarnessEvent::Text {
                    text: "Final".into()
                },
                HarnessEvent::Usage(UsageSummary {
                    cost_usd: Some(0.02),
                    ..UsageSummary::default()
                }),
            ]
        );

        let mut decoder = ClaudeStreamDecoder::default();
        decoder
            .decode(r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Final"}]}}"#)
            .unwrap();
        let events = decoder.decode(r#"{"type":"result","result":"Final"}"#).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn error_and_system_frames() {
        assert_eq!(
            decode(r#"{"type":"error","error":{"message":"rate limit exceeded"}}"#),
            vec![HarnessEvent::Error {
                message: "rate limit exceeded".into()
            }]
        );
        assert_eq!(
            decode(r#"{"type":"error","message":"something broke"}"#),
            vec![HarnessEvent::Error {
                message: "something broke".into()
            }]
        );
        assert_eq!(
            decode(r#"{"type":"system","subtype":"init","session_id":"s"}"#),
            vec![HarnessEvent::System {
                message: "init".into()
            }]
        );
    }

    #[test]
    fn unknown_frame_is_ignored_and_garbage_is_error() {
        assert!(decode(r#"{"type":"ping"}"#).is_empty());
        assert!(ClaudeStreamDecoder::default().decode("{{nope").is_err());
    }

    #[test]
    fn args_put_task_after_print_flag_and_system_separately() {
        let adapter = ClaudeAdapter::new();
        let options = InvocationOptions {
            model: Some("sonnet".into()),
            auto_mode: true,
            extra_args: vec!["--max-turns".into(), "5".into()],
            ..InvocationOptions::default()
        };
        let args = adapter.build_args("SYS", "TASK", &options, true);
        assert_eq!(
            args,
            vec![
                "-p",
                "TASK",
                "--output-format",
                "stream-json",
                "--verbose",
                "--append-system-prompt",
                "SYS",
                "--model",
                "sonnet",
                "--dangerously-skip-permissions",
                "--max-turns",
                "5",
            ]
        );

        let args = adapter.build_args("", "TASK", &InvocationOptions::default(), false);
        assert_eq!(args, vec!["-p", "TASK", "--output-format", "json"]);
    }

    #[test]
    fn adapter_defaults() {
        let adapter = ClaudeAdapter::default();
        assert_eq!(adapter.binary(), "claude");
        assert_eq!(adapter.name(), "claude");
        assert!(format!("{adapter:?}").contains("ClaudeAdapter"));
    }
}
