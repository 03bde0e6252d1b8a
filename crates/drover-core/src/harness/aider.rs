//! Aider harness adapter.
//!
//! Aider prints plain text and reports no usage, so token counts are
//! always estimated. It has no streaming mode: a streaming request runs
//! the synchronous path and replays the result as one text event.

use async_trait::async_trait;

use super::error::HarnessError;
use super::process;
use super::trait_def::Harness;
use super::types::{
    EventStream, HarnessEvent, HarnessKind, InvocationOptions, InvocationResult, UsageSummary,
};
use crate::prompt::combine_prompts;

/// Harness adapter for the `aider` CLI.
#[derive(Debug, Clone)]
pub struct AiderAdapter {
    binary_path: String,
}

impl AiderAdapter {
    /// Create an adapter that looks for `aider` on `$PATH`.
    pub fn new() -> Self {
        Self::with_binary(HarnessKind::Aider.default_binary())
    }

    /// Create an adapter with a custom binary path.
    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            binary_path: path.into(),
        }
    }

    fn build_args(&self, prompt: &str, options: &InvocationOptions) -> Vec<String> {
        let mut args = vec!["--message".to_string(), prompt.to_string()];
        if options.auto_mode {
            args.push("--yes-always".to_string());
        }
        args.push("--no-stream".to_string());
        if let Some(model) = &options.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args.extend(options.extra_args.iter().cloned());
        args
    }
}

impl Default for AiderAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Harness for AiderAdapter {
    fn kind(&self) -> HarnessKind {
        HarnessKind::Aider
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

        Ok(InvocationResult {
            harness: self.kind(),
            text: output.stdout.trim().to_string(),
            usage: UsageSummary::estimate(&prompt, &output.stdout),
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
        let result = self.invoke(system_prompt, task_prompt, options).await?;

        let mut events = Vec::with_capacity(3);
        if !result.text.is_empty() {
            events.push(HarnessEvent::Text {
                text: result.text.clone(),
            });
        }
        if !result.succeeded() && !result.stderr.trim().is_empty() {
            events.push(HarnessEvent::Error {
                message: result.stderr.trim().to_string(),
            });
        }
        events.push(HarnessEvent::Completed {
            exit_code: result.exit_code,
            usage: result.usage,
        });
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_put_prompt_in_message_flag() {
        let adapter = AiderAdapter::new();
        let options = InvocationOptions {
            model: Some("gpt-4o".into()),
            auto_mode: true,
            extra_args: vec!["--no-git".into()],
            ..InvocationOptions::default()
        };
        assert_eq!(
            adapter.build_args("PROMPT", &options),
            vec![
                "--message",
                "PROMPT",
                "--yes-always",
                "--no-stream",
                "--model",
                "gpt-4o",
                "--no-git"
            ]
        );
    }

    #[test]
    fn adapter_defaults() {
        let adapter = AiderAdapter::default();
        assert_eq!(adapter.binary(), "aider");
        assert_eq!(adapter.kind(), HarnessKind::Aider);
    }
}
