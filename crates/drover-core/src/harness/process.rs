//! Subprocess plumbing shared by every adapter: command construction,
//! captured runs, line-oriented streaming and `$PATH` lookup.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::error::HarnessError;
use super::types::{EventStream, HarnessEvent, HarnessKind, InvocationOptions, UsageSummary};

// ---------------------------------------------------------------------------
// Frame decoding
// ---------------------------------------------------------------------------

/// Turns one line of a backend's JSONL output into normalized events.
///
/// Decoders may keep state across lines. Usage is reported through
/// [`HarnessEvent::Usage`] events; the caller does the summing.
pub(crate) trait FrameDecoder: Send + 'static {
    /// Decode one non-empty line. An `Err` means the line was not a valid
    /// frame; the caller logs it and keeps reading.
    fn decode(&mut self, line: &str) -> Result<Vec<HarnessEvent>, HarnessError>;
}

/// What to do when a run produced no usage frames at all.
#[derive(Debug, Clone)]
pub(crate) struct UsageFallback {
    /// The prompt as it was sent, used for estimation.
    pub prompt: String,
    /// Estimate from character counts instead of reporting zero.
    pub estimate: bool,
}

/// Folds events into the running usage sum and collected text.
#[derive(Debug, Default)]
pub(crate) struct FrameAccumulator {
    usage: UsageSummary,
    saw_usage: bool,
    text: String,
}

impl FrameAccumulator {
    pub(crate) fn observe(&mut self, event: &HarnessEvent) {
        match event {
            HarnessEvent::Usage(delta) => {
                self.usage.add(delta);
                self.saw_usage = true;
            }
            HarnessEvent::Text { text } => {
                if !self.text.is_empty() {
                    self.text.push('\n');
                }
                self.text.push_str(text);
            }
            _ => {}
        }
    }

    pub(crate) fn text(&self) -> &str {
        &self.text
    }

    /// Final usage: the reported sum, or the fallback when nothing was
    /// reported.
    pub(crate) fn finish(self, kind: HarnessKind, fallback: &UsageFallback) -> UsageSummary {
        if self.saw_usage {
            return self.usage;
        }
        if fallback.estimate {
            debug!(harness = %kind, "no usage reported, estimating from character counts");
            return UsageSummary::estimate(&fallback.prompt, &self.text);
        }
        warn!(
            harness = %kind,
            error = %HarnessError::parse(kind, "no usage frames in output"),
            "recording zero usage"
        );
        UsageSummary::default()
    }
}

/// Decode every line of a fully captured stdout.
pub(crate) fn decode_captured(
    kind: HarnessKind,
    decoder: &mut dyn FrameDecoder,
    stdout: &str,
) -> (Vec<HarnessEvent>, FrameAccumulator) {
    let mut events = Vec::new();
    let mut acc = FrameAccumulator::default();
    for line in stdout.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match decoder.decode(trimmed) {
            Ok(decoded) => {
                for event in decoded {
                    acc.observe(&event);
                    events.push(event);
                }
            }
            Err(e) => warn!(harness = %kind, line = trimmed, error = %e, "skipping malformed frame"),
        }
    }
    (events, acc)
}

// ---------------------------------------------------------------------------
// Spawning
// ---------------------------------------------------------------------------

/// Output of a subprocess run to completion.
#[derive(Debug, Clone)]
pub(crate) struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

fn build_command(binary: &str, args: &[String], options: &InvocationOptions) -> Command {
    let mut cmd = Command::new(binary);
    cmd.args(args);
    if let Some(dir) = &options.working_dir {
        cmd.current_dir(dir);
    }
    // Merge into the inherited environment.
    for (key, value) in &options.env {
        cmd.env(key, value);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Run `binary args...` to completion, capturing both pipes.
pub(crate) async fn run_captured(
    kind: HarnessKind,
    binary: &str,
    args: &[String],
    options: &InvocationOptions,
) -> Result<CapturedOutput, HarnessError> {
    debug!(harness = %kind, binary, ?args, "spawning harness");
    let mut child = build_command(binary, args, options)
        .spawn()
        .map_err(|source| HarnessError::Spawn {
            harness: kind,
            binary: binary.to_string(),
            source,
        })?;

    // Read both pipes while waiting so a chatty child cannot fill a pipe
    // buffer and deadlock.
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let read_stdout = async {
        let mut buf = Vec::new();
        if let Some(ref mut pipe) = stdout_pipe {
            pipe.read_to_end(&mut buf).await.ok();
        }
        String::from_utf8_lossy(&buf).into_owned()
    };
    let read_stderr = async {
        let mut buf = Vec::new();
        if let Some(ref mut pipe) = stderr_pipe {
            pipe.read_to_end(&mut buf).await.ok();
        }
        String::from_utf8_lossy(&buf).into_owned()
    };

    let (status, stdout, stderr) = tokio::join!(child.wait(), read_stdout, read_stderr);
    let status = status.map_err(|source| HarnessError::Io {
        harness: kind,
        source,
    })?;

    debug!(harness = %kind, exit_code = ?status.code(), "harness exited");
    Ok(CapturedOutput {
        stdout,
        stderr,
        exit_code: status.code(),
    })
}

/// Spawn `binary args...` and stream decoded events from its stdout.
///
/// Malformed lines are skipped with a warning. After EOF the child is
/// reaped; a non-zero exit with stderr output yields an
/// [`HarnessEvent::Error`], and the stream always ends with
/// [`HarnessEvent::Completed`].
pub(crate) fn spawn_streaming(
    kind: HarnessKind,
    binary: &str,
    args: &[String],
    options: &InvocationOptions,
    mut decoder: Box<dyn FrameDecoder>,
    fallback: UsageFallback,
) -> Result<EventStream, HarnessError> {
    debug!(harness = %kind, binary, ?args, "spawning streaming harness");
    let mut child = build_command(binary, args, options)
        .spawn()
        .map_err(|source| HarnessError::Spawn {
            harness: kind,
            binary: binary.to_string(),
            source,
        })?;

    let stdout = child.stdout.take().ok_or_else(|| HarnessError::Io {
        harness: kind,
        source: std::io::Error::other("child stdout was not captured"),
    })?;
    let stderr = child.stderr.take();
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = stderr {
            pipe.read_to_end(&mut buf).await.ok();
        }
        String::from_utf8_lossy(&buf).into_owned()
    });

    let stream = async_stream::stream! {
        let mut lines = BufReader::new(stdout).lines();
        let mut acc = FrameAccumulator::default();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match decoder.decode(trimmed) {
                        Ok(events) => {
                            for event in events {
                                acc.observe(&event);
                                yield event;
                            }
                        }
                        Err(e) => {
                            warn!(harness = %kind, line = trimmed, error = %e, "skipping malformed frame");
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(harness = %kind, error = %e, "error reading harness stdout");
                    yield HarnessEvent::Error {
                        message: format!("stdout read error: {e}"),
                    };
                    break;
                }
            }
        }

        let exit_code = match child.wait().await {
            Ok(status) => status.code(),
            Err(e) => {
                warn!(harness = %kind, error = %e, "failed to reap harness process");
                None
            }
        };
        let stderr = stderr_task.await.unwrap_or_default();
        if exit_code != Some(0) && !stderr.trim().is_empty() {
            yield HarnessEvent::Error {
                message: stderr.trim().to_string(),
            };
        }

        let usage = acc.finish(kind, &fallback);
        debug!(harness = %kind, ?exit_code, tokens = usage.total_tokens(), "harness stream finished");
        yield HarnessEvent::Completed { exit_code, usage };
    };

    Ok(Box::pin(stream))
}

// ---------------------------------------------------------------------------
// Availability
// ---------------------------------------------------------------------------

/// Whether `binary` refers to an existing file, either directly (when it
/// contains a path separator) or via `$PATH`.
pub fn binary_available(binary: &str) -> bool {
    if binary.is_empty() {
        return false;
    }
    if binary.contains(std::path::MAIN_SEPARATOR) {
        return Path::new(binary).is_file();
    }
    find_in_path(binary).is_some()
}

/// First `$PATH` entry containing `binary`.
pub fn find_in_path(binary: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for segment in std::env::split_paths(&path_var) {
        let candidate = segment.join(binary);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Decoder that treats every line as text, or a usage frame when the
    /// line is a bare number.
    struct LineDecoder;

    impl FrameDecoder for LineDecoder {
        fn decode(&mut self, line: &str) -> Result<Vec<HarnessEvent>, HarnessError> {
            if line.starts_with('!') {
                return Err(HarnessError::parse(HarnessKind::Codex, "bang line"));
            }
            if let Ok(n) = line.parse::<u64>() {
                return Ok(vec![HarnessEvent::Usage(UsageSummary {
                    output_tokens: n,
                    ..UsageSummary::default()
                })]);
            }
            Ok(vec![HarnessEvent::Text {
                text: line.to_string(),
            }])
        }
    }

    fn fallback(estimate: bool) -> UsageFallback {
        UsageFallback {
            prompt: "x".repeat(40),
            estimate,
        }
    }

    #[test]
    fn accumulator_prefers_reported_usage() {
        let (events, acc) = decode_captured(HarnessKind::Codex, &mut LineDecoder, "hi\n5\n\n!bad\n7\n");
        assert_eq!(events.len(), 3);
        assert_eq!(acc.text(), "hi");
        let usage = acc.finish(HarnessKind::Codex, &fallback(true));
        assert_eq!(usage.output_tokens, 12);
        assert!(!usage.estimated);
    }

    #[test]
    fn accumulator_estimates_when_silent() {
        let (_, acc) = decode_captured(HarnessKind::Codex, &mut LineDecoder, "abcdefgh\n");
        let usage = acc.finish(HarnessKind::Codex, &fallback(true));
        assert!(usage.estimated);
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.output_tokens, 2);
    }

    #[test]
    fn accumulator_reports_zero_without_fallback() {
        let (_, acc) = decode_captured(HarnessKind::Claude, &mut LineDecoder, "text only\n");
        let usage = acc.finish(HarnessKind::Claude, &fallback(false));
        assert_eq!(usage, UsageSummary::default());
    }

    #[test]
    fn binary_available_checks_paths_and_path_var() {
        assert!(!binary_available(""));
        assert!(!binary_available("/definitely/not/here/drover-harness"));
        assert!(binary_available("sh"));

        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("tool");
        std::fs::write(&file, "#!/bin/sh\n").unwrap();
        assert!(binary_available(file.to_str().unwrap()));
    }

    #[tokio::test]
    async fn run_captured_reports_spawn_failure() {
        let err = run_captured(
            HarnessKind::Aider,
            "/nonexistent/path/to/aider",
            &[],
            &InvocationOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HarnessError::Spawn { .. }));
        assert!(err.to_string().contains("is it installed and on PATH"));
    }

    #[tokio::test]
    async fn spawn_streaming_ends_with_completed() {
        use futures::StreamExt;

        let args = vec!["-c".to_string(), "echo one; echo 3; echo oops >&2; exit 4".to_string()];
        let stream = spawn_streaming(
            HarnessKind::Codex,
            "sh",
            &args,
            &InvocationOptions::default(),
            Box::new(LineDecoder),
            fallback(true),
        )
        .unwrap();
        let events: Vec<HarnessEvent> = stream.collect().await;

        assert_eq!(events[0], HarnessEvent::Text { text: "one".into() });
        assert!(events.contains(&HarnessEvent::Error {
            message: "oops".into()
        }));
        match events.last().unwrap() {
            HarnessEvent::Completed { exit_code, usage } => {
                assert_eq!(*exit_code, Some(4));
                assert_eq!(usage.output_tokens, 3);
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }
}
