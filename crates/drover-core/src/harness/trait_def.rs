//! The `Harness` trait -- the adapter interface for agent CLIs.
//!
//! Each concrete backend (claude, codex, aider, opencode) implements this
//! trait. The trait is object-safe so the registry can hold
//! `Box<dyn Harness>` values.

use async_trait::async_trait;

use super::error::HarnessError;
use super::process;
use super::types::{Capabilities, EventStream, HarnessKind, InvocationOptions, InvocationResult};

/// Adapter interface for one agent backend.
///
/// Implementors translate a (system prompt, task prompt) pair into a
/// subprocess command line and normalize its output into
/// [`super::HarnessEvent`] values and a [`super::UsageSummary`].
///
/// # Object Safety
///
/// Every method returns a concrete type or a boxed stream, so
/// `Box<dyn Harness>` works.
#[async_trait]
pub trait Harness: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> HarnessKind;

    /// Binary that will be executed. A bare name is resolved on `$PATH`.
    fn binary(&self) -> &str;

    /// Canonical name, e.g. `"claude"`.
    fn name(&self) -> &str {
        self.kind().name()
    }

    /// Static capability set.
    fn capabilities(&self) -> Capabilities {
        self.kind().capabilities()
    }

    /// Whether the binary can be found.
    fn is_available(&self) -> bool {
        process::binary_available(self.binary())
    }

    /// Run the agent to completion and return its final text and usage.
    ///
    /// A non-zero exit is reported through
    /// [`InvocationResult::exit_code`], not as an error; use
    /// [`InvocationResult::ensure_success`] to turn it into one.
    async fn invoke(
        &self,
        system_prompt: &str,
        task_prompt: &str,
        options: &InvocationOptions,
    ) -> Result<InvocationResult, HarnessError>;

    /// Start the agent and return its event stream.
    ///
    /// The stream always ends with exactly one
    /// [`super::HarnessEvent::Completed`]. Dropping the stream early kills
    /// the subprocess.
    async fn invoke_streaming(
        &self,
        system_prompt: &str,
        task_prompt: &str,
        options: &InvocationOptions,
    ) -> Result<EventStream, HarnessError>;
}

// Compile-time assertion: Harness must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Harness) {}
};
