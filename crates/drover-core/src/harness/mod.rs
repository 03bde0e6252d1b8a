//! Harness adapter interface for coding-agent CLIs.
//!
//! This module defines the [`Harness`] trait that all backend adapters
//! implement, the normalized [`HarnessEvent`] stream, usage accounting
//! ([`UsageSummary`]) and the [`HarnessRegistry`] used for selection.
//!
//! # Architecture
//!
//! ```text
//! Run loop
//!     |
//!     v
//! HarnessRegistry --select(policy)--> &dyn Harness
//!                                         |
//!        invoke(system, task, opts) ------+------ invoke_streaming(...)
//!                 |                                       |
//!                 v                                       v
//!         InvocationResult                     Stream<HarnessEvent>
//!      { text, usage, exit_code }          ... Usage ... Completed
//! ```

pub mod aider;
pub mod claude;
pub mod codex;
pub mod error;
pub mod opencode;
mod process;
pub mod registry;
pub mod trait_def;
pub mod types;

pub use aider::AiderAdapter;
pub use claude::ClaudeAdapter;
pub use codex::CodexAdapter;
pub use error::HarnessError;
pub use opencode::OpenCodeAdapter;
pub use process::{binary_available, find_in_path};
pub use registry::{HarnessAvailability, HarnessRegistry, SelectionPolicy};
pub use trait_def::Harness;
pub use types::{
    Capabilities, Capability, EventStream, HarnessEvent, HarnessKind, InvocationOptions,
    InvocationResult, UsageSummary,
};
