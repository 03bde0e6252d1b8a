//! Task data model and the task-store contract consumed by `drover-core`.
//!
//! The store is the single owner of task status. Everything in the core
//! reads through [`TaskStore`] and requests transitions through
//! [`TaskStore::update_status`].

pub mod file;
pub mod memory;
pub mod models;
pub mod store;

pub use file::JsonFileTaskStore;
pub use memory::MemoryTaskStore;
pub use models::{Priority, Task, TaskKind, TaskStatus};
pub use store::{StoreError, StoreResult, TaskFilter, TaskStore};
