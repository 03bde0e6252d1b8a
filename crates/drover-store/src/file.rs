//! Task store backed by a JSON file holding an array of tasks.
//!
//! The file is re-read on every call so that edits made by other tools
//! between two decisions are always observed.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::models::{Task, TaskStatus};
use crate::store::{StoreError, StoreResult, TaskFilter, TaskStore, apply_transition};

/// JSON-file task store.
#[derive(Debug, Clone)]
pub struct JsonFileTaskStore {
    path: PathBuf,
}

impl JsonFileTaskStore {
    /// Default location relative to a project root.
    pub const DEFAULT_PATH: &str = ".drover/tasks.json";

    /// Use the file at `path`. A missing file reads as an empty backlog.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the whole backlog with `tasks`.
    pub async fn save_all(&self, tasks: &[Task]) -> StoreResult<()> {
        let mut seen = std::collections::HashSet::new();
        for task in tasks {
            if !seen.insert(task.id.as_str()) {
                return Err(StoreError::Duplicate(task.id.clone()));
            }
        }
        self.write(tasks).await
    }

    async fn read(&self) -> StoreResult<Vec<Task>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&contents).map_err(|source| StoreError::Format {
            path: self.path.clone(),
            source,
        })
    }

    /// Write via a sibling temp file and rename, so readers never see a
    /// half-written backlog.
    async fn write(&self, tasks: &[Task]) -> StoreResult<()> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let body = serde_json::to_string_pretty(tasks).map_err(|source| StoreError::Format {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for JsonFileTaskStore {
    async fn get_task(&self, id: &str) -> StoreResult<Option<Task>> {
        Ok(self.read().await?.into_iter().find(|t| t.id == id))
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>> {
        Ok(self
            .read()
            .await?
            .into_iter()
            .filter(|t| filter.matches(t))
            .collect())
    }

    async fn update_status(&self, id: &str, status: TaskStatus) -> StoreResult<()> {
        let mut tasks = self.read().await?;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let before = task.status;
        apply_transition(task, status)?;
        if before == status {
            return Ok(());
        }
        self.write(&tasks).await
    }
}
