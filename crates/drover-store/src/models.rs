use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Closed,
}

impl TaskStatus {
    /// Check whether `self -> to` is an edge of the status graph.
    ///
    /// ```text
    /// open        -> in_progress
    /// open        -> closed       (gate approval)
    /// in_progress -> closed
    /// in_progress -> open         (attempt abandoned)
    /// closed      -> open         (reopen)
    /// ```
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        matches!(
            (self, to),
            (Self::Open, Self::InProgress)
                | (Self::Open, Self::Closed)
                | (Self::InProgress, Self::Closed)
                | (Self::InProgress, Self::Open)
                | (Self::Closed, Self::Open)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "in_progress" => Ok(Self::InProgress),
            "closed" => Ok(Self::Closed),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid task status: {0:?}")]
pub struct TaskStatusParseError(pub String);

// ---------------------------------------------------------------------------

/// What a task is. The three gate kinds mark approval gates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    #[default]
    Task,
    Feature,
    Bugfix,
    Epic,
    Gate,
    Checkpoint,
    Review,
}

impl TaskKind {
    /// Whether this kind is an approval gate (`gate`, `checkpoint`, `review`).
    pub fn is_gate(self) -> bool {
        matches!(self, Self::Gate | Self::Checkpoint | Self::Review)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Task => "task",
            Self::Feature => "feature",
            Self::Bugfix => "bugfix",
            Self::Epic => "epic",
            Self::Gate => "gate",
            Self::Checkpoint => "checkpoint",
            Self::Review => "review",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskKind {
    type Err = TaskKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(Self::Task),
            "feature" => Ok(Self::Feature),
            "bugfix" => Ok(Self::Bugfix),
            "epic" => Ok(Self::Epic),
            "gate" => Ok(Self::Gate),
            "checkpoint" => Ok(Self::Checkpoint),
            "review" => Ok(Self::Review),
            other => Err(TaskKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskKind`] string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid task kind: {0:?}")]
pub struct TaskKindParseError(pub String);

// ---------------------------------------------------------------------------

/// Task priority. `P0` is the most urgent; ordering follows urgency so a
/// plain ascending sort puts `P0` first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Priority {
    P0,
    P1,
    #[default]
    P2,
    P3,
    P4,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
            Self::P4 => "P4",
        };
        f.write_str(s)
    }
}

impl FromStr for Priority {
    type Err = PriorityParseError;

    /// Accepts `P0`..`P4` (either case) or a bare digit `0`..`4`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix('P')
            .or_else(|| s.strip_prefix('p'))
            .unwrap_or(s);
        match digits {
            "0" => Ok(Self::P0),
            "1" => Ok(Self::P1),
            "2" => Ok(Self::P2),
            "3" => Ok(Self::P3),
            "4" => Ok(Self::P4),
            _ => Err(PriorityParseError(s.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Priority`] string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid priority: {0:?}")]
pub struct PriorityParseError(pub String);

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A unit of backlog work, or an approval gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(rename = "type", default)]
    pub kind: TaskKind,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    /// Direct dependencies, in declared order.
    #[serde(default, rename = "dependsOn", alias = "depends_on")]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    /// Parent epic id, if the task belongs to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Task {
    /// Create an open task of kind `task` at default priority.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            kind: TaskKind::Task,
            status: TaskStatus::Open,
            priority: Priority::default(),
            depends_on: Vec::new(),
            labels: BTreeSet::new(),
            epic: None,
            description: None,
        }
    }

    pub fn with_kind(mut self, kind: TaskKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    pub fn in_epic(mut self, epic: impl Into<String>) -> Self {
        self.epic = Some(epic.into());
        self
    }

    /// Whether this task is an approval gate.
    pub fn is_gate(&self) -> bool {
        self.kind.is_gate()
    }
}
