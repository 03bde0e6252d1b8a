//! Git state gate: verifies the repository is fully committed after a
//! harness run.
//!
//! "Clean" means no unstaged changes against HEAD, no staged changes and
//! no untracked files that are not ignored. All three are reported by a
//! single `git status --porcelain` call.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// What a dirty tree means for the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitPolicy {
    /// A dirty tree stops the run.
    #[default]
    Required,
    /// A dirty tree is logged and ignored.
    Advisory,
}

impl fmt::Display for GitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => f.write_str("required"),
            Self::Advisory => f.write_str("advisory"),
        }
    }
}

impl FromStr for GitPolicy {
    type Err = GitStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "required" => Ok(Self::Required),
            "advisory" => Ok(Self::Advisory),
            other => Err(GitStateError::UnknownPolicy(other.to_string())),
        }
    }
}

/// Errors from git state checks.
#[derive(Debug, Error)]
pub enum GitStateError {
    /// A check was made before [`GitStateGate::init`].
    #[error("git state gate used before init; no repository configured")]
    NotInitialized,

    #[error("not a git repository: {0}")]
    NotAGitRepo(PathBuf),

    /// A git command failed to execute.
    #[error("git command failed: {message}")]
    GitCommand {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// A git command exited with a non-zero status.
    #[error("git {command} failed (exit {code}): {stderr}")]
    GitExit {
        command: String,
        code: i32,
        stderr: String,
    },

    /// The tree has uncommitted changes and the policy is `required`.
    #[error("repository has uncommitted changes: {}", .paths.join(", "))]
    Dirty { paths: Vec<String> },

    #[error("unknown git policy {0:?} (expected \"required\" or \"advisory\")")]
    UnknownPolicy(String),
}

/// Checks the working tree of one repository.
#[derive(Debug, Clone, Default)]
pub struct GitStateGate {
    repo_path: Option<PathBuf>,
}

impl GitStateGate {
    /// An uninitialised gate. Every check fails until [`Self::init`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience for `new` followed by `init`.
    pub fn open(repo_path: impl Into<PathBuf>) -> Result<Self, GitStateError> {
        let mut gate = Self::new();
        gate.init(repo_path)?;
        Ok(gate)
    }

    /// Point the gate at `repo_path`, which must be inside a git work tree.
    pub fn init(&mut self, repo_path: impl Into<PathBuf>) -> Result<(), GitStateError> {
        let repo_path = repo_path.into();
        let output = Command::new("git")
            .args(["rev-parse", "--git-dir"])
            .current_dir(&repo_path)
            .output()
            .map_err(|e| GitStateError::GitCommand {
                message: "failed to run git rev-parse".into(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(GitStateError::NotAGitRepo(repo_path));
        }

        debug!(repo = %repo_path.display(), "git state gate initialised");
        self.repo_path = Some(repo_path);
        Ok(())
    }

    /// The configured repository, if initialised.
    pub fn repo_path(&self) -> Option<&Path> {
        self.repo_path.as_deref()
    }

    /// Paths with staged, unstaged or untracked changes.
    pub fn changed_paths(&self) -> Result<Vec<String>, GitStateError> {
        let repo = self.repo_path.as_ref().ok_or(GitStateError::NotInitialized)?;
        let output = Command::new("git")
            .args(["status", "--porcelain", "--untracked-files=all"])
            .current_dir(repo)
            .output()
            .map_err(|e| GitStateError::GitCommand {
                message: "failed to run git status".into(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(GitStateError::GitExit {
                command: "status".into(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        Ok(parse_porcelain_paths(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Whether the tree has no changes of any kind.
    pub fn is_clean(&self) -> Result<bool, GitStateError> {
        Ok(self.changed_paths()?.is_empty())
    }

    /// Check the tree under `policy`.
    ///
    /// Returns the changed paths (empty when clean). Under
    /// [`GitPolicy::Required`] a dirty tree is an error; under
    /// [`GitPolicy::Advisory`] it is logged and returned.
    pub fn ensure_clean(&self, policy: GitPolicy) -> Result<Vec<String>, GitStateError> {
        let paths = self.changed_paths()?;
        if paths.is_empty() {
            return Ok(paths);
        }
        match policy {
            GitPolicy::Required => Err(GitStateError::Dirty { paths }),
            GitPolicy::Advisory => {
                warn!(count = paths.len(), ?paths, "repository has uncommitted changes (advisory)");
                Ok(paths)
            }
        }
    }
}

/// Extract paths from `git status --porcelain` (v1) output.
///
/// Each line is `XY <path>` or, for renames and copies,
/// `XY <orig> -> <path>`; the destination path is reported.
pub fn parse_porcelain_paths(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.len() > 3)
        .map(|line| {
            let entry = &line[3..];
            let path = entry.rsplit(" -> ").next().unwrap_or(entry);
            unquote(path).to_string()
        })
        .collect()
}

fn unquote(path: &str) -> &str {
    path.strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_status_lines() {
        let output = " M src/lib.rs\nA  new.rs\n?? notes/todo.md\nR  old.rs -> renamed.rs\n D gone.rs\n?? \"with space.txt\"\n";
        assert_eq!(
            parse_porcelain_paths(output),
            vec![
                "src/lib.rs",
                "new.rs",
                "notes/todo.md",
                "renamed.rs",
                "gone.rs",
                "with space.txt"
            ]
        );
    }

    #[test]
    fn parse_empty_output() {
        assert!(parse_porcelain_paths("").is_empty());
        assert!(parse_porcelain_paths("\n").is_empty());
    }

    #[test]
    fn uninitialised_gate_fails() {
        let gate = GitStateGate::new();
        assert!(matches!(gate.is_clean(), Err(GitStateError::NotInitialized)));
        assert!(matches!(
            gate.ensure_clean(GitPolicy::Advisory),
            Err(GitStateError::NotInitialized)
        ));
        assert!(gate.repo_path().is_none());
    }

    #[test]
    fn init_rejects_non_repo() {
        let tmp = tempfile::tempdir().unwrap();
        let err = GitStateGate::open(tmp.path()).unwrap_err();
        assert!(matches!(err, GitStateError::NotAGitRepo(_)));
    }

    #[test]
    fn policy_round_trips_through_strings() {
        assert_eq!("Advisory".parse::<GitPolicy>().unwrap(), GitPolicy::Advisory);
        assert_eq!(GitPolicy::default(), GitPolicy::Required);
        assert_eq!(GitPolicy::Required.to_string(), "required");
        assert!(matches!(
            "strict".parse::<GitPolicy>(),
            Err(GitStateError::UnknownPolicy(_))
        ));
    }

    #[test]
    fn dirty_error_lists_paths() {
        let err = GitStateError::Dirty {
            paths: vec!["a.rs".into(), "b.rs".into()],
        };
        assert_eq!(err.to_string(), "repository has uncommitted changes: a.rs, b.rs");
    }
}
