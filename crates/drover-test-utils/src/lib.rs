//! Shared helpers for drover integration tests.
//!
//! Temporary git repositories, fake harness executables and on-disk
//! backlogs. Everything here panics on failure; it is only ever called
//! from tests.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use drover_store::Task;
use tempfile::TempDir;

/// Run `git` in `repo` and assert it succeeded.
pub fn git(repo: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .unwrap_or_else(|e| panic!("failed to run git {args:?}: {e}"));
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Create a temporary git repository with an initial commit.
/// Returns the TempDir (must be held alive) and the repo path.
pub fn create_temp_repo() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let repo_path = dir.path().to_path_buf();

    git(&repo_path, &["init", "--quiet"]);
    git(&repo_path, &["config", "user.email", "test@drover.dev"]);
    git(&repo_path, &["config", "user.name", "Drover Test"]);
    git(&repo_path, &["config", "commit.gpgsign", "false"]);

    // Create an initial commit so HEAD exists.
    std::fs::write(repo_path.join("README.md"), "# Test repo\n").expect("failed to write README");
    commit_all(&repo_path, "Initial commit");

    (dir, repo_path)
}

/// Stage everything in `repo` and commit it.
pub fn commit_all(repo: &Path, message: &str) {
    git(repo, &["add", "--all"]);
    git(repo, &["commit", "--quiet", "-m", message]);
}

/// Write an executable shell script named `name` into `dir`.
///
/// `body` is the script without the shebang line. Returns the script path,
/// suitable for an adapter's `with_binary`.
pub fn write_fake_harness(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("failed to write fake harness");
    let mut perms = std::fs::metadata(&path)
        .expect("failed to stat fake harness")
        .permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("failed to chmod fake harness");
    path
}

/// Write `tasks` as a JSON backlog at `path`, creating parent directories.
pub fn write_backlog(path: &Path, tasks: &[Task]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("failed to create backlog dir");
    }
    let json = serde_json::to_string_pretty(tasks).expect("failed to serialise backlog");
    std::fs::write(path, json).expect("failed to write backlog");
}

/// Read the backlog at `path`.
pub fn read_backlog(path: &Path) -> Vec<Task> {
    let text = std::fs::read_to_string(path).expect("failed to read backlog");
    serde_json::from_str(&text).expect("backlog is not valid JSON")
}
