//! `drover git-check`: the post-run repository check, on demand.

use std::path::Path;

use anyhow::{Context, Result};

use drover_core::{GitPolicy, GitStateError, GitStateGate};

/// Check the tree at `root` under `policy`. Returns the process exit code.
pub fn run_git_check(root: &Path, policy: GitPolicy) -> Result<i32> {
    let gate = GitStateGate::open(root)
        .with_context(|| format!("cannot check git state at {}", root.display()))?;

    match gate.ensure_clean(policy) {
        Ok(paths) if paths.is_empty() => {
            println!("Repository is clean.");
            Ok(0)
        }
        Ok(paths) => {
            println!("Repository has uncommitted changes ({policy}, ignored):");
            for path in &paths {
                println!("  {path}");
            }
            Ok(0)
        }
        Err(GitStateError::Dirty { paths }) => {
            println!("Repository has uncommitted changes:");
            for path in &paths {
                println!("  {path}");
            }
            Ok(1)
        }
        Err(e) => Err(e.into()),
    }
}
