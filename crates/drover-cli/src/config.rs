//! Configuration file management for drover.
//!
//! Two optional TOML files feed [`RunConfig`]: the user file at
//! `$XDG_CONFIG_HOME/drover/config.toml` (or `~/.config/drover/config.toml`)
//! and the project file at `.drover/config.toml`. Keys set in the project
//! file win over the user file. Each knob then resolves through the chain
//! CLI flag > env var > config files > default.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use drover_core::{GitPolicy, RunConfig};

/// Project-local state directory.
pub const PROJECT_DIR: &str = ".drover";
/// Config file name inside both config directories.
pub const CONFIG_FILE: &str = "config.toml";
/// Backlog file name inside [`PROJECT_DIR`].
pub const TASKS_FILE: &str = "tasks.json";

pub const ENV_HARNESS: &str = "DROVER_HARNESS";
pub const ENV_MODEL: &str = "DROVER_MODEL";
pub const ENV_BUDGET: &str = "DROVER_BUDGET";
pub const ENV_TASKS: &str = "DROVER_TASKS";

/// Written by `drover init`.
pub const STARTER_CONFIG: &str = r#"# drover project configuration.
# Command-line flags and DROVER_* environment variables override these values.

debug = false

[harness]
# Always use one backend: "claude", "codex", "aider" or "opencode".
# override = "claude"
priority = ["claude", "opencode", "codex", "aider"]
auto_mode = true

[harness.extra_args]
# codex = ["--skip-git-repo-check"]

[budget]
limit = 200000
warn_threshold = 80

[iterations]
max_per_task = 3
max_per_run = 50

[git]
# "required" stops the run when an agent leaves uncommitted changes.
policy = "required"

[prompts]
# system = ".drover/system-prompt.md"
"#;

/// Ignore rules written into [`PROJECT_DIR`]: task status is run state and
/// must not make the tree dirty.
const PROJECT_GITIGNORE: &str = "tasks.json\ntasks.json.tmp\n";

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the drover user config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/drover` or `~/.config/drover`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("drover");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("drover")
}

/// Return the path to the user config file.
pub fn user_config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE)
}

/// Return the path to the project config file under `root`.
pub fn project_config_path(root: &Path) -> PathBuf {
    root.join(PROJECT_DIR).join(CONFIG_FILE)
}

/// Return the default backlog path under `root`.
pub fn default_tasks_path(root: &Path) -> PathBuf {
    root.join(PROJECT_DIR).join(TASKS_FILE)
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load one config file as a raw table. A missing file is `None`.
fn load_table(path: &Path) -> Result<Option<toml::Table>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read config file at {}", path.display()));
        }
    };
    let table = contents
        .parse::<toml::Table>()
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(Some(table))
}

/// Merge `overlay` into `base`. Nested tables merge key by key; any other
/// value in `overlay` replaces the one in `base`.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(nested)) => {
                merge_tables(existing, nested);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Load the user file then the project file and merge them.
pub fn load_layers(user_path: &Path, project_path: &Path) -> Result<RunConfig> {
    let mut merged = toml::Table::new();
    for path in [user_path, project_path] {
        if let Some(table) = load_table(path)? {
            tracing::debug!(path = %path.display(), "loaded config file");
            merge_tables(&mut merged, table);
        }
    }
    toml::Value::Table(merged)
        .try_into()
        .context("invalid drover configuration")
}

/// Result of [`init_project`].
#[derive(Debug)]
pub struct InitReport {
    pub config_path: PathBuf,
    pub tasks_path: PathBuf,
    /// Whether an empty backlog was created.
    pub created_backlog: bool,
}

/// Write the starter project config, the `.drover/.gitignore` and an empty
/// backlog (when none exists).
pub fn init_project(root: &Path, force: bool) -> Result<InitReport> {
    let dir = root.join(PROJECT_DIR);
    let config_path = project_config_path(root);
    if config_path.exists() && !force {
        bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            config_path.display()
        );
    }

    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create directory {}", dir.display()))?;
    std::fs::write(&config_path, STARTER_CONFIG)
        .with_context(|| format!("failed to write config file at {}", config_path.display()))?;

    let ignore_path = dir.join(".gitignore");
    if !ignore_path.exists() {
        std::fs::write(&ignore_path, PROJECT_GITIGNORE)
            .with_context(|| format!("failed to write {}", ignore_path.display()))?;
    }

    let tasks_path = default_tasks_path(root);
    let created_backlog = !tasks_path.exists();
    if created_backlog {
        std::fs::write(&tasks_path, "[]\n")
            .with_context(|| format!("failed to write {}", tasks_path.display()))?;
    }

    Ok(InitReport {
        config_path,
        tasks_path,
        created_backlog,
    })
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Values given on the command line. `None` and `false` mean "not given".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub harness: Option<String>,
    pub model: Option<String>,
    pub budget: Option<i64>,
    pub max_per_task: Option<i64>,
    pub max_per_run: Option<i64>,
    pub advisory: bool,
    pub debug: bool,
    pub tasks: Option<PathBuf>,
}

/// Fully resolved configuration, ready for use.
#[derive(Debug, Clone)]
pub struct DroverConfig {
    pub run: RunConfig,
    pub project_root: PathBuf,
    pub tasks_path: PathBuf,
}

impl DroverConfig {
    /// Resolve configuration for the project at `root` using the process
    /// environment and the user config file.
    pub fn resolve(root: &Path, overrides: &Overrides) -> Result<Self> {
        Self::resolve_with(root, &user_config_path(), overrides, &|key| {
            std::env::var(key).ok()
        })
    }

    /// Resolve using the chain: CLI flag > env var > config files > default.
    ///
    /// - Harness override: `--harness` > `DROVER_HARNESS` > `harness.override`
    /// - Model: `--model` > `DROVER_MODEL` > `harness.model`
    /// - Budget: `--budget` > `DROVER_BUDGET` > `budget.limit`
    /// - Backlog: `--tasks` > `DROVER_TASKS` > `.drover/tasks.json`
    pub fn resolve_with(
        root: &Path,
        user_path: &Path,
        overrides: &Overrides,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut run = load_layers(user_path, &project_config_path(root))?;

        if let Some(name) = &overrides.harness {
            run.harness.override_name = Some(name.clone());
        } else if let Some(name) = env(ENV_HARNESS).filter(|v| !v.is_empty()) {
            run.harness.override_name = Some(name);
        }

        if let Some(model) = &overrides.model {
            run.harness.model = Some(model.clone());
        } else if let Some(model) = env(ENV_MODEL).filter(|v| !v.is_empty()) {
            run.harness.model = Some(model);
        }

        if let Some(budget) = overrides.budget {
            run.budget.limit = Some(budget);
        } else if let Some(raw) = env(ENV_BUDGET).filter(|v| !v.is_empty()) {
            let budget = raw
                .trim()
                .parse::<i64>()
                .with_context(|| format!("{ENV_BUDGET} is not an integer: {raw:?}"))?;
            run.budget.limit = Some(budget);
        }

        if let Some(max) = overrides.max_per_task {
            run.iterations.max_per_task = max;
        }
        if let Some(max) = overrides.max_per_run {
            run.iterations.max_per_run = max;
        }
        if overrides.advisory {
            run.git.policy = GitPolicy::Advisory;
        }
        if overrides.debug {
            run.debug = true;
        }

        let tasks_path = if let Some(path) = &overrides.tasks {
            root.join(path)
        } else if let Some(path) = env(ENV_TASKS).filter(|v| !v.is_empty()) {
            root.join(path)
        } else {
            default_tasks_path(root)
        };

        Ok(Self {
            run,
            project_root: root.to_path_buf(),
            tasks_path,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
