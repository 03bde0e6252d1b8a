//! Prompt composition.

use drover_store::Task;

/// Separator placed between the system prompt and the task prompt when a
/// backend takes a single prompt.
pub const PROMPT_SEPARATOR: &str = "\n\n---\n\n";

/// System prompt used when no prompt file is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are an autonomous coding agent working through a task backlog, one task \
at a time. Work only on the task you are given. Keep changes focused, run the \
project's tests when they exist, and commit your work with a descriptive \
message before you exit. Leave the working tree clean: no uncommitted or \
untracked files. If you cannot complete the task, explain why and exit with \
a non-zero status.";

/// Combine the two prompts for backends without a system-prompt channel.
/// An empty system prompt yields the task prompt unchanged.
pub fn combine_prompts(system_prompt: &str, task_prompt: &str) -> String {
    if system_prompt.is_empty() {
        return task_prompt.to_string();
    }
    format!("{system_prompt}{PROMPT_SEPARATOR}{task_prompt}")
}

/// Render the task prompt handed to a harness.
pub fn render_task_prompt(task: &Task) -> String {
    let mut prompt = format!(
        "Task {id}: {title}\nType: {kind}\nPriority: {priority}\n",
        id = task.id,
        title = task.title,
        kind = task.kind,
        priority = task.priority,
    );
    if let Some(epic) = &task.epic {
        prompt.push_str(&format!("Epic: {epic}\n"));
    }
    if !task.labels.is_empty() {
        let labels: Vec<&str> = task.labels.iter().map(String::as_str).collect();
        prompt.push_str(&format!("Labels: {}\n", labels.join(", ")));
    }
    if !task.depends_on.is_empty() {
        prompt.push_str(&format!("Depends on (closed): {}\n", task.depends_on.join(", ")));
    }
    if let Some(description) = task.description.as_deref().filter(|d| !d.trim().is_empty()) {
        prompt.push('\n');
        prompt.push_str(description.trim());
        prompt.push('\n');
    }
    prompt.push_str(
        "\nComplete this task in the current repository. Commit all of your changes \
         before exiting, and exit non-zero if the task could not be completed.\n",
    );
    prompt
}
