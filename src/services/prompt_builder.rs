//! Worker prompt and agent command construction.

use std::fmt::Write as _;

use crate::domain::models::Task;
use crate::domain::ports::SandboxCommand;
use crate::infrastructure::config::ExecutorConfig;
use crate::services::directives::TaskDirectives;

/// Build the prompt handed to the agent for one task.
pub fn build_worker_prompt(task: &Task, settings: &ExecutorConfig) -> String {
    let directives = TaskDirectives::parse(&task.description);
    let mut prompt = String::new();

    prompt.push_str("# Agent: Worker\n\n");

    let _ = write!(
        prompt,
        "## Task: {}\nPriority: {} | Tags: {}\nWorkspace: {}\nMode: TASK EXECUTION - Complete autonomously\n\n",
        task.title,
        task.priority.as_str(),
        task.tags.join(", "),
        settings.workspace_dir,
    );

    if !directives.body.is_empty() {
        let _ = write!(prompt, "### Details\n{}\n\n", directives.body);
    }

    let _ = write!(
        prompt,
        "## Setup\n\
         **Tools:** Node.js, Python 3, Git, curl, jq. Standard dev environment.\n\
         **Skills:** `ls {}/` | **CLIs:** `ls {}/`\n\
         **Note:** API credentials are available in the environment.\n\n",
        settings.skills_path, settings.cli_docs_path,
    );

    if let Some(skill) = &directives.skill {
        let _ = write!(
            prompt,
            "### Load Skill: {skill}\n```bash\ncat {}/{skill}/SKILL.md\n```\nFollow the skill instructions carefully.\n\n",
            settings.skills_path,
        );
    }

    if !directives.clis.is_empty() {
        let _ = write!(
            prompt,
            "### Available CLIs: {}\nCheck CLI documentation at `{}/<cli-name>/` for usage.\n\n",
            directives.clis.join(", "),
            settings.cli_docs_path,
        );
    }

    prompt.push_str(
        "## Think First\n\
         1. **SUCCESS**: What defines \"done\" for this task?\n\
         2. **STEPS**: What sequence achieves this?\n\
         3. **RISKS**: What could fail? How to handle?\n\n",
    );

    prompt.push_str(
        "## Execute\n\
         - Complete autonomously; proceed with reasonable assumptions and note them in output\n\
         - If blocked, try an alternative approach before reporting failure\n\n",
    );

    prompt.push_str(
        "## Output Rules\n\
         **Filter command output to save context:**\n\
         - `command | head -20` or `| tail -20` for long outputs\n\
         - `curl ... | jq '.field'` to extract specific data\n\
         - **Max 50 lines** per command output\n\n\
         **Response format:**\n\
         - SUMMARY: 1-2 sentences of what was done\n\
         - FILES: Created/modified paths (if any)\n\
         - ISSUES: Problems encountered (if any)\n\
         - NEXT: Suggested follow-up (if applicable)\n",
    );

    prompt
}

/// Build the command that runs the agent on `task`.
///
/// The prompt is passed as the final argument. Variables named in
/// `passthrough_env` are copied from this process when set.
pub fn build_agent_command(task: &Task, settings: &ExecutorConfig) -> SandboxCommand {
    let mut parts = settings.agent_command.iter().filter(|p| !p.trim().is_empty());
    let program = parts.next().cloned().unwrap_or_default();

    let mut command = SandboxCommand::new(program);
    for arg in parts {
        command = command.arg(arg.clone());
    }
    command = command
        .arg(build_worker_prompt(task, settings))
        .env("SWARM_DISPATCH_TASK_ID", task.id.to_string())
        .env("SWARM_DISPATCH_SWARM_ID", task.swarm_id.to_string());

    for key in &settings.passthrough_env {
        if let Ok(value) = std::env::var(key) {
            command = command.env(key.clone(), value);
        }
    }
    command
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TaskPriority;
    use uuid::Uuid;

    fn task(description: &str) -> Task {
        Task::new(Uuid::new_v4(), "Ship the release", description)
            .with_priority(TaskPriority::High)
            .with_tag("release")
            .with_tag("ops")
    }

    #[test]
    fn test_prompt_sections() {
        let settings = ExecutorConfig::default();
        let prompt = build_worker_prompt(
            &task("SKILL: deployer\nCLI: gh, vercel\n\nTag and publish v1.2"),
            &settings,
        );

        assert!(prompt.starts_with("# Agent: Worker\n\n## Task: Ship the release\n"));
        assert!(prompt.contains("Priority: high | Tags: release, ops"));
        assert!(prompt.contains("### Details\nTag and publish v1.2\n"));
        assert!(prompt.contains("### Load Skill: deployer"));
        assert!(prompt.contains("cat /data/.claude/skills/deployer/SKILL.md"));
        assert!(prompt.contains("### Available CLIs: gh, vercel"));
        assert!(!prompt.contains("SKILL: deployer"));
        assert!(prompt.contains("## Output Rules"));
    }

    #[test]
    fn test_prompt_without_directives_or_details() {
        let prompt = build_worker_prompt(&task(""), &ExecutorConfig::default());
        assert!(!prompt.contains("### Details"));
        assert!(!prompt.contains("### Load Skill"));
        assert!(!prompt.contains("### Available CLIs"));
    }

    #[test]
    fn test_agent_command_appends_prompt() {
        let settings = ExecutorConfig {
            agent_command: vec!["agent".into(), "--yes".into()],
            passthrough_env: vec![],
            ..Default::default()
        };
        let task = task("do it");
        let command = build_agent_command(&task, &settings);

        assert_eq!(command.program, "agent");
        assert_eq!(command.args.len(), 2);
        assert_eq!(command.args[0], "--yes");
        assert!(command.args[1].contains("## Task: Ship the release"));
        assert!(command
            .env
            .contains(&("SWARM_DISPATCH_TASK_ID".to_string(), task.id.to_string())));
    }
}
