//! Seams to the external execution and planning capabilities.
//!
//! The [`Executor`] and [`Planner`] traits decouple dispatch from the actual
//! agent backend. [`CommandExecutor`] drives any command that reads a rendered
//! request on stdin and answers on stdout. Tests use scripted implementations
//! that return predetermined outputs without spawning processes.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, context};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::context::TaskContext;
use crate::io::config::BuildConfig;
use crate::io::process::{Limits, run_bounded};

const EXECUTE_TEMPLATE: &str = r#"# Task

{{ task }}
{% if ctx.project_root %}
# Project root

{{ ctx.project_root }}
{% endif %}{% if ctx.capabilities %}
# Capabilities
{% for cap in ctx.capabilities %}
- {{ cap.name }} [{{ "implemented" if cap.implemented else "missing" }}]{% if cap.file_path %} `{{ cap.file_path }}`{% endif %}: {{ cap.description }}{% endfor %}
{% endif %}{% if ctx.generated_files %}
# Generated files
{% for file in ctx.generated_files %}
- {{ file }}{% endfor %}
{% endif %}{% if ctx.research %}
# Reference notes
{% for note in ctx.research %}
## {{ note.reference }} ({{ note.source }})
{% for snippet in note.snippets %}
> {{ snippet }}{% endfor %}
{% endfor %}{% endif %}{% if ctx.phase_outputs %}
# Earlier phases
{% for output in ctx.phase_outputs %}
## Phase {{ loop.index }}

{{ output }}
{% endfor %}{% endif %}{% for key, value in ctx.extras|items %}
# {{ key }}

{{ value }}
{% endfor %}"#;

const PLAN_TEMPLATE: &str = r#"# Goal

{{ goal }}

# Output

Answer with JSON `{"output": "...", "phases": ["..."]}`, or with a numbered list
of phases where each phase carries a `Description: <text>` line.
{% if ctx.capabilities %}
# Capabilities
{% for cap in ctx.capabilities %}
- {{ cap.name }} [{{ "implemented" if cap.implemented else "missing" }}]{% endfor %}
{% endif %}"#;

/// Output of the execution capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub output: String,
}

/// Output of the planning capability.
///
/// `phases` is the structured plan. When a planner only produces text it is
/// left empty and the dispatcher parses `output` instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanOutput {
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub phases: Vec<String>,
}

/// Executes an atomic task. May be slow and non-deterministic.
pub trait Executor {
    fn execute(&self, task: &str, context: &TaskContext) -> Result<ExecOutput>;
}

/// Produces a plan for a complex goal.
pub trait Planner {
    fn plan(&self, goal: &str, context: &TaskContext) -> Result<PlanOutput>;
}

/// Executor and planner backed by a configured command.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    command: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandExecutor {
    pub fn new(
        command: Vec<String>,
        workdir: &Path,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            command,
            workdir: workdir.to_path_buf(),
            timeout,
            output_limit_bytes,
        }
    }

    pub fn from_config(cfg: &BuildConfig, workdir: &Path) -> Result<Self> {
        let command = cfg.executor_command()?.to_vec();
        Ok(Self::new(
            command,
            workdir,
            Duration::from_secs(cfg.executor.timeout_secs),
            cfg.executor.output_limit_bytes,
        ))
    }

    #[instrument(skip_all, fields(program = %self.command.first().map(String::as_str).unwrap_or_default(), timeout_secs = self.timeout.as_secs()))]
    fn invoke(&self, request: &str) -> Result<String> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("executor command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);

        info!(workdir = %self.workdir.display(), "invoking executor command");
        let limits = Limits {
            timeout: self.timeout,
            output_limit_bytes: self.output_limit_bytes,
        };
        let output = run_bounded(cmd, Some(request.as_bytes()), limits)
            .with_context(|| format!("run executor {program}"))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "executor timed out");
            return Err(anyhow!("executor timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            let stderr = output.stderr.text();
            warn!(exit_code = ?output.status.code(), "executor failed");
            return Err(anyhow!(
                "executor failed with status {:?}: {}",
                output.status.code(),
                stderr.trim()
            ));
        }
        debug!(bytes = output.stdout.bytes.len(), "executor completed");
        Ok(output.stdout.text().trim().to_string())
    }
}

impl Executor for CommandExecutor {
    fn execute(&self, task: &str, context: &TaskContext) -> Result<ExecOutput> {
        let request = render_execute_request(task, context)?;
        let output = self.invoke(&request)?;
        Ok(ExecOutput { output })
    }
}

impl Planner for CommandExecutor {
    fn plan(&self, goal: &str, context: &TaskContext) -> Result<PlanOutput> {
        let request = render_plan_request(goal, context)?;
        let raw = self.invoke(&request)?;
        Ok(parse_plan_output(raw))
    }
}

/// Structured JSON if the planner produced it, else the raw text.
pub fn parse_plan_output(raw: String) -> PlanOutput {
    match serde_json::from_str::<PlanOutput>(&raw) {
        Ok(plan) => plan,
        Err(_) => PlanOutput {
            output: raw,
            phases: Vec::new(),
        },
    }
}

pub fn render_execute_request(task: &str, ctx: &TaskContext) -> Result<String> {
    let env = Environment::new();
    let rendered = env
        .render_str(EXECUTE_TEMPLATE, context! { task => task.trim(), ctx => ctx })
        .context("render execute request")?;
    Ok(rendered)
}

pub fn render_plan_request(goal: &str, ctx: &TaskContext) -> Result<String> {
    let env = Environment::new();
    let rendered = env
        .render_str(PLAN_TEMPLATE, context! { goal => goal.trim(), ctx => ctx })
        .context("render plan request")?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::ResearchNote;
    use crate::core::types::SystemCapability;

    fn sample_context() -> TaskContext {
        TaskContext {
            project_root: Some(PathBuf::from("/work")),
            capabilities: vec![SystemCapability::new("api", "HTTP routes", Some("src/api.rs"))],
            research: vec![ResearchNote {
                reference: "moka".to_string(),
                source: "docsrs".to_string(),
                snippets: vec!["moka is a cache".to_string()],
            }],
            phase_outputs: vec!["schema written".to_string()],
            ..TaskContext::default()
        }
        .with_extra("constraints", "no unsafe")
    }

    #[test]
    fn execute_request_includes_context_sections() {
        let rendered = render_execute_request("Write the API", &sample_context()).expect("render");
        assert!(rendered.starts_with("# Task\n\nWrite the API"));
        assert!(rendered.contains("/work"));
        assert!(rendered.contains("- api [missing] `src/api.rs`: HTTP routes"));
        assert!(rendered.contains("> moka is a cache"));
        assert!(rendered.contains("## Phase 1\n\nschema written"));
        assert!(rendered.contains("# constraints\n\nno unsafe"));
    }

    #[test]
    fn plan_output_prefers_json() {
        let plan = parse_plan_output(r#"{"output":"two steps","phases":["A","B"]}"#.to_string());
        assert_eq!(plan.phases, vec!["A", "B"]);

        let text = parse_plan_output("1. A\n2. B".to_string());
        assert!(text.phases.is_empty());
        assert_eq!(text.output, "1. A\n2. B");
    }

    #[cfg(unix)]
    #[test]
    fn command_executor_returns_stdout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let executor = CommandExecutor::new(
            vec!["sh".to_string(), "-c".to_string(), "cat".to_string()],
            temp.path(),
            Duration::from_secs(10),
            100_000,
        );
        let out = executor
            .execute("echo this task", &TaskContext::default())
            .expect("execute");
        assert!(out.output.contains("echo this task"));
    }

    #[cfg(unix)]
    #[test]
    fn command_executor_surfaces_failures() {
        let temp = tempfile::tempdir().expect("tempdir");
        let executor = CommandExecutor::new(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "cat >/dev/null; echo boom >&2; exit 3".to_string(),
            ],
            temp.path(),
            Duration::from_secs(10),
            100_000,
        );
        let err = executor
            .execute("task", &TaskContext::default())
            .unwrap_err();
        assert!(err.to_string().contains("boom"), "{err:#}");
    }

    #[cfg(unix)]
    #[test]
    fn command_planner_parses_structured_plans() {
        let temp = tempfile::tempdir().expect("tempdir");
        let executor = CommandExecutor::new(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                r#"cat >/dev/null; printf '{"output":"p","phases":["A","B"]}'"#.to_string(),
            ],
            temp.path(),
            Duration::from_secs(10),
            100_000,
        );
        let plan = executor.plan("goal", &TaskContext::default()).expect("plan");
        assert_eq!(plan.phases, vec!["A", "B"]);
    }
}
