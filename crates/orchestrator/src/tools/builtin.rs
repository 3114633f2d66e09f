//! The built-in tool set.

use async_trait::async_trait;
use orchid_gateway::ToolSpec;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::{ToolContext, ToolDispatcher, ToolEffect, ToolError, ToolOutput, names, parse_args, specs_for};
use crate::agent::ToolPolicy;
use crate::goals::{Goal, NewGoal};

/// File, shell, memory and goal tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinTools;

#[derive(Deserialize)]
struct ShellArgs {
    command: String,
}

#[derive(Deserialize)]
struct PathArgs {
    path: String,
}

#[derive(Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

#[derive(Deserialize)]
struct EditArgs {
    path: String,
    old_text: String,
    new_text: String,
}

#[derive(Deserialize)]
struct ListArgs {
    #[serde(default)]
    path: String,
}

#[derive(Deserialize)]
struct GrepArgs {
    pattern: String,
    #[serde(default)]
    path: String,
}

#[derive(Deserialize)]
struct RememberArgs {
    key: String,
    value: Value,
}

#[derive(Deserialize)]
struct KeyArgs {
    key: String,
}

#[derive(Deserialize)]
struct CreateGoalArgs {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    parent_goal_id: Option<String>,
    #[serde(default)]
    depends_on: Vec<String>,
}

#[derive(Deserialize)]
struct DependencyArgs {
    goal_id: String,
    depends_on: String,
}

#[derive(Deserialize)]
struct AssignArgs {
    goal_id: String,
    #[serde(default)]
    agent_id: Option<String>,
}

#[derive(Deserialize)]
struct CompleteArgs {
    goal_id: String,
    #[serde(default)]
    report: String,
}

#[derive(Deserialize)]
struct MessageArgs {
    agent_id: String,
    text: String,
}

fn lines_or(items: &[String], empty: &str) -> String {
    if items.is_empty() {
        empty.to_string()
    } else {
        items.join("\n")
    }
}

fn goal_json(goal: &Goal) -> Value {
    json!({
        "id": goal.id,
        "name": goal.name,
        "status": goal.status,
        "depends_on": goal.depends_on,
        "parent_goal_id": goal.parent_goal_id,
        "agent_id": goal.agent_id,
    })
}

impl BuiltinTools {
    /// A goal of the caller's own project.
    async fn own_goal(ctx: &ToolContext, goal_id: &str) -> Result<Goal, ToolError> {
        let project_id = ctx.project_id()?;
        let goal = ctx.runtime.goals().get(goal_id).await?;
        if goal.project_id != project_id {
            return Err(ToolError::failed(format!(
                "goal {goal_id} belongs to another project"
            )));
        }
        Ok(goal)
    }

    async fn create_goal(ctx: &ToolContext, args: CreateGoalArgs) -> Result<ToolOutput, ToolError> {
        let project_id = ctx.project_id()?;
        let mut new = NewGoal::new(project_id, args.name, args.description);
        if let Some(parent) = args.parent_goal_id {
            new = new.with_parent(parent);
        }
        for dep in args.depends_on {
            new = new.depends_on(dep);
        }
        let goal = ctx.runtime.goals().create(new).await?;
        Ok(ToolOutput::text(format!("Created goal {} ({})", goal.id, goal.name)))
    }

    async fn assign_goal(ctx: &ToolContext, args: AssignArgs) -> Result<ToolOutput, ToolError> {
        let goal = Self::own_goal(ctx, &args.goal_id).await?;
        let agent_id = match args.agent_id {
            Some(agent_id) => {
                if !ctx.runtime.registry().is_alive(&agent_id) {
                    return Err(ToolError::failed(format!("agent {agent_id} is not running")));
                }
                ctx.runtime.goals().assign_to_agent(&goal.id, &agent_id).await?;
                agent_id
            }
            None => {
                let handle = ctx
                    .runtime
                    .spawn_worker(&goal.project_id, &goal.id, Some(ctx.agent_id.clone()))
                    .await
                    .map_err(|e| ToolError::failed(e.to_string()))?;
                handle.id().to_string()
            }
        };
        info!(agent_id = %ctx.agent_id, goal_id = %goal.id, assignee = %agent_id, "Goal assigned by tool");
        Ok(ToolOutput::text(format!("Assigned goal {} to agent {agent_id}", goal.id)))
    }
}

#[async_trait]
impl ToolDispatcher for BuiltinTools {
    fn specs(&self, policy: &ToolPolicy) -> Vec<ToolSpec> {
        specs_for(policy)
    }

    async fn execute(&self, name: &str, args: &Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        match name {
            names::SHELL => {
                let a: ShellArgs = parse_args(name, args)?;
                let out = ctx.workspace().await?.exec(&a.command, ctx.timeout).await?;
                Ok(ToolOutput::text(out.render()))
            }
            names::READ_FILE => {
                let a: PathArgs = parse_args(name, args)?;
                Ok(ToolOutput::text(ctx.workspace().await?.read_file(&a.path).await?))
            }
            names::WRITE_FILE => {
                let a: WriteArgs = parse_args(name, args)?;
                let bytes = a.content.len();
                ctx.workspace().await?.write_file(&a.path, a.content).await?;
                Ok(ToolOutput::text(format!("Wrote {bytes} bytes to {}", a.path)))
            }
            names::EDIT_FILE => {
                let a: EditArgs = parse_args(name, args)?;
                ctx.workspace()
                    .await?
                    .edit_file(&a.path, a.old_text, a.new_text)
                    .await?;
                Ok(ToolOutput::text(format!("Edited {}", a.path)))
            }
            names::LIST_FILES => {
                let a: ListArgs = parse_args(name, args)?;
                let files = ctx.workspace().await?.list_files(&a.path).await?;
                Ok(ToolOutput::text(lines_or(&files, "(no files)")))
            }
            names::GREP_FILES => {
                let a: GrepArgs = parse_args(name, args)?;
                let hits = ctx.workspace().await?.grep_files(&a.pattern, &a.path).await?;
                Ok(ToolOutput::text(lines_or(&hits, "(no matches)")))
            }
            names::REMEMBER => {
                let a: RememberArgs = parse_args(name, args)?;
                Ok(ToolOutput::text(format!("Remembered {}", a.key))
                    .with_effect(ToolEffect::Remember {
                        key: a.key,
                        value: a.value,
                    }))
            }
            names::RECALL => {
                let a: KeyArgs = parse_args(name, args)?;
                Ok(ToolOutput::text(match ctx.memory.get(&a.key) {
                    Some(Value::String(s)) => s.clone(),
                    Some(value) => value.to_string(),
                    None => format!("Nothing remembered under {}", a.key),
                }))
            }
            names::CREATE_GOAL => Self::create_goal(ctx, parse_args(name, args)?).await,
            names::LIST_GOALS => {
                let goals = ctx.runtime.goals().list(ctx.project_id()?).await?;
                let listing: Vec<Value> = goals.iter().map(goal_json).collect();
                serde_json::to_string_pretty(&listing)
                    .map(ToolOutput::text)
                    .map_err(|e| ToolError::failed(e.to_string()))
            }
            names::ADD_DEPENDENCY => {
                let a: DependencyArgs = parse_args(name, args)?;
                Self::own_goal(ctx, &a.goal_id).await?;
                ctx.runtime
                    .goals()
                    .add_dependency(&a.goal_id, &a.depends_on)
                    .await?;
                Ok(ToolOutput::text(format!("{} now depends on {}", a.goal_id, a.depends_on)))
            }
            names::ASSIGN_GOAL => Self::assign_goal(ctx, parse_args(name, args)?).await,
            names::COMPLETE_GOAL => {
                let a: CompleteArgs = parse_args(name, args)?;
                Self::own_goal(ctx, &a.goal_id).await?;
                ctx.runtime.goals().complete(&a.goal_id, &a.report, None).await?;
                Ok(ToolOutput::text(format!("Completed goal {}", a.goal_id)))
            }
            names::SEND_MESSAGE => {
                let a: MessageArgs = parse_args(name, args)?;
                let text = format!("Message from agent {}: {}", ctx.agent_id, a.text);
                if ctx.runtime.registry().notify(&a.agent_id, text) {
                    Ok(ToolOutput::text(format!("Delivered to {}", a.agent_id)))
                } else {
                    Err(ToolError::failed(format!("agent {} is not running", a.agent_id)))
                }
            }
            other => Err(ToolError::Unknown(other.to_string())),
        }
    }
}
