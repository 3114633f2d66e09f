//! JSON schemas of the built-in tools.

use orchid_gateway::ToolSpec;
use serde_json::{Value, json};

use super::names;
use crate::agent::ToolPolicy;

fn object(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Schema for one tool.
pub fn spec_for(name: &str) -> Option<ToolSpec> {
    let (description, parameters) = match name {
        names::SHELL => (
            "Run a shell command in the project workspace and return its exit code and output.",
            object(json!({"command": {"type": "string"}}), &["command"]),
        ),
        names::READ_FILE => (
            "Read a file from the workspace.",
            object(json!({"path": {"type": "string"}}), &["path"]),
        ),
        names::WRITE_FILE => (
            "Create or overwrite a file in the workspace.",
            object(
                json!({"path": {"type": "string"}, "content": {"type": "string"}}),
                &["path", "content"],
            ),
        ),
        names::EDIT_FILE => (
            "Replace text in a file. old_text must occur exactly once.",
            object(
                json!({
                    "path": {"type": "string"},
                    "old_text": {"type": "string"},
                    "new_text": {"type": "string"}
                }),
                &["path", "old_text", "new_text"],
            ),
        ),
        names::LIST_FILES => (
            "List files under a directory of the workspace, recursively.",
            object(json!({"path": {"type": "string"}}), &[]),
        ),
        names::GREP_FILES => (
            "Search files for lines matching a regular expression.",
            object(
                json!({"pattern": {"type": "string"}, "path": {"type": "string"}}),
                &["pattern"],
            ),
        ),
        names::REMEMBER => (
            "Store a value in your memory under a key.",
            object(json!({"key": {"type": "string"}, "value": {}}), &["key", "value"]),
        ),
        names::RECALL => (
            "Read a value from your memory.",
            object(json!({"key": {"type": "string"}}), &["key"]),
        ),
        names::CREATE_GOAL => (
            "Create a goal in your project.",
            object(
                json!({
                    "name": {"type": "string"},
                    "description": {"type": "string"},
                    "parent_goal_id": {"type": "string"},
                    "depends_on": {"type": "array", "items": {"type": "string"}}
                }),
                &["name"],
            ),
        ),
        names::LIST_GOALS => (
            "List the goals of your project with status, dependencies and assignment.",
            object(json!({}), &[]),
        ),
        names::ADD_DEPENDENCY => (
            "Make goal_id wait for depends_on to complete.",
            object(
                json!({"goal_id": {"type": "string"}, "depends_on": {"type": "string"}}),
                &["goal_id", "depends_on"],
            ),
        ),
        names::ASSIGN_GOAL => (
            "Assign a goal to an agent. Without agent_id a new worker is spawned for it.",
            object(
                json!({"goal_id": {"type": "string"}, "agent_id": {"type": "string"}}),
                &["goal_id"],
            ),
        ),
        names::COMPLETE_GOAL => (
            "Mark a goal completed with a short report.",
            object(
                json!({"goal_id": {"type": "string"}, "report": {"type": "string"}}),
                &["goal_id"],
            ),
        ),
        names::SEND_MESSAGE => (
            "Send a message to another agent.",
            object(
                json!({"agent_id": {"type": "string"}, "text": {"type": "string"}}),
                &["agent_id", "text"],
            ),
        ),
        _ => return None,
    };
    Some(ToolSpec::new(name, description, parameters))
}

/// Schemas for every tool a policy allows, in a stable order.
pub fn specs_for(policy: &ToolPolicy) -> Vec<ToolSpec> {
    policy.allowed().iter().filter_map(|name| spec_for(name)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_describe_every_named_tool() {
        for name in names::WORKER.iter().chain(names::ORCHESTRATOR) {
            assert!(spec_for(name).is_some(), "missing spec for {name}");
        }
        assert!(spec_for("format_disk").is_none());
    }

    #[test]
    fn should_only_expose_allowed_tools() {
        let specs = specs_for(&ToolPolicy::Worker);
        assert!(specs.iter().all(|s| s.name != names::CREATE_GOAL));
        assert_eq!(specs.len(), names::WORKER.len());
    }
}
