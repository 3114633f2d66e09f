//! Plan files: projects and their goals, written in TOML.
//!
//! ```toml
//! [[project]]
//! name = "docs"
//!
//! [[project.goal]]
//! key = "outline"
//! name = "Outline the guide"
//!
//! [[project.goal]]
//! key = "draft"
//! name = "Draft every chapter"
//! depends_on = ["outline"]
//! ```
//!
//! Goals refer to each other by `key`; store ids are assigned when seeding.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use orchestrator::goals::{dependency_cycles, dependency_layers, ready_roots};
use orchestrator::{Goal, GoalStatus, NewGoal, Runtime};
use orchid_core::{Error, Result};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Plan {
    #[serde(default, rename = "project")]
    pub projects: Vec<PlannedProject>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlannedProject {
    pub name: String,
    #[serde(default, rename = "goal")]
    pub goals: Vec<PlannedGoal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlannedGoal {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub parent: Option<String>,
}

impl Plan {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parse and validate.
    pub fn from_toml(content: &str) -> Result<Self> {
        let plan: Self =
            toml::from_str(content).map_err(|e| Error::config(format!("Failed to parse plan: {e}")))?;
        plan.validate()?;
        Ok(plan)
    }

    /// Keys are unique per project and every reference names a known key.
    pub fn validate(&self) -> Result<()> {
        for project in &self.projects {
            let mut keys = HashSet::new();
            for goal in &project.goals {
                if !keys.insert(goal.key.as_str()) {
                    return Err(Error::invalid_record(format!(
                        "project {}: duplicate goal key {}",
                        project.name, goal.key
                    )));
                }
            }
            for goal in &project.goals {
                let unknown = goal
                    .depends_on
                    .iter()
                    .chain(goal.parent.iter())
                    .find(|k| !keys.contains(k.as_str()));
                if let Some(unknown) = unknown {
                    return Err(Error::invalid_record(format!(
                        "project {}: goal {} refers to unknown key {unknown}",
                        project.name, goal.key
                    )));
                }
            }
        }
        Ok(())
    }
}

impl PlannedProject {
    /// The goals as pending graph nodes keyed by their plan key.
    pub fn to_goals(&self) -> Vec<Goal> {
        self.goals
            .iter()
            .map(|g| Goal {
                id: g.key.clone(),
                project_id: self.name.clone(),
                name: g.name.clone(),
                description: g.description.clone(),
                status: GoalStatus::Pending,
                depends_on: g.depends_on.iter().cloned().collect::<BTreeSet<_>>(),
                parent_goal_id: g.parent.clone(),
                agent_id: None,
                report: None,
                summary: None,
                error: None,
                evidence_nudged: false,
                review_retries: 0,
            })
            .collect()
    }

    /// Keys of goals a fresh run starts with.
    pub fn ready_keys(&self) -> Vec<String> {
        ready_roots(&self.to_goals()).into_iter().map(|g| g.id.clone()).collect()
    }

    pub fn layers(&self) -> Vec<Vec<String>> {
        dependency_layers(&self.to_goals())
    }

    pub fn cycles(&self) -> Vec<Vec<String>> {
        dependency_cycles(&self.to_goals())
    }
}

/// A project created or reused by [`seed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeededProject {
    pub project_id: String,
    pub name: String,
    /// Plan key to goal id.
    pub goals: HashMap<String, String>,
}

/// Create the plan's projects and goals.
///
/// A project that already exists by name is reused and gets the goals again.
/// Goals are created once their parent and dependencies exist, so the order
/// in the file does not matter.
pub async fn seed(runtime: &Runtime, plan: &Plan) -> Result<Vec<SeededProject>> {
    let mut seeded = Vec::with_capacity(plan.projects.len());

    for planned in &plan.projects {
        let project = match runtime.projects().find_by_name(&planned.name).await? {
            Some(project) => project,
            None => runtime.create_project(&planned.name).await?,
        };

        let mut ids: HashMap<String, String> = HashMap::new();
        let mut remaining: Vec<&PlannedGoal> = planned.goals.iter().collect();
        while !remaining.is_empty() {
            let (ready, blocked): (Vec<&PlannedGoal>, Vec<&PlannedGoal>) =
                remaining.into_iter().partition(|g| {
                    g.depends_on
                        .iter()
                        .chain(g.parent.iter())
                        .all(|k| ids.contains_key(k))
                });
            if ready.is_empty() {
                let keys: Vec<&str> = blocked.iter().map(|g| g.key.as_str()).collect();
                return Err(Error::invalid_record(format!(
                    "project {}: goals {} form a cycle",
                    planned.name,
                    keys.join(", ")
                )));
            }

            for goal in ready {
                let mut new = NewGoal::new(&project.id, &goal.name, &goal.description);
                if let Some(parent) = goal.parent.as_ref().and_then(|k| ids.get(k)) {
                    new = new.with_parent(parent);
                }
                for dep in goal.depends_on.iter().filter_map(|k| ids.get(k)) {
                    new = new.depends_on(dep);
                }
                let created = runtime.goals().create(new).await?;
                ids.insert(goal.key.clone(), created.id);
            }
            remaining = blocked;
        }

        info!(project_id = %project.id, name = %project.name, goals = ids.len(), "Plan seeded");
        seeded.push(SeededProject {
            project_id: project.id,
            name: project.name,
            goals: ids,
        });
    }

    Ok(seeded)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    const PLAN: &str = r#"
[[project]]
name = "docs"

[[project.goal]]
key = "draft"
name = "Draft every chapter"
depends_on = ["outline"]

[[project.goal]]
key = "outline"
name = "Outline the guide"

[[project.goal]]
key = "intro"
name = "Draft the introduction"
parent = "draft"
"#;

    #[test]
    fn should_parse_projects_and_goals() {
        let plan = Plan::from_toml(PLAN).unwrap();
        assert_eq!(plan.projects.len(), 1);
        assert_eq!(plan.projects[0].goals.len(), 3);
        assert_eq!(plan.projects[0].goals[0].depends_on, vec!["outline"]);
    }

    #[test]
    fn should_reject_unknown_references() {
        let text = r#"
[[project]]
name = "p"
[[project.goal]]
key = "a"
name = "A"
depends_on = ["missing"]
"#;
        let err = Plan::from_toml(text).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn should_reject_duplicate_keys() {
        let text = r#"
[[project]]
name = "p"
[[project.goal]]
key = "a"
name = "A"
[[project.goal]]
key = "a"
name = "Again"
"#;
        assert!(Plan::from_toml(text).is_err());
    }

    #[test]
    fn given_plan_when_computing_readiness_then_only_unblocked_roots_are_ready() {
        let plan = Plan::from_toml(PLAN).unwrap();
        let project = &plan.projects[0];

        assert_eq!(project.ready_keys(), vec!["outline"]);
        assert_eq!(
            project.layers(),
            vec![
                vec!["outline".to_string(), "intro".to_string()],
                vec!["draft".to_string()]
            ]
        );
        assert!(project.cycles().is_empty());
    }
}
