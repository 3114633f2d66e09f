//! Goal entities and their dependency graph.
//!
//! Goals are typed views over stored objects: the title is the name, the
//! content is the description and everything else lives in metadata.
//! Readiness, layering and cycle detection are pure functions over a slice
//! of goals so the watcher and the CLI can share them.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use itertools::Itertools;
use orchid_core::{Error, Result};
use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::registry::AgentRegistry;
use crate::store::{NewObject, ObjectKind, ObjectStore, StoredObject};

/// Goal lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    #[default]
    Pending,
    Completed,
}

impl GoalStatus {
    /// The other status.
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::Pending => Self::Completed,
            Self::Completed => Self::Pending,
        }
    }
}

impl fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GoalMeta {
    #[serde(default)]
    project_id: String,
    #[serde(default)]
    status: GoalStatus,
    #[serde(default)]
    depends_on: BTreeSet<String>,
    #[serde(default)]
    parent_goal_id: Option<String>,
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    report: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    evidence_nudged: bool,
    #[serde(default)]
    review_retries: u32,
}

/// A unit of work in a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Goal {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub description: String,
    pub status: GoalStatus,
    /// Goals that must complete first, same project only.
    pub depends_on: BTreeSet<String>,
    /// `None` for root goals.
    pub parent_goal_id: Option<String>,
    pub agent_id: Option<String>,
    pub report: Option<String>,
    pub summary: Option<String>,
    pub error: Option<String>,
    /// A corrective nudge for missing implementation evidence was sent.
    pub evidence_nudged: bool,
    /// Corrective retries scheduled after a negative review.
    pub review_retries: u32,
}

impl Goal {
    /// Decode a stored object.
    pub fn from_object(object: &StoredObject) -> Result<Self> {
        if object.kind != ObjectKind::Goal {
            return Err(Error::not_found("goal", &object.id));
        }
        let meta: GoalMeta = serde_json::from_value(Value::Object(object.metadata.clone()))?;

        Ok(Self {
            id: object.id.clone(),
            project_id: meta.project_id,
            name: object.title.clone(),
            description: object.content.clone(),
            status: meta.status,
            depends_on: meta.depends_on,
            parent_goal_id: meta.parent_goal_id,
            agent_id: meta.agent_id,
            report: meta.report,
            summary: meta.summary,
            error: meta.error,
            evidence_nudged: meta.evidence_nudged,
            review_retries: meta.review_retries,
        })
    }

    /// Whether this goal has no parent.
    pub fn is_root(&self) -> bool {
        self.parent_goal_id.is_none()
    }

    pub fn is_pending(&self) -> bool {
        self.status == GoalStatus::Pending
    }

    /// The message an agent receives when the goal is assigned to it.
    pub fn assignment_text(&self) -> String {
        let mut text = format!("Your goal ({}): {}", self.id, self.name);
        if !self.description.trim().is_empty() {
            text.push_str("\n\n");
            text.push_str(&self.description);
        }
        text.push_str("\n\nWork in the project workspace. When you are done, reply with a short report of what you changed and how you verified it.");
        text
    }
}

/// Input for [`GoalGraph::create`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewGoal {
    pub project_id: String,
    pub name: String,
    pub description: String,
    pub parent_goal_id: Option<String>,
    pub depends_on: BTreeSet<String>,
}

impl NewGoal {
    /// Describe a root goal.
    pub fn new(
        project_id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            name: name.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    /// Set the parent goal.
    #[must_use]
    pub fn with_parent(mut self, parent_goal_id: impl Into<String>) -> Self {
        self.parent_goal_id = Some(parent_goal_id.into());
        self
    }

    /// Add a dependency.
    #[must_use]
    pub fn depends_on(mut self, goal_id: impl Into<String>) -> Self {
        self.depends_on.insert(goal_id.into());
        self
    }
}

/// Whether `goal` is directly actionable: a pending root whose dependencies
/// have all completed. Unknown dependency ids count as unsatisfied.
pub fn is_ready(goal: &Goal, by_id: &HashMap<&str, &Goal>) -> bool {
    goal.is_pending()
        && goal.is_root()
        && goal.depends_on.iter().all(|dep| {
            by_id
                .get(dep.as_str())
                .is_some_and(|d| d.status == GoalStatus::Completed)
        })
}

/// Ready root goals, in input order.
pub fn ready_roots(goals: &[Goal]) -> Vec<&Goal> {
    let by_id: HashMap<&str, &Goal> = goals.iter().map(|g| (g.id.as_str(), g)).collect();
    goals.iter().filter(|g| is_ready(g, &by_id)).collect()
}

/// Group goal ids into dependency layers with Kahn's algorithm.
///
/// Dependencies outside `goals` are ignored. Goals left over because they sit
/// on or behind a cycle form one extra final layer, so the computation always
/// terminates.
pub fn dependency_layers(goals: &[Goal]) -> Vec<Vec<String>> {
    let ids: HashSet<&str> = goals.iter().map(|g| g.id.as_str()).collect();
    let mut remaining: Vec<&Goal> = goals.iter().collect();
    let mut placed: HashSet<&str> = HashSet::new();
    let mut layers = Vec::new();

    while !remaining.is_empty() {
        let (layer, rest): (Vec<&Goal>, Vec<&Goal>) = remaining.into_iter().partition(|g| {
            g.depends_on
                .iter()
                .filter(|d| ids.contains(d.as_str()))
                .all(|d| placed.contains(d.as_str()))
        });

        if layer.is_empty() {
            layers.push(rest.iter().map(|g| g.id.clone()).collect());
            break;
        }

        placed.extend(layer.iter().map(|g| g.id.as_str()));
        layers.push(layer.iter().map(|g| g.id.clone()).collect());
        remaining = rest;
    }

    layers
}

/// Dependency cycles among `goals`, each as a sorted list of ids.
pub fn dependency_cycles(goals: &[Goal]) -> Vec<Vec<String>> {
    let mut graph = DiGraph::<&str, ()>::new();
    let nodes: HashMap<&str, _> = goals
        .iter()
        .map(|g| (g.id.as_str(), graph.add_node(g.id.as_str())))
        .collect();

    for goal in goals {
        for dep in &goal.depends_on {
            if let (Some(from), Some(to)) = (nodes.get(dep.as_str()), nodes.get(goal.id.as_str())) {
                graph.add_edge(*from, *to, ());
            }
        }
    }

    tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| {
            scc.len() > 1 || scc.first().is_some_and(|n| graph.contains_edge(*n, *n))
        })
        .map(|scc| scc.into_iter().map(|n| graph[n].to_string()).sorted().collect())
        .collect()
}

/// First `max_chars` characters of `text`, marked when cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...")
}

/// CRUD, dependency and status operations over goals in the object store.
#[derive(Clone)]
pub struct GoalGraph {
    store: Arc<dyn ObjectStore>,
    registry: Arc<AgentRegistry>,
    excerpt_chars: usize,
}

impl fmt::Debug for GoalGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoalGraph")
            .field("excerpt_chars", &self.excerpt_chars)
            .finish_non_exhaustive()
    }
}

impl GoalGraph {
    /// Create a graph over `store`, delivering messages through `registry`.
    pub fn new(store: Arc<dyn ObjectStore>, registry: Arc<AgentRegistry>) -> Self {
        Self {
            store,
            registry,
            excerpt_chars: 500,
        }
    }

    /// Set how much of a report the completion cascade quotes.
    #[must_use]
    pub fn with_excerpt_chars(mut self, chars: usize) -> Self {
        self.excerpt_chars = chars;
        self
    }

    /// Create a goal. The parent and dependencies must exist in the same project.
    pub async fn create(&self, new: NewGoal) -> Result<Goal> {
        if new.name.trim().is_empty() {
            return Err(Error::invalid_record("goal name must not be empty"));
        }
        if let Some(parent) = &new.parent_goal_id {
            self.same_project(parent, &new.project_id).await?;
        }
        for dep in &new.depends_on {
            self.same_project(dep, &new.project_id).await?;
        }

        let meta = GoalMeta {
            project_id: new.project_id,
            depends_on: new.depends_on,
            parent_goal_id: new.parent_goal_id,
            ..GoalMeta::default()
        };
        let object = self
            .store
            .create(NewObject::new(ObjectKind::Goal, new.name, new.description).with_metadata(to_map(&meta)?))
            .await?;
        let goal = Goal::from_object(&object)?;

        info!(goal_id = %goal.id, project_id = %goal.project_id, name = %goal.name, "Created goal");
        if !goal.depends_on.is_empty() {
            self.warn_on_cycles(&goal.project_id).await;
        }
        Ok(goal)
    }

    async fn same_project(&self, goal_id: &str, project_id: &str) -> Result<Goal> {
        let goal = self.get(goal_id).await?;
        if goal.project_id != project_id {
            return Err(Error::invalid_record(format!(
                "goal {goal_id} belongs to project {}, not {project_id}",
                goal.project_id
            )));
        }
        Ok(goal)
    }

    /// Fetch one goal.
    pub async fn get(&self, goal_id: &str) -> Result<Goal> {
        let object = self.store.get(goal_id).await.map_err(|e| {
            if e.is_not_found() {
                Error::not_found("goal", goal_id)
            } else {
                e
            }
        })?;
        Goal::from_object(&object)
    }

    async fn all(&self) -> Result<Vec<Goal>> {
        self.store
            .list(ObjectKind::Goal)
            .await?
            .iter()
            .map(Goal::from_object)
            .collect()
    }

    /// Goals of a project, in creation order.
    pub async fn list(&self, project_id: &str) -> Result<Vec<Goal>> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .filter(|g| g.project_id == project_id)
            .collect())
    }

    /// Direct children of a goal.
    pub async fn children(&self, goal_id: &str) -> Result<Vec<Goal>> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .filter(|g| g.parent_goal_id.as_deref() == Some(goal_id))
            .collect())
    }

    /// Goals currently assigned to an agent.
    pub async fn assigned_to(&self, agent_id: &str) -> Result<Vec<Goal>> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .filter(|g| g.agent_id.as_deref() == Some(agent_id))
            .collect())
    }

    /// Merge only the given metadata keys; every other key keeps its stored value.
    async fn patch(&self, goal_id: &str, fields: Value) -> Result<Goal> {
        let Value::Object(fields) = fields else {
            return Err(Error::invalid_record("goal patch is not an object"));
        };
        let object = self.store.update_metadata(goal_id, fields).await?;
        Goal::from_object(&object)
    }

    /// Set a goal's status. Completing a child notifies the parent's agent.
    pub async fn set_status(&self, goal_id: &str, status: GoalStatus) -> Result<Goal> {
        let was = self.get(goal_id).await?.status;
        let goal = self.patch(goal_id, json!({ "status": status })).await?;

        info!(goal_id = %goal_id, from = %was, to = %status, "Goal status changed");
        if was == GoalStatus::Pending && status == GoalStatus::Completed {
            self.cascade(&goal).await;
        }
        Ok(goal)
    }

    /// Flip a goal between pending and completed.
    pub async fn toggle_status(&self, goal_id: &str) -> Result<Goal> {
        let goal = self.get(goal_id).await?;
        self.set_status(goal_id, goal.status.toggled()).await
    }

    /// Complete a goal with a report, clearing any earlier error.
    pub async fn complete(&self, goal_id: &str, report: &str, summary: Option<String>) -> Result<Goal> {
        self.get(goal_id).await?;
        self.patch(
            goal_id,
            json!({ "report": report, "summary": summary, "error": Value::Null }),
        )
        .await?;
        self.set_status(goal_id, GoalStatus::Completed).await
    }

    async fn cascade(&self, goal: &Goal) {
        let Some(parent_id) = &goal.parent_goal_id else {
            return;
        };
        let parent = match self.get(parent_id).await {
            Ok(parent) => parent,
            Err(e) => {
                warn!(goal_id = %goal.id, parent_id = %parent_id, error = %e, "Completion cascade could not load parent");
                return;
            }
        };
        let Some(agent_id) = parent.agent_id else {
            return;
        };

        let report = goal.report.as_deref().unwrap_or("(no report)");
        let text = format!(
            "Sub-goal \"{}\" ({}) of \"{}\" completed. Report: {}",
            goal.name,
            goal.id,
            parent.name,
            excerpt(report, self.excerpt_chars)
        );
        let delivered = self.registry.notify(&agent_id, text);
        debug!(goal_id = %goal.id, agent_id = %agent_id, delivered, "Completion cascade");
    }

    /// Add a dependency. Adding an existing edge changes nothing.
    pub async fn add_dependency(&self, goal_id: &str, depends_on: &str) -> Result<Goal> {
        if goal_id == depends_on {
            return Err(Error::invalid_record("a goal cannot depend on itself"));
        }
        let mut goal = self.get(goal_id).await?;
        self.same_project(depends_on, &goal.project_id).await?;

        if !goal.depends_on.insert(depends_on.to_string()) {
            return Ok(goal);
        }
        let goal = self.patch(goal_id, json!({ "depends_on": goal.depends_on })).await?;
        self.warn_on_cycles(&goal.project_id).await;
        Ok(goal)
    }

    /// Remove a dependency. Removing a missing edge changes nothing.
    pub async fn remove_dependency(&self, goal_id: &str, depends_on: &str) -> Result<Goal> {
        let mut goal = self.get(goal_id).await?;
        if !goal.depends_on.remove(depends_on) {
            return Ok(goal);
        }
        self.patch(goal_id, json!({ "depends_on": goal.depends_on })).await
    }

    /// Delete a goal and strip its id from every sibling's dependencies.
    pub async fn delete(&self, goal_id: &str) -> Result<()> {
        let goal = self.get(goal_id).await?;

        for mut sibling in self.list(&goal.project_id).await? {
            if sibling.id != goal.id && sibling.depends_on.remove(goal_id) {
                self.patch(&sibling.id, json!({ "depends_on": sibling.depends_on }))
                    .await?;
            }
        }
        self.store.delete(goal_id).await?;
        info!(goal_id = %goal_id, project_id = %goal.project_id, "Deleted goal");
        Ok(())
    }

    /// Assign a goal and send its text to the agent as the next message.
    pub async fn assign_to_agent(&self, goal_id: &str, agent_id: &str) -> Result<Goal> {
        let goal = self.set_assignment(goal_id, agent_id).await?;

        let delivered = self.registry.send(agent_id, goal.assignment_text());
        if !delivered {
            warn!(goal_id = %goal_id, agent_id = %agent_id, "Assigned goal to an agent that is not running");
        }
        info!(goal_id = %goal_id, agent_id = %agent_id, "Assigned goal");
        Ok(goal)
    }

    /// Write an assignment without messaging the agent.
    pub async fn set_assignment(&self, goal_id: &str, agent_id: &str) -> Result<Goal> {
        self.get(goal_id).await?;
        self.patch(goal_id, json!({ "agent_id": agent_id })).await
    }

    /// Remove a goal's assignment.
    pub async fn clear_assignment(&self, goal_id: &str) -> Result<Goal> {
        self.get(goal_id).await?;
        self.patch(goal_id, json!({ "agent_id": Value::Null })).await
    }

    /// Ready root goals of a project.
    pub async fn ready_root_goals(&self, project_id: &str) -> Result<Vec<Goal>> {
        let goals = self.list(project_id).await?;
        Ok(ready_roots(&goals).into_iter().cloned().collect())
    }

    /// The agent assigned to the nearest ancestor that has one.
    pub async fn find_parent_orchestrator(&self, goal_id: &str) -> Result<Option<String>> {
        let mut seen = HashSet::new();
        let mut current = self.get(goal_id).await?.parent_goal_id;

        while let Some(parent_id) = current {
            if !seen.insert(parent_id.clone()) {
                warn!(goal_id = %goal_id, "Parent chain loops back on itself");
                return Ok(None);
            }
            let parent = match self.get(&parent_id).await {
                Ok(parent) => parent,
                Err(e) if e.is_not_found() => return Ok(None),
                Err(e) => return Err(e),
            };
            if parent.agent_id.is_some() {
                return Ok(parent.agent_id);
            }
            current = parent.parent_goal_id;
        }
        Ok(None)
    }

    /// Goals of a project grouped into dependency layers.
    pub async fn layers(&self, project_id: &str) -> Result<Vec<Vec<Goal>>> {
        let goals = self.list(project_id).await?;
        let by_id: HashMap<&str, &Goal> = goals.iter().map(|g| (g.id.as_str(), g)).collect();
        Ok(dependency_layers(&goals)
            .into_iter()
            .map(|layer| {
                layer
                    .iter()
                    .filter_map(|id| by_id.get(id.as_str()).map(|g| (*g).clone()))
                    .collect()
            })
            .collect())
    }

    /// Dependency cycles in a project.
    pub async fn cycles(&self, project_id: &str) -> Result<Vec<Vec<String>>> {
        Ok(dependency_cycles(&self.list(project_id).await?))
    }

    async fn warn_on_cycles(&self, project_id: &str) {
        match self.cycles(project_id).await {
            Ok(cycles) if !cycles.is_empty() => {
                warn!(project_id = %project_id, cycles = ?cycles, "Goal dependencies contain a cycle");
            }
            Ok(_) => {}
            Err(e) => debug!(project_id = %project_id, error = %e, "Cycle check failed"),
        }
    }

    /// Record a failed run against a goal. Its status is left as it is.
    pub async fn record_failure(&self, goal_id: &str, error: &str) -> Result<Goal> {
        self.get(goal_id).await?;
        self.patch(goal_id, json!({ "error": error })).await
    }

    /// Record a negative review; optionally count a corrective retry.
    pub async fn record_review(
        &self,
        goal_id: &str,
        report: &str,
        summary: &str,
        error: Option<String>,
        count_retry: bool,
    ) -> Result<Goal> {
        let goal = self.get(goal_id).await?;
        let mut fields = json!({ "report": report, "summary": summary, "error": error });
        if count_retry {
            fields["review_retries"] = json!(goal.review_retries.saturating_add(1));
        }
        self.patch(goal_id, fields).await
    }

    /// Note that the missing-evidence nudge was sent for a goal.
    pub async fn mark_evidence_nudged(&self, goal_id: &str) -> Result<Goal> {
        self.get(goal_id).await?;
        self.patch(goal_id, json!({ "evidence_nudged": true })).await
    }
}

fn to_map(meta: &GoalMeta) -> Result<Map<String, Value>> {
    match serde_json::to_value(meta)? {
        Value::Object(map) => Ok(map),
        _ => Err(Error::invalid_record("goal metadata is not an object")),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::store::InMemoryStore;

    fn graph() -> GoalGraph {
        GoalGraph::new(Arc::new(InMemoryStore::new()), Arc::new(AgentRegistry::new()))
    }

    fn goal(id: &str, deps: &[&str]) -> Goal {
        Goal {
            id: id.to_string(),
            project_id: "p".to_string(),
            name: id.to_string(),
            description: String::new(),
            status: GoalStatus::Pending,
            depends_on: deps.iter().map(|d| (*d).to_string()).collect(),
            parent_goal_id: None,
            agent_id: None,
            report: None,
            summary: None,
            error: None,
            evidence_nudged: false,
            review_retries: 0,
        }
    }

    #[test]
    fn should_only_surface_pending_roots_with_completed_dependencies() {
        let mut a = goal("a", &[]);
        let b = goal("b", &["a"]);
        let mut child = goal("c", &[]);
        child.parent_goal_id = Some("a".to_string());

        let goals = vec![a.clone(), b.clone(), child.clone()];
        let ready: Vec<&str> = ready_roots(&goals).iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ready, vec!["a"]);

        a.status = GoalStatus::Completed;
        let goals = vec![a, b, child];
        let ready: Vec<&str> = ready_roots(&goals).iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ready, vec!["b"]);
    }

    #[test]
    fn should_treat_unknown_dependencies_as_unsatisfied() {
        let goals = vec![goal("a", &["ghost"])];
        assert!(ready_roots(&goals).is_empty());
    }

    #[test]
    fn should_layer_by_dependency_depth() {
        let goals = vec![goal("c", &["b"]), goal("a", &[]), goal("b", &["a"]), goal("d", &["a"])];
        assert_eq!(
            dependency_layers(&goals),
            vec![vec!["a".to_string()], vec!["b".to_string(), "d".to_string()], vec!["c".to_string()]]
        );
    }

    #[test]
    fn should_put_cycle_remainder_in_one_extra_layer() {
        let goals = vec![goal("a", &[]), goal("x", &["y", "a"]), goal("y", &["x"]), goal("z", &["y"])];
        let layers = dependency_layers(&goals);
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0], vec!["a".to_string()]);
        assert_eq!(layers[1], vec!["x".to_string(), "y".to_string(), "z".to_string()]);
    }

    #[test]
    fn should_find_cycles_including_self_loops() {
        let goals = vec![goal("a", &["b"]), goal("b", &["a"]), goal("c", &["c"]), goal("d", &[])];
        let mut cycles = dependency_cycles(&goals);
        cycles.sort();
        assert_eq!(
            cycles,
            vec![vec!["a".to_string(), "b".to_string()], vec!["c".to_string()]]
        );
    }

    #[test]
    fn should_cut_long_excerpts_on_char_boundaries() {
        assert_eq!(excerpt("héllo wörld", 5), "héllo...");
        assert_eq!(excerpt("short", 10), "short");
    }

    #[tokio::test]
    async fn given_repeated_add_dependency_when_reading_then_edge_appears_once() {
        let graph = graph();
        let a = graph.create(NewGoal::new("p", "A", "")).await.unwrap();
        let b = graph.create(NewGoal::new("p", "B", "")).await.unwrap();

        graph.add_dependency(&b.id, &a.id).await.unwrap();
        graph.add_dependency(&b.id, &a.id).await.unwrap();

        let b = graph.get(&b.id).await.unwrap();
        assert_eq!(b.depends_on, BTreeSet::from([a.id.clone()]));
    }

    #[tokio::test]
    async fn given_cross_project_dependency_when_adding_then_rejects() {
        let graph = graph();
        let a = graph.create(NewGoal::new("p1", "A", "")).await.unwrap();
        let b = graph.create(NewGoal::new("p2", "B", "")).await.unwrap();

        assert!(graph.add_dependency(&b.id, &a.id).await.is_err());
        assert!(graph.add_dependency(&a.id, &a.id).await.is_err());
    }

    #[tokio::test]
    async fn given_dependents_when_deleting_goal_then_id_is_pruned_everywhere() {
        let graph = graph();
        let a = graph.create(NewGoal::new("p", "A", "")).await.unwrap();
        let b = graph
            .create(NewGoal::new("p", "B", "").depends_on(&a.id))
            .await
            .unwrap();
        let c = graph
            .create(NewGoal::new("p", "C", "").depends_on(&a.id).depends_on(&b.id))
            .await
            .unwrap();

        graph.delete(&a.id).await.unwrap();

        assert!(graph.get(&a.id).await.unwrap_err().is_not_found());
        assert!(graph.get(&b.id).await.unwrap().depends_on.is_empty());
        assert_eq!(
            graph.get(&c.id).await.unwrap().depends_on,
            BTreeSet::from([b.id.clone()])
        );
    }

    #[tokio::test]
    async fn given_reassignment_when_assigning_then_last_agent_wins() {
        let graph = graph();
        let a = graph.create(NewGoal::new("p", "A", "")).await.unwrap();

        graph.assign_to_agent(&a.id, "agent-1").await.unwrap();
        graph.assign_to_agent(&a.id, "agent-2").await.unwrap();

        assert_eq!(graph.get(&a.id).await.unwrap().agent_id.as_deref(), Some("agent-2"));
        assert!(graph.assigned_to("agent-1").await.unwrap().is_empty());
        assert_eq!(graph.assigned_to("agent-2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn given_nested_goals_when_finding_parent_orchestrator_then_walks_up() {
        let graph = graph();
        let root = graph.create(NewGoal::new("p", "Root", "")).await.unwrap();
        let mid = graph
            .create(NewGoal::new("p", "Mid", "").with_parent(&root.id))
            .await
            .unwrap();
        let leaf = graph
            .create(NewGoal::new("p", "Leaf", "").with_parent(&mid.id))
            .await
            .unwrap();

        assert_eq!(graph.find_parent_orchestrator(&leaf.id).await.unwrap(), None);

        graph.assign_to_agent(&root.id, "orch-1").await.unwrap();
        assert_eq!(
            graph.find_parent_orchestrator(&leaf.id).await.unwrap().as_deref(),
            Some("orch-1")
        );
        assert_eq!(graph.children(&root.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn given_completed_goal_when_toggling_then_returns_to_pending() {
        let graph = graph();
        let a = graph.create(NewGoal::new("p", "A", "")).await.unwrap();

        let done = graph.complete(&a.id, "did it", None).await.unwrap();
        assert_eq!(done.status, GoalStatus::Completed);
        assert_eq!(done.report.as_deref(), Some("did it"));

        let back = graph.toggle_status(&a.id).await.unwrap();
        assert_eq!(back.status, GoalStatus::Pending);
    }

    #[tokio::test]
    async fn given_failure_when_recording_then_goal_stays_pending_with_error() {
        let graph = graph();
        let a = graph.create(NewGoal::new("p", "A", "")).await.unwrap();

        let failed = graph.record_failure(&a.id, "API error 401").await.unwrap();
        assert!(failed.is_pending());
        assert_eq!(failed.error.as_deref(), Some("API error 401"));
    }

    #[tokio::test]
    async fn given_completed_goal_when_stale_failure_is_recorded_then_status_stays_completed() {
        let graph = graph();
        let a = graph.create(NewGoal::new("p", "A", "")).await.unwrap();
        graph.set_assignment(&a.id, "w1").await.unwrap();

        graph.complete(&a.id, "shipped", None).await.unwrap();
        let after = graph.record_failure(&a.id, "worker stopped").await.unwrap();

        assert_eq!(after.status, GoalStatus::Completed);
        assert_eq!(after.report.as_deref(), Some("shipped"));
        assert_eq!(after.agent_id.as_deref(), Some("w1"));
    }

    #[tokio::test]
    async fn given_concurrent_mutations_when_interleaved_then_each_keeps_its_own_field() {
        let graph = graph();
        let a = graph.create(NewGoal::new("p", "A", "")).await.unwrap();
        graph.set_assignment(&a.id, "w1").await.unwrap();

        let (completed, cleared, nudged) = tokio::join!(
            graph.complete(&a.id, "shipped", Some("done".to_string())),
            graph.clear_assignment(&a.id),
            graph.mark_evidence_nudged(&a.id),
        );
        completed.unwrap();
        cleared.unwrap();
        nudged.unwrap();

        let a = graph.get(&a.id).await.unwrap();
        assert_eq!(a.status, GoalStatus::Completed);
        assert_eq!(a.summary.as_deref(), Some("done"));
        assert_eq!(a.agent_id, None);
        assert!(a.evidence_nudged);
    }

    #[tokio::test]
    async fn given_dependency_when_completed_then_dependent_becomes_ready() {
        let graph = graph();
        let a = graph.create(NewGoal::new("p", "A", "")).await.unwrap();
        let b = graph
            .create(NewGoal::new("p", "B", "").depends_on(&a.id))
            .await
            .unwrap();
        let ready: Vec<String> = graph.ready_root_goals("p").await.unwrap().into_iter().map(|g| g.id).collect();
        assert_eq!(ready, vec![a.id.clone()]);

        graph.complete(&a.id, "done", None).await.unwrap();

        let ready: Vec<String> = graph.ready_root_goals("p").await.unwrap().into_iter().map(|g| g.id).collect();
        assert_eq!(ready, vec![b.id]);
    }
}
