//! Projects as typed views over stored objects.

use std::fmt;
use std::sync::Arc;

use orchid_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::store::{NewObject, ObjectKind, ObjectStore, StoredObject, metadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    #[default]
    Active,
    Paused,
    Archived,
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Paused => write!(f, "paused"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub status: ProjectStatus,
}

impl Project {
    pub fn from_object(object: &StoredObject) -> Result<Self> {
        if object.kind != ObjectKind::Project {
            return Err(Error::not_found("project", &object.id));
        }
        let status = match object.metadata.get("status") {
            Some(value) => serde_json::from_value(value.clone())?,
            None => ProjectStatus::default(),
        };
        Ok(Self {
            id: object.id.clone(),
            name: object.title.clone(),
            status,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == ProjectStatus::Active
    }
}

/// Project records in the object store.
#[derive(Clone)]
pub struct ProjectStore {
    store: Arc<dyn ObjectStore>,
}

impl fmt::Debug for ProjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectStore").finish_non_exhaustive()
    }
}

impl ProjectStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, name: &str) -> Result<Project> {
        if name.trim().is_empty() {
            return Err(Error::invalid_record("project name must not be empty"));
        }
        let object = NewObject::new(ObjectKind::Project, name, "")
            .with_metadata(metadata([("status", Value::from("active"))]));
        let project = Project::from_object(&self.store.create(object).await?)?;
        info!(project_id = %project.id, name = %project.name, "Created project");
        Ok(project)
    }

    pub async fn get(&self, project_id: &str) -> Result<Project> {
        let object = self.store.get(project_id).await?;
        Project::from_object(&object)
    }

    /// Every project in creation order.
    pub async fn list(&self) -> Result<Vec<Project>> {
        self.store
            .list(ObjectKind::Project)
            .await?
            .iter()
            .map(Project::from_object)
            .collect()
    }

    /// Find a project by name.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<Project>> {
        Ok(self.list().await?.into_iter().find(|p| p.name == name))
    }

    pub async fn set_status(&self, project_id: &str, status: ProjectStatus) -> Result<Project> {
        self.get(project_id).await?;
        let patch = metadata([("status", serde_json::to_value(status)?)]);
        let project = Project::from_object(&self.store.update_metadata(project_id, patch).await?)?;
        info!(project_id = %project_id, status = %status, "Project status changed");
        Ok(project)
    }

    /// Delete the project record only; goals and sandboxes are the caller's.
    pub async fn delete(&self, project_id: &str) -> Result<()> {
        self.get(project_id).await?;
        self.store.delete(project_id).await
    }
}
