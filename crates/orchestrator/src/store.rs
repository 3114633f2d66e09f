//! Versioned object persistence.
//!
//! Goals, projects, facts and templates are all stored as [`StoredObject`]s:
//! a title, a text body with an undo stack, and a JSON metadata map that is
//! only ever shallow-merged.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchid_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Content versions kept for undo.
pub const MAX_VERSIONS: usize = 50;

/// Kind of a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Goal,
    Project,
    Fact,
    Template,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Goal => write!(f, "goal"),
            Self::Project => write!(f, "project"),
            Self::Fact => write!(f, "fact"),
            Self::Template => write!(f, "template"),
        }
    }
}

/// One stored entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub id: String,
    pub kind: ObjectKind,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Previous content, most recent last.
    #[serde(default)]
    pub versions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for [`ObjectStore::create`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewObject {
    pub kind: ObjectKind,
    pub title: String,
    pub content: String,
    pub metadata: Map<String, Value>,
}

impl NewObject {
    /// Describe a new object with empty metadata.
    pub fn new(kind: ObjectKind, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            content: content.into(),
            metadata: Map::new(),
        }
    }

    /// Set the initial metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Persistence for stored objects.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one object.
    async fn get(&self, id: &str) -> Result<StoredObject>;

    /// Store a new object under a fresh id.
    async fn create(&self, object: NewObject) -> Result<StoredObject>;

    /// Replace the content, keeping the previous content for undo.
    async fn update(&self, id: &str, content: String) -> Result<StoredObject>;

    /// Shallow-merge `patch` into the metadata.
    async fn update_metadata(&self, id: &str, patch: Map<String, Value>) -> Result<StoredObject>;

    /// Remove an object.
    async fn delete(&self, id: &str) -> Result<()>;

    /// All objects of a kind, in creation order.
    async fn list(&self, kind: ObjectKind) -> Result<Vec<StoredObject>>;

    /// Restore the most recent previous content.
    async fn undo(&self, id: &str) -> Result<StoredObject>;
}

#[derive(Debug, Default)]
struct Objects {
    by_id: HashMap<String, StoredObject>,
    order: Vec<String>,
}

/// In-process [`ObjectStore`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    objects: RwLock<Objects>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn missing(id: &str) -> Error {
    Error::not_found("object", id)
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get(&self, id: &str) -> Result<StoredObject> {
        self.objects
            .read()
            .await
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| missing(id))
    }

    async fn create(&self, object: NewObject) -> Result<StoredObject> {
        let now = Utc::now();
        let stored = StoredObject {
            id: Uuid::new_v4().to_string(),
            kind: object.kind,
            title: object.title,
            content: object.content,
            metadata: object.metadata,
            versions: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        let mut objects = self.objects.write().await;
        objects.order.push(stored.id.clone());
        objects.by_id.insert(stored.id.clone(), stored.clone());
        debug!(id = %stored.id, kind = %stored.kind, "Created object");
        Ok(stored)
    }

    async fn update(&self, id: &str, content: String) -> Result<StoredObject> {
        let mut objects = self.objects.write().await;
        let object = objects.by_id.get_mut(id).ok_or_else(|| missing(id))?;

        let previous = std::mem::replace(&mut object.content, content);
        object.versions.push(previous);
        if object.versions.len() > MAX_VERSIONS {
            let excess = object.versions.len() - MAX_VERSIONS;
            object.versions.drain(..excess);
        }
        object.updated_at = Utc::now();
        Ok(object.clone())
    }

    async fn update_metadata(&self, id: &str, patch: Map<String, Value>) -> Result<StoredObject> {
        let mut objects = self.objects.write().await;
        let object = objects.by_id.get_mut(id).ok_or_else(|| missing(id))?;

        object.metadata.extend(patch);
        object.updated_at = Utc::now();
        Ok(object.clone())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut objects = self.objects.write().await;
        objects.by_id.remove(id).ok_or_else(|| missing(id))?;
        objects.order.retain(|existing| existing != id);
        debug!(id = %id, "Deleted object");
        Ok(())
    }

    async fn list(&self, kind: ObjectKind) -> Result<Vec<StoredObject>> {
        let objects = self.objects.read().await;
        Ok(objects
            .order
            .iter()
            .filter_map(|id| objects.by_id.get(id))
            .filter(|object| object.kind == kind)
            .cloned()
            .collect())
    }

    async fn undo(&self, id: &str) -> Result<StoredObject> {
        let mut objects = self.objects.write().await;
        let object = objects.by_id.get_mut(id).ok_or_else(|| missing(id))?;

        let previous = object
            .versions
            .pop()
            .ok_or_else(|| Error::invalid_record(format!("object {id} has no earlier version")))?;
        object.content = previous;
        object.updated_at = Utc::now();
        Ok(object.clone())
    }
}

/// Build a metadata map from key/value pairs.
pub fn metadata<I, K>(entries: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    entries.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
