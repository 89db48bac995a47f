//! Task and goal collections keyed by record ID.

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use autopilot_types::{LongTermGoal, ScheduledTask};

use crate::document::JsonDocument;
use crate::{Result, StorageError};

/// A JSON document holding one ordered list of records.
pub trait Collection: Default + Serialize + DeserializeOwned + Send + 'static {
    type Item: Clone + Send;

    fn items(&self) -> &Vec<Self::Item>;
    fn items_mut(&mut self) -> &mut Vec<Self::Item>;
    fn id_of(item: &Self::Item) -> &str;
}

/// `{ "tasks": [...] }`
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TaskDocument {
    #[serde(default)]
    pub tasks: Vec<ScheduledTask>,
}

impl Collection for TaskDocument {
    type Item = ScheduledTask;

    fn items(&self) -> &Vec<ScheduledTask> {
        &self.tasks
    }

    fn items_mut(&mut self) -> &mut Vec<ScheduledTask> {
        &mut self.tasks
    }

    fn id_of(item: &ScheduledTask) -> &str {
        &item.id
    }
}

/// `{ "goals": [...] }`
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GoalDocument {
    #[serde(default)]
    pub goals: Vec<LongTermGoal>,
}

impl Collection for GoalDocument {
    type Item = LongTermGoal;

    fn items(&self) -> &Vec<LongTermGoal> {
        &self.goals
    }

    fn items_mut(&mut self) -> &mut Vec<LongTermGoal> {
        &mut self.goals
    }

    fn id_of(item: &LongTermGoal) -> &str {
        &item.id
    }
}

/// CRUD over a [`Collection`] persisted as one JSON file.
///
/// Iteration order is insertion order, which is also the order the
/// scheduler fires due tasks in.
pub struct RecordStore<C: Collection> {
    doc: JsonDocument<C>,
}

pub type TaskStore = RecordStore<TaskDocument>;
pub type GoalStore = RecordStore<GoalDocument>;

impl<C: Collection> RecordStore<C> {
    /// Open the store at `path`. The file is created on first write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            doc: JsonDocument::new(path),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        self.doc.path()
    }

    /// All records; empty if the file is missing or unreadable.
    pub async fn list(&self) -> Vec<C::Item> {
        self.doc.load().await.items().clone()
    }

    pub async fn get(&self, id: &str) -> Option<C::Item> {
        self.doc
            .load()
            .await
            .items()
            .iter()
            .find(|item| C::id_of(item) == id)
            .cloned()
    }

    /// Append a new record. Fails if the ID is already present.
    pub async fn insert(&self, item: C::Item) -> Result<()> {
        let id = C::id_of(&item).to_string();
        self.doc
            .update(move |doc| {
                if doc.items().iter().any(|existing| C::id_of(existing) == id) {
                    return Err(StorageError::Duplicate(id));
                }
                doc.items_mut().push(item);
                Ok(())
            })
            .await?
    }

    /// Mutate a record in place and return the updated copy.
    ///
    /// Returns `None` (and writes nothing new) when the ID is unknown.
    pub async fn update<F>(&self, id: &str, f: F) -> Result<Option<C::Item>>
    where
        F: FnOnce(&mut C::Item),
    {
        self.doc
            .update(|doc| {
                doc.items_mut()
                    .iter_mut()
                    .find(|item| C::id_of(item) == id)
                    .map(|item| {
                        f(item);
                        item.clone()
                    })
            })
            .await
    }

    /// Remove a record. Returns whether it existed.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        self.doc
            .update(|doc| {
                let before = doc.items().len();
                doc.items_mut().retain(|item| C::id_of(item) != id);
                doc.items().len() != before
            })
            .await
    }
}
