//! Persistence seam.
//!
//! Script, TaskTemplate and Task share one storage pattern: a JSON document
//! stored beside indexed columns (`kind, name, version, state, pause,
//! terminate`). The [`Record`] trait captures that shape and [`RecordStore`]
//! is the capability set `{get, exist, create, update, delete, query}`
//! consumed by the services and the controller.
//!
//! Note: implementations live in the taskcube-stores crate.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::types::{Kind, Script, Task, TaskTemplate};

/// Store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record existed")]
    RecordExisted,
    #[error("multiple records matched")]
    MultipleRecord,
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// A persistable document with indexed identity and state columns.
pub trait Record:
    Clone + Send + Sync + Serialize + DeserializeOwned + 'static
{
    const KIND: Kind;

    fn name(&self) -> &str;
    fn version(&self) -> &str;
    /// Value of the indexed type/status column (script type, task status).
    fn state_label(&self) -> String;
    fn pause(&self) -> bool {
        false
    }
    fn terminate(&self) -> bool {
        false
    }
}

impl Record for Script {
    const KIND: Kind = Kind::Script;

    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn version(&self) -> &str {
        &self.metadata.version
    }

    fn state_label(&self) -> String {
        self.metadata.script_type.to_string()
    }
}

impl Record for TaskTemplate {
    const KIND: Kind = Kind::TaskTemplate;

    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn version(&self) -> &str {
        &self.metadata.version
    }

    fn state_label(&self) -> String {
        String::new()
    }
}

impl Record for Task {
    const KIND: Kind = Kind::Task;

    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn version(&self) -> &str {
        &self.metadata.version
    }

    fn state_label(&self) -> String {
        self.status.status.to_string()
    }

    fn pause(&self) -> bool {
        self.spec.pause
    }

    fn terminate(&self) -> bool {
        self.spec.terminate
    }
}

/// Exact-match filter; empty name/version match anything, `states: None`
/// matches every state while `Some(list)` means `state IN list` (the empty
/// string is a legal list member).
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub name: String,
    pub version: String,
    pub states: Option<Vec<String>>,
}

impl RecordFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn by_name_version(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    pub fn with_states<S: ToString>(mut self, states: &[S]) -> Self {
        self.states = Some(states.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn matches<R: Record>(&self, record: &R) -> bool {
        if !self.name.is_empty() && record.name() != self.name {
            return false;
        }
        if !self.version.is_empty() && record.version() != self.version {
            return false;
        }
        if let Some(states) = &self.states {
            if !states.iter().any(|s| *s == record.state_label()) {
                return false;
            }
        }
        true
    }
}

/// Paged fuzzy query: `name`/`version` match by substring, `state` exactly.
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    pub name: String,
    pub version: String,
    pub state: String,
    pub pause: Option<bool>,
    pub terminate: Option<bool>,
    pub page: usize,
    pub page_size: usize,
}

impl RecordQuery {
    pub fn matches<R: Record>(&self, record: &R) -> bool {
        if !self.name.is_empty() && !record.name().contains(&self.name) {
            return false;
        }
        if !self.version.is_empty() && !record.version().contains(&self.version) {
            return false;
        }
        if !self.state.is_empty() && record.state_label() != self.state {
            return false;
        }
        if let Some(pause) = self.pause {
            if record.pause() != pause {
                return false;
            }
        }
        if let Some(terminate) = self.terminate {
            if record.terminate() != terminate {
                return false;
            }
        }
        true
    }
}

/// One page of query results.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Page<R> {
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
    pub items: Vec<R>,
}

/// The persistence capability set shared by all record kinds.
#[async_trait]
pub trait RecordStore<R: Record>: Send + Sync {
    async fn get(&self, filter: &RecordFilter) -> Result<Vec<R>, StoreError>;
    async fn exist(&self, filter: &RecordFilter) -> Result<bool, StoreError>;
    /// Fails with [`StoreError::RecordExisted`] when the key collides.
    async fn create(&self, record: &R) -> Result<(), StoreError>;
    async fn update(&self, record: &R) -> Result<(), StoreError>;
    async fn delete(&self, filter: &RecordFilter) -> Result<(), StoreError>;
    async fn query(&self, query: &RecordQuery) -> Result<Page<R>, StoreError>;
}

/// Sort name ascending, version descending (newest version first); the
/// ordering used for latest-version lookups and version reaping.
pub fn sort_newest_first<R: Record>(records: &mut [R]) {
    records.sort_by(|a, b| a.name().cmp(b.name()).then_with(|| b.version().cmp(a.version())));
}

/// Sort name ascending, version ascending; the iteration order of the
/// controller loops.
pub fn sort_oldest_first<R: Record>(records: &mut [R]) {
    records.sort_by(|a, b| a.name().cmp(b.name()).then_with(|| a.version().cmp(b.version())));
}
