//! In-memory record store for development and testing.
//!
//! Rows mirror the persistent layout: a JSON-serialized document beside the
//! indexed columns (`name, version, state, pause, terminate`), one table per
//! record kind. Filters evaluate against the columns only, the way an
//! indexed query would.

use std::sync::RwLock;

use async_trait::async_trait;
use taskcube_core::store::{Page, Record, RecordFilter, RecordQuery, RecordStore, StoreError};
use taskcube_core::types::Kind;

const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone)]
struct Row {
    name: String,
    version: String,
    state: String,
    pause: bool,
    terminate: bool,
    data: String,
}

impl Row {
    fn encode<R: Record>(record: &R) -> Result<Self, StoreError> {
        let data = serde_json::to_string(record)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Self {
            name: record.name().to_string(),
            version: record.version().to_string(),
            state: record.state_label(),
            pause: record.pause(),
            terminate: record.terminate(),
            data,
        })
    }

    fn decode<R: Record>(&self) -> Result<R, StoreError> {
        serde_json::from_str(&self.data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn matches_filter(&self, filter: &RecordFilter) -> bool {
        if !filter.name.is_empty() && self.name != filter.name {
            return false;
        }
        if !filter.version.is_empty() && self.version != filter.version {
            return false;
        }
        if let Some(states) = &filter.states {
            if !states.iter().any(|s| *s == self.state) {
                return false;
            }
        }
        true
    }

    fn matches_query(&self, query: &RecordQuery) -> bool {
        if !query.name.is_empty() && !self.name.contains(&query.name) {
            return false;
        }
        if !query.version.is_empty() && !self.version.contains(&query.version) {
            return false;
        }
        if !query.state.is_empty() && self.state != query.state {
            return false;
        }
        if let Some(pause) = query.pause {
            if self.pause != pause {
                return false;
            }
        }
        if let Some(terminate) = query.terminate {
            if self.terminate != terminate {
                return false;
            }
        }
        true
    }
}

/// In-memory implementation of [`RecordStore`] for every record kind.
#[derive(Default)]
pub struct InMemoryRecordStore {
    scripts: RwLock<Vec<Row>>,
    templates: RwLock<Vec<Row>>,
    tasks: RwLock<Vec<Row>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, kind: Kind) -> &RwLock<Vec<Row>> {
        match kind {
            Kind::Script => &self.scripts,
            Kind::TaskTemplate => &self.templates,
            Kind::Task => &self.tasks,
        }
    }
}

#[async_trait]
impl<R: Record> RecordStore<R> for InMemoryRecordStore {
    async fn get(&self, filter: &RecordFilter) -> Result<Vec<R>, StoreError> {
        let rows = self
            .table(R::KIND)
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        rows.iter()
            .filter(|r| r.matches_filter(filter))
            .map(Row::decode)
            .collect()
    }

    async fn exist(&self, filter: &RecordFilter) -> Result<bool, StoreError> {
        let rows = self
            .table(R::KIND)
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(rows.iter().any(|r| r.matches_filter(filter)))
    }

    async fn create(&self, record: &R) -> Result<(), StoreError> {
        let row = Row::encode(record)?;
        let mut rows = self
            .table(R::KIND)
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        if rows
            .iter()
            .any(|r| r.name == row.name && r.version == row.version)
        {
            return Err(StoreError::RecordExisted);
        }
        rows.push(row);
        Ok(())
    }

    async fn update(&self, record: &R) -> Result<(), StoreError> {
        let row = Row::encode(record)?;
        let mut rows = self
            .table(R::KIND)
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        let mut matched = rows
            .iter_mut()
            .filter(|r| r.name == row.name && r.version == row.version);
        let Some(slot) = matched.next() else {
            return Err(StoreError::NotFound(format!(
                "{}/{}/{}",
                R::KIND,
                row.name,
                row.version
            )));
        };
        if matched.next().is_some() {
            return Err(StoreError::MultipleRecord);
        }
        *slot = row;
        Ok(())
    }

    async fn delete(&self, filter: &RecordFilter) -> Result<(), StoreError> {
        let mut rows = self
            .table(R::KIND)
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        rows.retain(|r| !r.matches_filter(filter));
        Ok(())
    }

    async fn query(&self, query: &RecordQuery) -> Result<Page<R>, StoreError> {
        let rows = self
            .table(R::KIND)
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        let matched: Vec<&Row> = rows.iter().rev().filter(|r| r.matches_query(query)).collect();
        let page = query.page.max(1);
        let page_size = if query.page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            query.page_size
        };

        let items = matched
            .iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .map(|r| r.decode())
            .collect::<Result<Vec<R>, StoreError>>()?;

        Ok(Page {
            page,
            page_size,
            total: matched.len(),
            items,
        })
    }
}
