//! Script CRUD semantics.

use std::sync::Arc;

use taskcube_core::store::{
    sort_newest_first, Page, RecordFilter, RecordQuery, RecordStore,
};
use taskcube_core::types::{generate_version, rfc3339_now, Kind, Script, RESERVED_VERSIONS};

use crate::ApiError;

pub struct ScriptService {
    store: Arc<dyn RecordStore<Script>>,
}

impl ScriptService {
    pub fn new(store: Arc<dyn RecordStore<Script>>) -> Self {
        Self { store }
    }

    /// Create the first version of a script. Duplicate names are rejected;
    /// versions come from [`generate_version`].
    pub async fn create(&self, mut script: Script) -> Result<Script, ApiError> {
        self.check_kind_and_name(&script)?;
        if self.store.exist(&RecordFilter::by_name(&script.metadata.name)).await? {
            return Err(ApiError::Conflict(format!(
                "Script/{} existed",
                script.metadata.name
            )));
        }

        script.metadata.version = generate_version();
        script.metadata.create_at = rfc3339_now();
        self.store.create(&script).await?;
        tracing::info!(script = %script.metadata.name, version = %script.metadata.version, "script created");
        Ok(script)
    }

    /// Store a new version of an existing script, then reap versions beyond
    /// the reserved window.
    pub async fn update(&self, mut script: Script) -> Result<Script, ApiError> {
        self.check_kind_and_name(&script)?;
        if !self.store.exist(&RecordFilter::by_name(&script.metadata.name)).await? {
            return Err(ApiError::NotFound(format!(
                "Script/{} not exist",
                script.metadata.name
            )));
        }

        script.metadata.version = generate_version();
        script.metadata.create_at = rfc3339_now();
        self.store.create(&script).await?;
        self.reap_versions(&script.metadata.name).await;
        Ok(script)
    }

    pub async fn query(&self, query: &RecordQuery) -> Result<Page<Script>, ApiError> {
        let mut page = self.store.query(query).await?;
        sort_newest_first(&mut page.items);
        Ok(page)
    }

    pub async fn delete(&self, name: &str, version: &str) -> Result<(), ApiError> {
        if name.is_empty() {
            return Err(ApiError::InvalidArgument(
                "script name cannot be empty".to_string(),
            ));
        }
        let filter = RecordFilter::by_name_version(name, version);
        let matched: Vec<Script> = self.store.get(&filter).await?;
        if matched.is_empty() {
            return Err(ApiError::NotFound(format!("Script/{name} not exist")));
        }
        self.store.delete(&filter).await?;
        Ok(())
    }

    fn check_kind_and_name(&self, script: &Script) -> Result<(), ApiError> {
        if script.kind != Kind::Script {
            return Err(ApiError::InvalidArgument(format!(
                "unsupported kind: {}, only support: Script",
                script.kind
            )));
        }
        if script.metadata.name.is_empty() {
            return Err(ApiError::InvalidArgument(
                "script name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Keep at most [`RESERVED_VERSIONS`] versions per name; older versions
    /// (version string descending) are removed, failures only logged.
    async fn reap_versions(&self, name: &str) {
        let mut versions: Vec<Script> = match self.store.get(&RecordFilter::by_name(name)).await {
            Ok(versions) => versions,
            Err(e) => {
                tracing::error!(script = %name, error = %e, "query versions for reaping failed");
                return;
            }
        };
        if versions.len() <= RESERVED_VERSIONS {
            return;
        }
        sort_newest_first(&mut versions);
        for stale in &versions[RESERVED_VERSIONS..] {
            let filter =
                RecordFilter::by_name_version(&stale.metadata.name, &stale.metadata.version);
            if let Err(e) = self.store.delete(&filter).await {
                tracing::error!(
                    script = %stale.metadata.name,
                    version = %stale.metadata.version,
                    error = %e,
                    "reap script version failed"
                );
            }
        }
    }
}
