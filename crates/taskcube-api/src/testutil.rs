//! Shared fixtures for the service tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use taskcube_core::types::{Metadata, Task, TaskSpecStep, TaskTemplate};
use taskcube_host::{ContainerHost, HostEndpoint, HostError, HostFactory};
use taskcube_stores::InMemoryRecordStore;

use crate::TaskService;

/// Factory for tests that never reach a real container host.
pub(crate) struct NoopHostFactory;

#[async_trait]
impl HostFactory for NoopHostFactory {
    async fn connect(
        &self,
        endpoint: &HostEndpoint,
    ) -> Result<Arc<dyn ContainerHost>, HostError> {
        Err(HostError::Unavailable(format!(
            "no host behind {}",
            endpoint.server_host
        )))
    }
}

pub(crate) fn new_task_service() -> (TaskService, Arc<InMemoryRecordStore>) {
    let store = Arc::new(InMemoryRecordStore::new());
    (new_task_service_with_store(store.clone()), store)
}

pub(crate) fn new_task_service_with_store(store: Arc<InMemoryRecordStore>) -> TaskService {
    TaskService::new(
        store.clone(),
        store,
        Arc::new(NoopHostFactory),
        "1.41",
    )
}

/// A one-step task with an inline source.
pub(crate) fn sample_task(name: &str) -> Task {
    let mut task = Task {
        metadata: Metadata::named(name),
        ..Task::default()
    };
    task.spec.steps.push(TaskSpecStep {
        name: "one".to_string(),
        image: "alpine".to_string(),
        source: "echo hi".to_string(),
        ..TaskSpecStep::default()
    });
    task
}

/// A one-step template with an input mapping.
pub(crate) fn sample_template(name: &str) -> TaskTemplate {
    let mut template = TaskTemplate {
        metadata: Metadata::named(name),
        ..TaskTemplate::default()
    };
    template.spec.input = BTreeMap::from([("db".to_string(), "orders".to_string())]);
    template.spec.steps.push(TaskSpecStep {
        name: "one".to_string(),
        image: "alpine".to_string(),
        source: "echo hi".to_string(),
        ..TaskSpecStep::default()
    });
    template
}
